//! Notification dispatch seam.
//!
//! The scanner calls `send` at most once per newly-selected signal. Transport
//! (webhook, email) lives behind this trait; a failed send is logged by the
//! caller and never rolls back the dedup registry.

use crate::signal::SignalEvent;
use anyhow::Result;
use async_trait::async_trait;
use log::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, event: &SignalEvent) -> Result<()>;
}

/// Default dispatcher: writes the rendered signal to the log. Useful for
/// dry runs and as the fallback when no transport is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, event: &SignalEvent) -> Result<()> {
        info!("SIGNAL {}: {}", event.canonical_id(), event.notification_text());
        Ok(())
    }
}
