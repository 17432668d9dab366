//! Deprecation notice collection.
//!
//! Relaxed evaluation paths (truthy conditionals, embedded templates,
//! deprecated facade methods) record a [`DeprecationNotice`] here instead of
//! logging inline. Notices are deduplicated by message and either flushed to
//! the log or drained by the embedding application for its own reporting.

use parking_lot::Mutex;
use tracing::warn;

/// A single deprecation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeprecationNotice {
    /// What is deprecated.
    pub message: String,
    /// What the caller should do instead.
    pub help_text: Option<String>,
    /// Version in which the behavior will be removed, when known.
    pub version: Option<String>,
}

/// Collector for deprecation notices raised during evaluation.
///
/// Shared between the engine and its facade via `Arc`; duplicate messages are
/// recorded once.
#[derive(Debug, Default)]
pub struct DeprecationContext {
    notices: Mutex<Vec<DeprecationNotice>>,
}

impl DeprecationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a deprecation notice. A notice with a message already recorded
    /// is dropped.
    pub fn deprecated(
        &self,
        message: impl Into<String>,
        help_text: Option<&str>,
        version: Option<&str>,
    ) {
        let message = message.into();
        let mut notices = self.notices.lock();
        if notices.iter().any(|n| n.message == message) {
            return;
        }
        notices.push(DeprecationNotice {
            message,
            help_text: help_text.map(str::to_string),
            version: version.map(str::to_string),
        });
    }

    /// Emit all recorded notices to the log and clear the collector.
    pub fn flush(&self) {
        for notice in self.drain() {
            match (&notice.help_text, &notice.version) {
                (Some(help), Some(version)) => {
                    warn!(version = %version, "deprecated: {}. {}", notice.message, help)
                }
                (Some(help), None) => warn!("deprecated: {}. {}", notice.message, help),
                (None, Some(version)) => {
                    warn!(version = %version, "deprecated: {}", notice.message)
                }
                (None, None) => warn!("deprecated: {}", notice.message),
            }
        }
    }

    /// Remove and return all recorded notices.
    pub fn drain(&self) -> Vec<DeprecationNotice> {
        std::mem::take(&mut *self.notices.lock())
    }
}
