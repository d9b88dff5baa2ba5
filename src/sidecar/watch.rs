use std::fmt;

use async_trait::async_trait;

use crate::identity::{SvidUpdate, TrustBundleSet};
use crate::sidecar::rotation::Sidecar;

/// Failure reported by the identity delivery stream
#[derive(Debug)]
pub enum WatchError {
    /// Stream canceled during shutdown; expected and suppressed
    Canceled,
    /// Any other delivery failure
    Stream(String),
}

impl WatchError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, WatchError::Canceled)
    }
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchError::Canceled => write!(f, "stream canceled"),
            WatchError::Stream(msg) => write!(f, "{}", msg),
        }
    }
}

/// One event pushed by the delivery layer
#[derive(Debug)]
pub enum WatchEvent {
    /// Fresh identity documents and trust bundles
    Update {
        svid: SvidUpdate,
        bundles: TrustBundleSet,
    },
    /// Non-terminal stream failure
    Error(WatchError),
}

/// Serialized push stream of identity updates
///
/// Implementations hand out one event at a time; [`run`] consumes them from a
/// single loop, so one update is always fully processed before the next.
#[async_trait]
pub trait IdentitySource: Send {
    /// Next event, or `None` once the stream has ended
    async fn next_event(&mut self) -> Option<WatchEvent>;
}

/// Drive the sidecar from an identity source until the stream ends
///
/// The single consumer loop is what guarantees the serialization contract of
/// [`Sidecar::on_update`]. A running child process is not terminated when the
/// stream ends; tearing it down is the caller's responsibility.
pub async fn run(mut source: impl IdentitySource, sidecar: &Sidecar) {
    while let Some(event) = source.next_event().await {
        match event {
            WatchEvent::Update { svid, bundles } => sidecar.on_update(&svid, &bundles),
            WatchEvent::Error(err) => sidecar.on_watch_error(&err),
        }
    }
}
