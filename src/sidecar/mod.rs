pub mod rotation;
pub mod watch;

pub use rotation::{CertReady, Sidecar};
pub use watch::{run, IdentitySource, WatchError, WatchEvent};
