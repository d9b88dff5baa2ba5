pub mod types;

// Re-export key types
pub use types::{SpiffeId, SvidUpdate, TrustBundleSet, TrustDomain};
