//! svid-sidecar - Certificate-rotation sidecar for SPIFFE workloads
//!
//! Consumes X.509 SVID updates pushed by a SPIRE agent, persists SVID, key
//! and trust bundle to disk, and reloads a co-located consumer process

// Foundational layer
pub mod error;
pub mod types;
pub mod config;
pub mod telemetry;

// Core layer
pub mod identity;
pub mod artifacts;

// Application layer
pub mod process;
pub mod sidecar;

// Interface layer
pub mod workload;

// Public key types
pub use crate::artifacts::{ArtifactLayout, ArtifactWriter};
pub use crate::config::SidecarConfig;
pub use crate::error::Error;
pub use crate::identity::{SpiffeId, SvidUpdate, TrustBundleSet, TrustDomain};
pub use crate::process::ProcessSupervisor;
pub use crate::sidecar::{CertReady, IdentitySource, Sidecar, WatchError, WatchEvent};
pub use crate::types::Result;
