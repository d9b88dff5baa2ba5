use tokio::sync::mpsc;
use tracing::{error, info};

use crate::artifacts::ArtifactWriter;
use crate::identity::{SvidUpdate, TrustBundleSet};
use crate::process::ProcessSupervisor;
use crate::sidecar::watch::WatchError;

/// The rotation orchestrator: writes artifacts, reloads the consumer and
/// publishes readiness
///
/// `on_update` must not be invoked concurrently; the delivery layer (or
/// [`watch::run`](crate::sidecar::watch::run)) is expected to process one
/// update fully before delivering the next.
pub struct Sidecar {
    writer: ArtifactWriter,
    /// Absent when no reload command or hook is configured
    supervisor: Option<ProcessSupervisor>,
    cert_ready_tx: mpsc::Sender<()>,
}

/// Consumer handle for the readiness slot
///
/// A level indicator, not an event count: rotations completing before the
/// slot is read coalesce into a single pending signal.
pub struct CertReady {
    rx: mpsc::Receiver<()>,
}

impl CertReady {
    /// Wait until at least one rotation has completed since the last read
    ///
    /// Returns `false` once the sidecar has been dropped.
    pub async fn ready(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Non-blocking read of the readiness slot
    pub fn try_ready(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

impl Sidecar {
    /// Create a sidecar and the readiness handle fed by it
    pub fn new(writer: ArtifactWriter, supervisor: Option<ProcessSupervisor>) -> (Self, CertReady) {
        let (cert_ready_tx, rx) = mpsc::channel(1);

        (
            Self {
                writer,
                supervisor,
                cert_ready_tx,
            },
            CertReady { rx },
        )
    }

    /// Process one identity update
    ///
    /// Failures are terminal for this update only: artifacts written by a
    /// previous rotation and the consumer process are left untouched, and the
    /// next update is processed normally.
    pub fn on_update(&self, svid: &SvidUpdate, bundles: &TrustBundleSet) {
        info!(spiffe_id = %svid.spiffe_id, "Updating certificates");

        if let Err(e) = self.writer.write(svid, bundles) {
            error!("Unable to write certificate artifacts: {}", e);
            return;
        }

        if let Some(supervisor) = &self.supervisor {
            // Last good write wins: the artifacts are on disk even when the
            // consumer could not be told about them
            if let Err(e) = supervisor.reload() {
                error!("Unable to reload consumer process: {}", e);
            }
        }

        // Non-blocking publish; a pending unread signal already says it all
        let _ = self.cert_ready_tx.try_send(());
    }

    /// Report a delivery-stream error
    ///
    /// Cancellation is the expected shutdown path and is suppressed entirely.
    pub fn on_watch_error(&self, err: &WatchError) {
        if !err.is_canceled() {
            error!("Error while watching identity stream: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactLayout;
    use crate::error::Error;
    use crate::identity::{SpiffeId, TrustDomain};
    use rustls_pki_types::{CertificateDer, PrivatePkcs8KeyDer};
    use tempfile::tempdir;

    fn writer(dir: &std::path::Path) -> ArtifactWriter {
        ArtifactWriter::new(ArtifactLayout {
            svid_path: dir.join("svid.pem"),
            key_path: dir.join("svid_key.pem"),
            bundle_path: dir.join("svid_bundle.pem"),
            merge_intermediates: false,
        })
    }

    fn update() -> SvidUpdate {
        SvidUpdate {
            spiffe_id: SpiffeId::parse("spiffe://example.org/workload").unwrap(),
            cert_chain: vec![CertificateDer::from(vec![1u8, 2, 3])],
            private_key: PrivatePkcs8KeyDer::from(vec![7u8; 16]),
        }
    }

    fn bundles() -> TrustBundleSet {
        let mut set = TrustBundleSet::new();
        set.insert(TrustDomain::new("example.org"), vec![CertificateDer::from(vec![9u8])]);
        set
    }

    #[tokio::test]
    async fn test_rapid_rotations_coalesce_into_one_signal() {
        let dir = tempdir().unwrap();
        let (sidecar, mut cert_ready) = Sidecar::new(writer(dir.path()), None);

        for _ in 0..5 {
            sidecar.on_update(&update(), &bundles());
        }

        assert!(cert_ready.try_ready());
        assert!(!cert_ready.try_ready());
        assert!(dir.path().join("svid.pem").exists());
    }

    #[tokio::test]
    async fn test_failed_write_publishes_nothing() {
        let dir = tempdir().unwrap();
        let (sidecar, mut cert_ready) = Sidecar::new(writer(dir.path()), None);

        // Bundles lack the update's trust domain
        sidecar.on_update(&update(), &TrustBundleSet::new());

        assert!(!cert_ready.try_ready());
        assert!(!dir.path().join("svid.pem").exists());

        // The next valid update goes through untouched
        sidecar.on_update(&update(), &bundles());
        assert!(cert_ready.try_ready());
        assert!(dir.path().join("svid.pem").exists());
    }

    #[tokio::test]
    async fn test_reload_failure_leaves_artifacts_in_place() {
        let dir = tempdir().unwrap();
        let supervisor = ProcessSupervisor::external(Box::new(|| {
            Err(Error::Internal("reload hook failed".into()))
        }));
        let (sidecar, mut cert_ready) = Sidecar::new(writer(dir.path()), Some(supervisor));

        sidecar.on_update(&update(), &bundles());

        assert!(dir.path().join("svid.pem").exists());
        assert!(dir.path().join("svid_key.pem").exists());
        assert!(dir.path().join("svid_bundle.pem").exists());
        assert!(cert_ready.try_ready());
    }

    #[tokio::test]
    async fn test_blocking_ready_sees_rotation() {
        let dir = tempdir().unwrap();
        let (sidecar, mut cert_ready) = Sidecar::new(writer(dir.path()), None);

        sidecar.on_update(&update(), &bundles());
        assert!(cert_ready.ready().await);

        drop(sidecar);
        assert!(!cert_ready.ready().await);
    }
}
