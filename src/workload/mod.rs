use futures::StreamExt;
use rustls_pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use spiffe::{WorkloadApiClient, X509Context};
use tracing::info;

use crate::error::Error;
use crate::identity::{SpiffeId, SvidUpdate, TrustBundleSet, TrustDomain};
use crate::sidecar::{Sidecar, WatchError};
use crate::types::Result;

/// Watch the agent's Workload API and drive the sidecar until the stream ends
///
/// The stream is consumed by this single loop, which is what serializes
/// [`Sidecar::on_update`] calls. Connection and stream-setup failures are
/// returned; per-update failures are handed to the sidecar and the watch
/// continues.
pub async fn watch(agent_address: &str, sidecar: &Sidecar) -> Result<()> {
    let endpoint = endpoint_uri(agent_address);
    let mut client = WorkloadApiClient::new_from_path(&endpoint)
        .await
        .map_err(|e| Error::Stream(format!("failed to connect to {}: {}", endpoint, e)))?;

    let mut stream = client
        .stream_x509_contexts()
        .await
        .map_err(|e| Error::Stream(format!("failed to watch X.509 context: {}", e)))?;

    while let Some(item) = stream.next().await {
        match item {
            Ok(context) => match convert(&context) {
                Ok((svid, bundles)) => sidecar.on_update(&svid, &bundles),
                Err(e) => sidecar.on_watch_error(&WatchError::Stream(e.to_string())),
            },
            Err(e) => sidecar.on_watch_error(&classify(e.to_string())),
        }
    }

    Ok(())
}

/// The client wants an endpoint URI; agent_address is traditionally a bare
/// socket path, so one is turned into the other
fn endpoint_uri(agent_address: &str) -> String {
    if agent_address.starts_with('/') {
        format!("unix://{}", agent_address)
    } else {
        agent_address.to_string()
    }
}

/// Convert a Workload API context into the sidecar's document types
fn convert(context: &X509Context) -> Result<(SvidUpdate, TrustBundleSet)> {
    let svid = context
        .default_svid()
        .ok_or_else(|| Error::Stream("update contained no SVID".into()))?;

    for received in context.svids() {
        info!(spiffe_id = %received.spiffe_id(), "Received update");
    }

    let spiffe_id = SpiffeId::parse(&svid.spiffe_id().to_string())?;

    let cert_chain = svid
        .cert_chain()
        .iter()
        .map(|cert| CertificateDer::from(cert.content().to_vec()))
        .collect();
    let private_key = PrivatePkcs8KeyDer::from(svid.private_key().content().to_vec());

    let mut bundles = TrustBundleSet::new();
    if let Some(bundle) = context.bundle_set().get_bundle(svid.spiffe_id().trust_domain()) {
        let anchors = bundle
            .authorities()
            .iter()
            .map(|cert| CertificateDer::from(cert.content().to_vec()))
            .collect();
        bundles.insert(
            TrustDomain::new(svid.spiffe_id().trust_domain().to_string()),
            anchors,
        );
    }

    Ok((
        SvidUpdate {
            spiffe_id,
            cert_chain,
            private_key,
        },
        bundles,
    ))
}

/// Classify a stream failure
///
/// The client error type does not expose the gRPC status code, so the
/// canceled-at-shutdown case is recognized from the rendered message.
fn classify(message: String) -> WatchError {
    if message.to_ascii_lowercase().contains("cancel") {
        WatchError::Canceled
    } else {
        WatchError::Stream(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_uri() {
        assert_eq!(
            endpoint_uri("/tmp/spire-agent/public/api.sock"),
            "unix:///tmp/spire-agent/public/api.sock"
        );
        assert_eq!(endpoint_uri("unix:///run/agent.sock"), "unix:///run/agent.sock");
    }

    #[test]
    fn test_classify_cancellation() {
        assert!(classify("status: Cancelled, message: ...".into()).is_canceled());
        assert!(classify("operation canceled".into()).is_canceled());
        assert!(!classify("connection refused".into()).is_canceled());
    }
}
