use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rustls_pki_types::CertificateDer;
use tracing::trace;

use crate::config::SidecarConfig;
use crate::error::Error;
use crate::identity::{SvidUpdate, TrustBundleSet};
use crate::types::Result;

const CERTS_FILE_MODE: u32 = 0o644;
const KEY_FILE_MODE: u32 = 0o600;

const CERT_PEM_TAG: &str = "CERTIFICATE";
// Fixed label; consumers of this layout expect it regardless of key algorithm.
const KEY_PEM_TAG: &str = "EC PRIVATE KEY";

/// Target paths for the three artifact files, derived once at startup
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    /// SVID certificate chain file
    pub svid_path: PathBuf,
    /// Private key file
    pub key_path: PathBuf,
    /// Trust bundle file
    pub bundle_path: PathBuf,
    /// Relocate intermediates from the SVID file into the bundle file
    pub merge_intermediates: bool,
}

impl ArtifactLayout {
    /// Derive the layout from validated configuration
    pub fn from_config(config: &SidecarConfig) -> Self {
        let dir = Path::new(&config.cert_dir);
        Self {
            svid_path: dir.join(&config.svid_file_name),
            key_path: dir.join(&config.svid_key_file_name),
            bundle_path: dir.join(&config.svid_bundle_file_name),
            merge_intermediates: config.merge_intermediates(),
        }
    }
}

/// Writes identity-document updates to disk as PEM artifact files
#[derive(Debug)]
pub struct ArtifactWriter {
    layout: ArtifactLayout,
}

impl ArtifactWriter {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Write SVID, key and bundle files for one identity update
    ///
    /// The first failing write aborts the call; files already written stay in
    /// place. All three files are fully replaced on success.
    pub fn write(&self, svid: &SvidUpdate, bundles: &TrustBundleSet) -> Result<()> {
        let trust_domain = svid.spiffe_id.trust_domain();
        let anchors = bundles
            .get(trust_domain)
            .ok_or_else(|| Error::BundleNotFound(trust_domain.to_string()))?;

        if svid.cert_chain.is_empty() {
            return Err(Error::Internal("identity update has an empty certificate chain".into()));
        }

        let mut certs: Vec<&CertificateDer<'static>> = svid.cert_chain.iter().collect();
        let mut bundle: Vec<&CertificateDer<'static>> = anchors.iter().collect();

        // Move intermediates into the bundle, leaving only the leaf in certs
        if self.layout.merge_intermediates {
            bundle.extend(svid.intermediates());
            certs.truncate(1);
        }

        write_certs(&self.layout.svid_path, &certs)?;
        write_key(&self.layout.key_path, svid.private_key.secret_pkcs8_der())?;
        write_certs(&self.layout.bundle_path, &bundle)?;

        Ok(())
    }
}

/// Encode certificates as concatenated PEM blocks and write them to file
fn write_certs(path: &Path, certs: &[&CertificateDer<'static>]) -> Result<()> {
    let mut pem_data = String::new();
    for cert in certs {
        pem_data.push_str(&pem::encode(&pem::Pem::new(CERT_PEM_TAG, cert.as_ref().to_vec())));
    }

    write_file_with_mode(path, pem_data.as_bytes(), CERTS_FILE_MODE)?;
    Ok(())
}

/// Wrap a PKCS#8 DER key as a single PEM block and write it to file
fn write_key(path: &Path, key_der: &[u8]) -> Result<()> {
    let pem_data = pem::encode(&pem::Pem::new(KEY_PEM_TAG, key_der.to_vec()));

    write_file_with_mode(path, pem_data.as_bytes(), KEY_FILE_MODE)?;
    Ok(())
}

/// Write to a sibling temp path with the given mode, then rename into place
///
/// The rename keeps a co-located consumer from ever observing a half-written
/// artifact file.
fn write_file_with_mode(path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid artifact path"))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    trace!("Writing {} bytes to {}", data.len(), path.display());

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&tmp_path)?;
        file.write_all(data)?;
        // The process umask may have stripped bits at create time
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(mode))?;
    }

    #[cfg(not(unix))]
    {
        let _ = mode;
        fs::write(&tmp_path, data)?;
    }

    fs::rename(&tmp_path, path)
}
