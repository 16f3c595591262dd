//! TLS key material loading.

use crate::error::ServerError;
use crate::options::TlsOptions;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Load PEM certificate chain and private key into a rustls server config.
///
/// Invalid material is a startup failure; nothing here is recoverable
/// per-request.
pub fn load_server_config(options: &TlsOptions) -> Result<Arc<rustls::ServerConfig>, ServerError> {
    let certs = load_certs(&options.cert_path)?;
    let key = load_key(&options.key_path)?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(format!("certificate/key mismatch: {e}")))?;
    Ok(Arc::new(config))
}

fn open(path: &Path, what: &str) -> Result<BufReader<File>, ServerError> {
    if !path.exists() {
        return Err(ServerError::Tls(format!(
            "{what} file not found: {}",
            path.display()
        )));
    }
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ServerError::Tls(format!("cannot open {}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let mut reader = open(path, "certificate")?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|e| ServerError::Tls(format!("invalid certificate in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    let mut reader = open(path, "private key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ServerError::Tls(format!("invalid private key in {}: {e}", path.display())))?
        .ok_or_else(|| {
            ServerError::Tls(format!("no private key found in {}", path.display()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_files_are_tls_errors() {
        let options = TlsOptions {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        };
        assert!(matches!(
            load_server_config(&options),
            Err(ServerError::Tls(_))
        ));
    }

    #[test]
    fn test_garbage_pem_is_a_tls_error() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::File::create(&cert)
            .unwrap()
            .write_all(b"not a pem")
            .unwrap();
        std::fs::File::create(&key)
            .unwrap()
            .write_all(b"not a pem")
            .unwrap();
        let options = TlsOptions {
            cert_path: cert,
            key_path: key,
        };
        assert!(matches!(
            load_server_config(&options),
            Err(ServerError::Tls(_))
        ));
    }
}
