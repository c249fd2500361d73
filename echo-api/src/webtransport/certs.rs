/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

use std::path::Path;

use anyhow::{Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

fn is_der(path: &Path) -> bool {
    path.extension().map_or(false, |x| x == "der")
}

/// Load the certificate chain and private key. Files ending in `.der` are
/// taken as raw DER (PKCS #8 for the key), anything else as PEM.
pub fn load_key_and_cert_chain(
    cert_path: &Path,
    key_path: &Path,
) -> Result<(PrivateKeyDer<'static>, Vec<CertificateDer<'static>>)> {
    let key = std::fs::read(key_path)
        .with_context(|| format!("failed to read private key {}", key_path.display()))?;
    let key = if is_der(key_path) {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key))
    } else {
        rustls_pemfile::private_key(&mut &*key)
            .context("malformed PEM private key")?
            .context("no private keys found")?
    };

    let certs = std::fs::read(cert_path).with_context(|| {
        format!("failed to read certificate chain {}", cert_path.display())
    })?;
    let certs = if is_der(cert_path) {
        vec![CertificateDer::from(certs)]
    } else {
        rustls_pemfile::certs(&mut &*certs)
            .collect::<Result<Vec<_>, _>>()
            .context("invalid PEM-encoded certificate")?
    };
    if certs.is_empty() {
        anyhow::bail!("no certificates found in {}", cert_path.display());
    }
    Ok((key, certs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files_are_reported() {
        let err = load_key_and_cert_chain(
            Path::new("/nonexistent/cert.pem"),
            Path::new("/nonexistent/cert.key"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("failed to read private key"));
    }

    #[test]
    fn test_pem_without_key_is_rejected() {
        let dir = std::env::temp_dir().join(format!("echo-certs-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let key_path = dir.join("empty.key");
        std::fs::write(&key_path, b"not a pem file\n").unwrap();
        let err = load_key_and_cert_chain(&dir.join("cert.pem"), &key_path).unwrap_err();
        assert!(err.to_string().contains("no private keys found"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
