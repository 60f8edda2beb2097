//! C7: verify the bundle signature (RSA-PSS/SHA-256) against a pinned
//! X.509 certificate, with a signing-time-vs-validity-window check.
//! Grounded on `updateApplication::x509_verify_application_bundle` in
//! the original source — including fixing its inverted/dead cert-expiry
//! check (see design notes).

use std::path::{Path, PathBuf};

use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Verifier};
use openssl::x509::X509;

use chrono::NaiveDateTime;

use crate::bundle::AppBundle;
use crate::error::{AduError, Result};

/// Reads `[keyring] path` from an INI-style RAUC system config and
/// resolves it relative to `cert_dir`.
pub fn resolve_cert_path(rauc_system_conf: &Path, cert_dir: &Path) -> Result<PathBuf> {
    let contents = std::fs::read_to_string(rauc_system_conf).map_err(|source| AduError::ReadError {
        path: rauc_system_conf.to_owned(),
        source,
    })?;

    let mut in_keyring_section = false;
    for line in contents.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_keyring_section = line.eq_ignore_ascii_case("[keyring]");
            continue;
        }
        if in_keyring_section {
            if let Some((key, value)) = line.split_once('=') {
                if key.trim() == "path" {
                    return Ok(cert_dir.join(value.trim()));
                }
            }
        }
    }
    Err(AduError::BadFormat(format!(
        "no [keyring] path in {}",
        rauc_system_conf.display()
    )))
}

fn x509_time_to_naive(time: &openssl::asn1::Asn1TimeRef) -> Result<NaiveDateTime> {
    // openssl's Asn1Time has no direct chrono conversion; round-trip
    // through its display form, which is RFC 822-ish ("MMM D HH:MM:SS YYYY GMT").
    let text = time.to_string();
    NaiveDateTime::parse_from_str(&text, "%b %e %H:%M:%S %Y GMT")
        .map_err(|e| AduError::BadFormat(format!("certificate time {text:?}: {e}")))
}

pub struct SignatureVerifier {
    certificate: X509,
}

impl SignatureVerifier {
    pub fn load(cert_path: &Path) -> Result<Self> {
        let pem = std::fs::read(cert_path).map_err(|source| AduError::ReadError {
            path: cert_path.to_owned(),
            source,
        })?;
        let certificate = X509::from_pem(&pem).map_err(|source| AduError::CertLoad {
            path: cert_path.to_owned(),
            source,
        })?;
        Ok(Self { certificate })
    }

    /// Verifies `bundle`'s signature against this certificate's public
    /// key, after checking the signing time falls within the
    /// certificate's validity window.
    pub fn verify(&self, bundle: &mut AppBundle) -> Result<bool> {
        let signing_time = bundle.signing_time()?;
        let signature = bundle.signature()?;

        let not_before = x509_time_to_naive(self.certificate.not_before())?;
        let not_after = x509_time_to_naive(self.certificate.not_after())?;
        // Corrected window check: the original's `not_before >= signing
        // && not_after <= signing` can never be true for a live
        // certificate. The intended check is the inclusive window.
        if !(not_before <= signing_time && signing_time <= not_after) {
            return Err(AduError::CertExpired);
        }

        let public_key = self.certificate.public_key()?;
        let rsa_key: PKey<_> = public_key;

        let mut verifier = openssl::sign::Verifier::new(MessageDigest::sha256(), &rsa_key)?;
        verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
        verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
        verifier.set_rsa_mgf1_md(MessageDigest::sha256())?;

        let mut update_err = None;
        bundle.read_payload(64 * 1024, |chunk| {
            if update_err.is_some() {
                return;
            }
            if let Err(source) = verifier.update(chunk) {
                update_err = Some(AduError::CryptoBackendError(source));
            }
        })?;
        if let Some(e) = update_err {
            return Err(e);
        }

        self.finish_verify(&mut verifier, &signature)
    }

    fn finish_verify(&self, verifier: &mut Verifier, signature: &[u8]) -> Result<bool> {
        Ok(verifier.verify(signature)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_cert_path_reads_keyring_section() {
        let dir = tempfile::tempdir().unwrap();
        let conf_path = dir.path().join("system.conf");
        std::fs::write(&conf_path, "[system]\ncompatible=foo\n[keyring]\npath=ca.cert.pem\n").unwrap();
        let resolved = resolve_cert_path(&conf_path, dir.path()).unwrap();
        assert_eq!(resolved, dir.path().join("ca.cert.pem"));
    }

    #[test]
    fn resolve_cert_path_fails_without_keyring_section() {
        let dir = tempfile::tempdir().unwrap();
        let conf_path = dir.path().join("system.conf");
        std::fs::write(&conf_path, "[system]\ncompatible=foo\n").unwrap();
        assert!(resolve_cert_path(&conf_path, dir.path()).is_err());
    }

    fn self_signed_cert() -> (X509, PKey<openssl::pkey::Private>) {
        use openssl::asn1::Asn1Time;
        use openssl::rsa::Rsa;

        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();

        let mut builder = openssl::x509::X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder.sign(&pkey, MessageDigest::sha256()).unwrap();
        let cert = builder.build();
        (cert, pkey)
    }

    fn build_signed_bundle(payload: &[u8], signing_time: &str, pkey: &PKey<openssl::pkey::Private>) -> Vec<u8> {
        let mut signer = openssl::sign::Signer::new(MessageDigest::sha256(), pkey).unwrap();
        signer.set_rsa_padding(Padding::PKCS1_PSS).unwrap();
        signer.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH).unwrap();
        signer.set_rsa_mgf1_md(MessageDigest::sha256()).unwrap();
        signer.update(payload).unwrap();
        let signature = signer.sign_to_vec().unwrap();

        let mut header = [0u8; 12];
        header[0..8].copy_from_slice(&(payload.len() as u64).to_be_bytes());
        header[8..12].copy_from_slice(&1u32.to_be_bytes());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        let crc = hasher.finalize();

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&crc.to_be_bytes());
        bytes.extend_from_slice(payload);
        let mut ts = signing_time.as_bytes().to_vec();
        ts.resize(26, b' ');
        bytes.extend_from_slice(&ts);
        bytes.extend_from_slice(&signature);
        bytes
    }

    #[test]
    fn verifies_a_correctly_signed_bundle() {
        let (cert, pkey) = self_signed_cert();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("ca.pem");
        std::fs::write(&cert_path, cert.to_pem().unwrap()).unwrap();

        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let bytes = build_signed_bundle(b"payload-bytes", &now, &pkey);
        let bundle_path = dir.path().join("bundle");
        std::fs::write(&bundle_path, &bytes).unwrap();

        let verifier = SignatureVerifier::load(&cert_path).unwrap();
        let mut bundle = AppBundle::open(&bundle_path).unwrap();
        assert!(verifier.verify(&mut bundle).unwrap());
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let (cert, pkey) = self_signed_cert();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("ca.pem");
        std::fs::write(&cert_path, cert.to_pem().unwrap()).unwrap();

        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let mut bytes = build_signed_bundle(b"payload-bytes", &now, &pkey);
        // Flip a bit inside the payload region (right after the 16-byte header).
        bytes[16] ^= 0x01;

        let bundle_path = dir.path().join("bundle");
        std::fs::write(&bundle_path, &bytes).unwrap();

        let verifier = SignatureVerifier::load(&cert_path).unwrap();
        let mut bundle = AppBundle::open(&bundle_path).unwrap();
        assert!(!verifier.verify(&mut bundle).unwrap());
    }
}
