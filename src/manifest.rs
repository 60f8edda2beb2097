//! C5: parse the manifest JSON, verify per-file SHA-256 hashes, and
//! classify which payload kinds are present. Grounded on
//! `UpdateStore::ReadUpdateConfiguration`/`CheckUpdateSha256Sum` in the
//! original source.

use std::io::Read;
use std::path::Path;

use openssl::hash::{Hasher, MessageDigest};
use serde::Deserialize;

use crate::error::{AduError, Result};

const HASH_BUFFER_SIZE: usize = 8 * 1024;

/// Name the manifest is extracted under, inside the archive's work directory.
pub const MANIFEST_FILE_NAME: &str = "update.json";
pub const FIRMWARE_IMAGE_NAME: &str = "update.fw";
pub const APPLICATION_IMAGE_NAME: &str = "update.app";

#[derive(Debug, Deserialize)]
struct ManifestDoc {
    images: ImagesSection,
}

#[derive(Debug, Deserialize)]
struct ImagesSection {
    updates: Vec<UpdateEntry>,
}

#[derive(Debug, Deserialize)]
struct UpdateEntry {
    #[allow(dead_code)]
    version: String,
    #[allow(dead_code)]
    handler: String,
    file: String,
    hashes: Hashes,
}

#[derive(Debug, Deserialize)]
struct Hashes {
    sha256: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManifestResult {
    pub firmware_available: bool,
    pub application_available: bool,
}

pub fn sha256_hex_of_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|source| AduError::ReadError {
        path: path.to_owned(),
        source,
    })?;
    let mut hasher = Hasher::new(MessageDigest::sha256())?;
    let mut buf = [0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|source| AduError::ReadError {
            path: path.to_owned(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n])?;
    }
    let digest = hasher.finish()?;
    Ok(hex::encode(digest))
}

/// Parses the manifest JSON and verifies each referenced file's SHA-256
/// against the recorded hash, resolving `file` relative to
/// `extracted_dir`.
pub fn verify_manifest(manifest_json: &str, extracted_dir: &Path) -> Result<ManifestResult> {
    let doc: ManifestDoc = serde_json::from_str(manifest_json)
        .map_err(|e| AduError::BadFormat(format!("manifest: {e}")))?;
    if doc.images.updates.is_empty() {
        return Err(AduError::BadFormat(
            "manifest images.updates is empty".into(),
        ));
    }

    let mut result = ManifestResult::default();
    for entry in &doc.images.updates {
        let image_path = extracted_dir.join(&entry.file);
        let computed = sha256_hex_of_file(&image_path)?;
        let expected = entry.hashes.sha256.to_lowercase();
        if computed.to_lowercase() != expected {
            return Err(AduError::BadFormat(format!(
                "hash mismatch for {}",
                entry.file
            )));
        }

        match entry.file.as_str() {
            FIRMWARE_IMAGE_NAME => result.firmware_available = true,
            APPLICATION_IMAGE_NAME => result.application_available = true,
            other => return Err(AduError::UnsupportedImage(other.to_owned())),
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_for(file: &str, hash: &str) -> String {
        format!(
            r#"{{"images":{{"updates":[{{"version":"1","handler":"h","file":"{file}","hashes":{{"sha256":"{hash}"}}}}]}}}}"#
        )
    }

    #[test]
    fn verifies_matching_hash_and_classifies_firmware() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("update.fw");
        std::fs::write(&image_path, b"firmware-bytes").unwrap();
        let hash = sha256_hex_of_file(&image_path).unwrap();

        let result = verify_manifest(&manifest_for("update.fw", &hash.to_uppercase()), dir.path())
            .unwrap();
        assert!(result.firmware_available);
        assert!(!result.application_available);
    }

    #[test]
    fn flipped_bit_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("update.app");
        std::fs::write(&image_path, b"app-bytes").unwrap();
        let hash = sha256_hex_of_file(&image_path).unwrap();
        std::fs::write(&image_path, b"app-Bytes").unwrap(); // one bit flipped

        assert!(verify_manifest(&manifest_for("update.app", &hash), dir.path()).is_err());
    }

    #[test]
    fn unsupported_image_name_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("update.bin"), b"x").unwrap();
        let hash = sha256_hex_of_file(&dir.path().join("update.bin")).unwrap();
        assert!(matches!(
            verify_manifest(&manifest_for("update.bin", &hash), dir.path()),
            Err(AduError::UnsupportedImage(_))
        ));
    }

    #[test]
    fn missing_updates_section_fails() {
        assert!(verify_manifest(r#"{"images":{"updates":[]}}"#, Path::new("/")).is_err());
        assert!(verify_manifest(r#"{"images":{}}"#, Path::new("/")).is_err());
    }
}
