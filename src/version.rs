//! Reads the trivial current-version text files and applies the
//! `VersionType` discipline from `Config`. Grounded on the two
//! `#ifdef`-gated `getCurrentVersion` implementations in the original
//! source (`updateApplication.cpp`, `updateFirmware.cpp`).

use std::path::Path;

use crate::config::VersionType;
use crate::error::{AduError, Result};

/// A version value under either discipline; comparisons use `u64` when
/// the engine is configured for it, otherwise lexical string order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    Numeric(u64),
    Text(String),
}

impl Version {
    pub fn is_newer_than(&self, other: &Version) -> bool {
        match (self, other) {
            (Version::Numeric(a), Version::Numeric(b)) => a > b,
            (Version::Text(a), Version::Text(b)) => a > b,
            _ => false,
        }
    }
}

fn is_eight_digits(s: &str) -> bool {
    s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit())
}

/// Reads the first line of `path` and parses it per `version_type`.
pub fn read_current_version(path: &Path, version_type: VersionType) -> Result<Version> {
    let contents = std::fs::read_to_string(path).map_err(|source| AduError::VersionRead {
        path: path.to_owned(),
        source,
    })?;
    let first_line = contents.lines().next().unwrap_or("").to_owned();

    match version_type {
        VersionType::String => Ok(Version::Text(first_line)),
        VersionType::U64 => {
            if !is_eight_digits(&first_line) {
                return Err(AduError::BadFormat(format!(
                    "version file {} content {:?} does not match ^[0-9]{{8}}$",
                    path.display(),
                    first_line
                )));
            }
            first_line
                .parse::<u64>()
                .map(Version::Numeric)
                .map_err(|_| AduError::BadFormat(format!("unparseable version {first_line:?}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_numeric_version_when_well_formed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version");
        std::fs::write(&path, "20240102\n").unwrap();
        assert_eq!(
            read_current_version(&path, VersionType::U64).unwrap(),
            Version::Numeric(20240102)
        );
    }

    #[test]
    fn rejects_malformed_numeric_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version");
        std::fs::write(&path, "not-a-version\n").unwrap();
        assert!(read_current_version(&path, VersionType::U64).is_err());
    }

    #[test]
    fn reads_text_version_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version");
        std::fs::write(&path, "A001-002-FW\n").unwrap();
        assert_eq!(
            read_current_version(&path, VersionType::String).unwrap(),
            Version::Text("A001-002-FW".into())
        );
    }

    #[test]
    fn is_newer_than_compares_within_the_same_discipline() {
        assert!(Version::Numeric(10).is_newer_than(&Version::Numeric(5)));
        assert!(!Version::Numeric(5).is_newer_than(&Version::Numeric(10)));
    }
}
