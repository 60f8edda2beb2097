//! Strip-wrapper: parse the 64-byte `fs_header_v1_0`-style preamble that
//! wraps the tar.bz2 archive handed to the orchestrator, and hand back
//! an `ArchiveReader` positioned at the archive bytes that follow it.
//! Grounded on `UpdateStore::ExtractUpdateStore` in the original
//! source: read the fixed header, check `type` starts with `CERT`,
//! validate the trailing stream length against the recorded
//! `file_size`, then seek to the start of the archive.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::archive::ArchiveReader;
use crate::error::{AduError, Result};

const HEADER_SIZE: u64 = 64;
const TYPE_OFFSET: usize = 16;
const TYPE_MARKER: &[u8] = b"CERT";

/// The fixed 64-byte wrapper header preceding the tar.bz2 stream.
#[derive(Debug, Clone, Copy)]
pub struct WrapperHeader {
    pub magic: [u8; 4],
    pub file_size: u64,
    pub flags: u16,
    pub padsize: u8,
    pub version: u8,
    pub image_type: [u8; 16],
}

impl WrapperHeader {
    fn parse(bytes: &[u8; HEADER_SIZE as usize]) -> Self {
        let file_size_low = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let file_size_high = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        Self {
            magic: bytes[0..4].try_into().unwrap(),
            file_size: (u64::from(file_size_high) << 32) | u64::from(file_size_low),
            flags: u16::from_le_bytes(bytes[12..14].try_into().unwrap()),
            padsize: bytes[14],
            version: bytes[15],
            image_type: bytes[TYPE_OFFSET..TYPE_OFFSET + 16].try_into().unwrap(),
        }
    }

    fn validate(&self, actual_archive_size: u64, path: &Path) -> Result<()> {
        if &self.image_type[0..4] != TYPE_MARKER {
            return Err(AduError::BadFormat(format!(
                "update archive {} has wrong wrapper type (expected CERT)",
                path.display()
            )));
        }
        if actual_archive_size != self.file_size {
            return Err(AduError::BadFormat(format!(
                "update archive {} size mismatch: header says {}, file has {} remaining",
                path.display(),
                self.file_size,
                actual_archive_size
            )));
        }
        Ok(())
    }
}

/// Reads and validates `path`'s wrapper header, then returns an
/// `ArchiveReader` over the tar.bz2 stream following it.
pub fn strip_wrapper(path: &Path) -> Result<ArchiveReader> {
    let mut file = File::open(path).map_err(|source| AduError::ReadError {
        path: path.to_owned(),
        source,
    })?;
    let file_len = file
        .metadata()
        .map_err(|source| AduError::ReadError {
            path: path.to_owned(),
            source,
        })?
        .len();

    let mut raw_header = [0u8; HEADER_SIZE as usize];
    file.read_exact(&mut raw_header)
        .map_err(|source| AduError::ReadError {
            path: path.to_owned(),
            source,
        })?;
    let header = WrapperHeader::parse(&raw_header);

    let actual_archive_size = file_len.checked_sub(HEADER_SIZE).ok_or_else(|| {
        AduError::BadFormat(format!(
            "update archive {} is shorter than the wrapper header",
            path.display()
        ))
    })?;
    header.validate(actual_archive_size, path)?;

    file.seek(SeekFrom::Start(HEADER_SIZE))
        .map_err(|source| AduError::ReadError {
            path: path.to_owned(),
            source,
        })?;
    Ok(ArchiveReader::open_stream(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzip2::write::BzEncoder;
    use std::io::Write;

    fn wrapped_archive(tar_bz2: &[u8]) -> Vec<u8> {
        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..4].copy_from_slice(b"FSLX");
        header[4..8].copy_from_slice(&(tar_bz2.len() as u32).to_le_bytes());
        header[8..12].copy_from_slice(&0u32.to_le_bytes());
        header[TYPE_OFFSET..TYPE_OFFSET + 4].copy_from_slice(b"CERT");
        header[15] = 1;
        let mut bytes = header.to_vec();
        bytes.extend_from_slice(tar_bz2);
        bytes
    }

    fn tar_bz2_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut hdr = tar::Header::new_gnu();
            hdr.set_size(data.len() as u64);
            hdr.set_mode(0o644);
            hdr.set_cksum();
            builder.append_data(&mut hdr, name, *data).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::fast());
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn strips_header_and_yields_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let tar_bz2 = tar_bz2_of(&[("update.json", b"{}")]);
        let path = dir.path().join("update.img");
        std::fs::write(&path, wrapped_archive(&tar_bz2)).unwrap();

        let reader = strip_wrapper(&path).unwrap();
        let mut archive = reader.into_inner();
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["update.json"]);
    }

    #[test]
    fn rejects_wrong_type_marker() {
        let dir = tempfile::tempdir().unwrap();
        let tar_bz2 = tar_bz2_of(&[("a", b"1")]);
        let mut bytes = wrapped_archive(&tar_bz2);
        bytes[TYPE_OFFSET] = b'X';
        let path = dir.path().join("update.img");
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(strip_wrapper(&path), Err(AduError::BadFormat(_))));
    }

    #[test]
    fn rejects_file_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let tar_bz2 = tar_bz2_of(&[("a", b"1")]);
        let mut bytes = wrapped_archive(&tar_bz2);
        bytes.extend_from_slice(b"trailing-garbage-not-counted-in-header");
        let path = dir.path().join("update.img");
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(strip_wrapper(&path), Err(AduError::BadFormat(_))));
    }
}
