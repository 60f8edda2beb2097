//! C6: read-only random-access view over the application bundle layout
//! (header, payload, timestamp, signature, trailing certs). Grounded on
//! `applicationImage.{h,cpp}` in the original source.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::error::{AduError, Result};

const HEADER_SIZE: u64 = 16;
const TIMESTAMP_SIZE: u64 = 26;
const HEADER_VERSION: u32 = 1;
const CERT_MARKER: &str = "\n-----BEGIN CERTIFICATE-----";
const COPY_FLUSH_CHUNK: usize = 512;

#[derive(Debug)]
pub struct AppBundle {
    path: PathBuf,
    file: File,
    payload_size: u64,
}

impl AppBundle {
    /// Opens `path`, reads the 16-byte header, and validates
    /// `header_version` and `header_crc32`.
    pub fn open(path: &Path) -> Result<Self> {
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

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)
            .map_err(|source| AduError::ReadError {
                path: path.to_owned(),
                source,
            })?;

        let payload_size = u64::from_be_bytes(header[0..8].try_into().unwrap());
        let header_version = u32::from_be_bytes(header[8..12].try_into().unwrap());
        let header_crc32 = u32::from_be_bytes(header[12..16].try_into().unwrap());

        if header_version != HEADER_VERSION {
            return Err(AduError::WrongHeaderVersion(header_version));
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header[0..12]);
        let actual = hasher.finalize();
        if actual != header_crc32 {
            return Err(AduError::BadHeaderChecksum {
                expected: header_crc32,
                actual,
            });
        }

        let min_len = HEADER_SIZE + payload_size + TIMESTAMP_SIZE;
        if file_len <= min_len {
            return Err(AduError::BadFormat(format!(
                "bundle {} too short: {file_len} <= {min_len}",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_owned(),
            file,
            payload_size,
        })
    }

    pub fn payload_size(&self) -> u64 {
        self.payload_size
    }

    fn io_read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|source| AduError::ReadError {
                path: self.path.clone(),
                source,
            })?;
        self.file
            .read_exact(buf)
            .map_err(|source| AduError::ReadError {
                path: self.path.clone(),
                source,
            })
    }

    /// Streams payload bytes in `chunk_size` pieces to `sink`.
    pub fn read_payload(&mut self, chunk_size: usize, mut sink: impl FnMut(&[u8])) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(HEADER_SIZE))
            .map_err(|source| AduError::ReadError {
                path: self.path.clone(),
                source,
            })?;
        let mut remaining = self.payload_size;
        let mut buf = vec![0u8; chunk_size];
        while remaining > 0 {
            let want = chunk_size.min(remaining as usize);
            self.file
                .read_exact(&mut buf[..want])
                .map_err(|source| AduError::ReadError {
                    path: self.path.clone(),
                    source,
                })?;
            sink(&buf[..want]);
            remaining -= want as u64;
        }
        Ok(())
    }

    pub fn timestamp_bytes(&mut self) -> Result<[u8; TIMESTAMP_SIZE as usize]> {
        let mut buf = [0u8; TIMESTAMP_SIZE as usize];
        self.io_read_at(HEADER_SIZE + self.payload_size, &mut buf)?;
        Ok(buf)
    }

    /// Parses the signing timestamp the way the original does: take the
    /// longest prefix of `[0-9T:\-Z+]`, strip a trailing `'Z'`, parse
    /// `%Y-%m-%dT%H:%M:%S` as naive/local time. Kept intentionally —
    /// see design notes on `signing_time`.
    pub fn signing_time(&mut self) -> Result<NaiveDateTime> {
        let raw = self.timestamp_bytes()?;
        let text: String = raw
            .iter()
            .take_while(|b| {
                b.is_ascii_digit() || matches!(**b, b'T' | b':' | b'-' | b'Z' | b'+')
            })
            .map(|b| *b as char)
            .collect();
        let trimmed = text.strip_suffix('Z').unwrap_or(&text);
        NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
            .map_err(|e| AduError::BadFormat(format!("signing time {trimmed:?}: {e}")))
    }

    /// Reads from the end of the timestamp to EOF and splits off the
    /// signature at the first certificate marker, if any.
    pub fn signature(&mut self) -> Result<Vec<u8>> {
        let start = HEADER_SIZE + self.payload_size + TIMESTAMP_SIZE;
        self.file
            .seek(SeekFrom::Start(start))
            .map_err(|source| AduError::ReadError {
                path: self.path.clone(),
                source,
            })?;
        let mut buf = Vec::new();
        self.file
            .read_to_end(&mut buf)
            .map_err(|source| AduError::ReadError {
                path: self.path.clone(),
                source,
            })?;

        let signature = match find_subslice(&buf, CERT_MARKER.as_bytes()) {
            Some(pos) => buf[..pos].to_vec(),
            None => buf,
        };
        if signature.is_empty() {
            return Err(AduError::BadFormat("zero-length signature".into()));
        }
        Ok(signature)
    }

    /// Streams the payload to a freshly created `dest_path`, flushing
    /// every 512-byte chunk and fsyncing before close.
    pub fn copy_payload_to(&mut self, dest_path: &Path) -> Result<()> {
        let mut dest = File::create(dest_path).map_err(|source| AduError::WriteError {
            path: dest_path.to_owned(),
            source,
        })?;
        let dest_path_owned = dest_path.to_owned();
        let mut write_err = None;
        self.read_payload(COPY_FLUSH_CHUNK, |chunk| {
            if write_err.is_some() {
                return;
            }
            if let Err(source) = dest.write_all(chunk).and_then(|_| dest.flush()) {
                write_err = Some(AduError::WriteError {
                    path: dest_path_owned.clone(),
                    source,
                });
            }
        })?;
        if let Some(e) = write_err {
            return Err(e);
        }
        dest.sync_all().map_err(|source| AduError::SyncError {
            path: dest_path_owned,
            source,
        })
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
