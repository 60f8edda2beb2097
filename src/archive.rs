//! C3: stream a tar.bz2 payload, from a file or an in-memory/caller
//! stream, and iterate its entries. Grounded on `LibArchiveHandle`/
//! `UpdateStore::ExtractTarBz2` in the original source, re-expressed
//! over the `tar`+`bzip2` crates instead of libarchive.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;

use crate::error::{AduError, Result};

const FILE_BUFFER_SIZE: usize = 8 * 1024;
const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Opens a tar.bz2 either from a filesystem path or a caller-supplied
/// stream, and exposes the decoded tar stream for `SafeExtractor` to
/// walk. Format is fixed: tar, filter: bzip2 only.
pub struct ArchiveReader {
    archive: tar::Archive<BzDecoder<Box<dyn Read>>>,
}

impl ArchiveReader {
    pub fn open_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| AduError::ReadError {
            path: path.to_owned(),
            source,
        })?;
        let reader: Box<dyn Read> = Box::new(BufReader::with_capacity(FILE_BUFFER_SIZE, file));
        Ok(Self {
            archive: tar::Archive::new(BzDecoder::new(reader)),
        })
    }

    pub fn open_stream(stream: impl Read + 'static) -> Self {
        let reader: Box<dyn Read> = Box::new(BufReader::with_capacity(STREAM_BUFFER_SIZE, stream));
        Self {
            archive: tar::Archive::new(BzDecoder::new(reader)),
        }
    }

    pub fn into_inner(self) -> tar::Archive<BzDecoder<Box<dyn Read>>> {
        self.archive
    }
}
