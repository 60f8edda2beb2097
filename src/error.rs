//! Domain error type shared by every component.
//!
//! Lower modules return [`AduError`] directly so the orchestrator can
//! match on [`ErrorKind`] and decide which bootstate to stage without
//! downcasting an opaque boxed error.

use std::path::PathBuf;

/// Coarse category of an [`AduError`], used by the orchestrator to pick
/// the bootstate to stage on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Crypto,
    Io,
    State,
    External,
    Versioning,
}

#[derive(thiserror::Error, Debug)]
pub enum AduError {
    #[error("not found: {0}")]
    NotFound(PathBuf),
    #[error("bad format: {0}")]
    BadFormat(String),
    #[error("wrong header version: {0} (expected 1)")]
    WrongHeaderVersion(u32),
    #[error("bad header checksum: expected {expected:08x}, got {actual:08x}")]
    BadHeaderChecksum { expected: u32, actual: u32 },
    #[error("unsupported image file: {0}")]
    UnsupportedImage(String),
    #[error("unsafe path in archive: {0}")]
    UnsafePath(String),
    #[error("archive contained no entries")]
    EmptyArchive,

    #[error("certificate expired relative to signing time")]
    CertExpired,
    #[error("could not load certificate {path}: {source}")]
    CertLoad {
        path: PathBuf,
        #[source]
        source: openssl::error::ErrorStack,
    },
    #[error("signature does not match bundle {0}")]
    SignatureMismatch(PathBuf),
    #[error("crypto backend error: {0}")]
    CryptoBackendError(#[from] openssl::error::ErrorStack),

    #[error("read error on {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write error on {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sync error on {path}: {source}")]
    SyncError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rename error {from} -> {to}: {source}")]
    RenameError {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not access bootloader env variable {0}")]
    BootEnvAccess(String),
    #[error("could not write bootloader env variable {0}")]
    BootEnvWrite(String),
    #[error("value {value} not allowed for variable {name}")]
    BootEnvNotAllowed { name: String, value: String },
    #[error("update state value {0} is not a recognized BootstateFlag")]
    NotAllowedUpdateState(String),

    #[error("firmware install failed: {stderr}")]
    FwInstallError { stderr: String },
    #[error("firmware rollback failed: {stderr}")]
    FwRollbackError { stderr: String },
    #[error("could not query loop devices: {0}")]
    LoopDeviceQueryError(String),

    #[error("could not read version file {path}: {source}")]
    VersionRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("version {dest} does not exceed current version {current}")]
    VersionMismatch { dest: String, current: String },
}

impl AduError {
    pub fn kind(&self) -> ErrorKind {
        use AduError::*;
        match self {
            NotFound(_)
            | BadFormat(_)
            | WrongHeaderVersion(_)
            | BadHeaderChecksum { .. }
            | UnsupportedImage(_)
            | UnsafePath(_)
            | EmptyArchive => ErrorKind::Input,

            CertExpired | CertLoad { .. } | SignatureMismatch(_) | CryptoBackendError(_) => {
                ErrorKind::Crypto
            }

            ReadError { .. } | WriteError { .. } | SyncError { .. } | RenameError { .. } => {
                ErrorKind::Io
            }

            BootEnvAccess(_)
            | BootEnvWrite(_)
            | BootEnvNotAllowed { .. }
            | NotAllowedUpdateState(_) => ErrorKind::State,

            FwInstallError { .. } | FwRollbackError { .. } | LoopDeviceQueryError(_) => {
                ErrorKind::External
            }

            VersionRead { .. } | VersionMismatch { .. } => ErrorKind::Versioning,
        }
    }
}

pub type Result<T> = std::result::Result<T, AduError>;
