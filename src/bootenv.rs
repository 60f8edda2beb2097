//! C1: thread-safe typed accessor over the persisted bootloader
//! key/value environment. Grounded on `UBoot.h`/`UBoot.cpp` in the
//! original source: a staged-write buffer, a single `flush`, and an
//! internal mutex serializing get/flush within the process.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{AduError, Result};
use crate::logging::Logger;

/// Parses a u8 the way the original `getVariable<uint8_t>` does:
/// unsigned decimal, at most 255.
pub fn parse_u8(value: &str) -> Option<u8> {
    value.parse::<u8>().ok()
}

/// Parses a single ASCII char the way the original `getVariable<char>`
/// does: the string must have length exactly 1.
pub fn parse_char(value: &str) -> Option<char> {
    let mut chars = value.chars();
    let c = chars.next()?;
    if chars.next().is_none() {
        Some(c)
    } else {
        None
    }
}

struct Inner {
    /// Path to the backing key=value store (in production, the file
    /// `fw_env.config` points at; here we treat that indirection as
    /// already resolved by the caller's `Config`).
    store_path: PathBuf,
    staged: BTreeMap<String, String>,
}

/// Typed accessor over the bootloader environment.
#[derive(Clone)]
pub struct BootEnv {
    inner: std::sync::Arc<Mutex<Inner>>,
    logger: Logger,
}

impl BootEnv {
    pub fn new(store_path: impl Into<PathBuf>, logger: Logger) -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(Inner {
                store_path: store_path.into(),
                staged: BTreeMap::new(),
            })),
            logger,
        }
    }

    fn read_store(path: &Path) -> Result<BTreeMap<String, String>> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(AduError::ReadError {
                    path: path.to_owned(),
                    source,
                })
            }
        };
        let mut map = BTreeMap::new();
        for line in contents.lines() {
            if let Some((key, value)) = line.split_once('=') {
                map.insert(key.to_owned(), value.to_owned());
            }
        }
        Ok(map)
    }

    /// `get(name)`: opens the environment, reads, closes.
    pub fn get(&self, name: &str) -> Result<String> {
        let inner = self.inner.lock().unwrap();
        let store = Self::read_store(&inner.store_path)?;
        store
            .get(name)
            .cloned()
            .ok_or_else(|| AduError::BootEnvAccess(name.to_owned()))
    }

    /// `get_one_of` for string-valued variables.
    pub fn get_one_of_str(&self, name: &str, allowed: &[&str]) -> Result<String> {
        let value = self.get(name)?;
        if allowed.contains(&value.as_str()) {
            Ok(value)
        } else {
            Err(AduError::BootEnvNotAllowed {
                name: name.to_owned(),
                value,
            })
        }
    }

    /// `get_one_of` for `u8`-valued variables.
    pub fn get_one_of_u8(&self, name: &str, allowed: &[u8]) -> Result<u8> {
        let value = self.get(name)?;
        let parsed = parse_u8(&value).ok_or_else(|| AduError::BootEnvNotAllowed {
            name: name.to_owned(),
            value: value.clone(),
        })?;
        if allowed.contains(&parsed) {
            Ok(parsed)
        } else {
            Err(AduError::BootEnvNotAllowed {
                name: name.to_owned(),
                value,
            })
        }
    }

    /// `get_one_of` for single-character variables.
    pub fn get_one_of_char(&self, name: &str, allowed: &[char]) -> Result<char> {
        let value = self.get(name)?;
        let parsed = parse_char(&value).ok_or_else(|| AduError::BootEnvNotAllowed {
            name: name.to_owned(),
            value: value.clone(),
        })?;
        if allowed.contains(&parsed) {
            Ok(parsed)
        } else {
            Err(AduError::BootEnvNotAllowed {
                name: name.to_owned(),
                value,
            })
        }
    }

    /// Buffers a pending write; takes effect on the next `flush`.
    pub fn stage(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.staged.insert(key.into(), value.into());
    }

    /// Writes every staged pair, commits the store, and clears the
    /// staged map on success. The store file is replaced atomically
    /// (write to a sibling temp file, then rename) so a crash mid-flush
    /// never leaves a half-written store.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.staged.is_empty() {
            return Ok(());
        }
        let mut store = Self::read_store(&inner.store_path)?;
        for (k, v) in inner.staged.iter() {
            store.insert(k.clone(), v.clone());
        }

        let tmp_path = inner.store_path.with_extension("tmp");
        let write_result = (|| -> Result<()> {
            let mut file = fs::File::create(&tmp_path).map_err(|source| AduError::WriteError {
                path: tmp_path.clone(),
                source,
            })?;
            for (k, v) in store.iter() {
                writeln!(file, "{k}={v}").map_err(|source| AduError::WriteError {
                    path: tmp_path.clone(),
                    source,
                })?;
            }
            file.sync_all().map_err(|source| AduError::SyncError {
                path: tmp_path.clone(),
                source,
            })?;
            fs::rename(&tmp_path, &inner.store_path).map_err(|source| AduError::RenameError {
                from: tmp_path.clone(),
                to: inner.store_path.clone(),
                source,
            })?;
            Ok(())
        })();

        match write_result {
            Ok(()) => {
                self.logger.debug(
                    "bootenv",
                    format!("flush: committed {} variables", inner.staged.len()),
                );
                inner.staged.clear();
                Ok(())
            }
            Err(e) => {
                self.logger
                    .error("bootenv", format!("flush: failed, batch abandoned: {e}"));
                Err(e)
            }
        }
    }
}
