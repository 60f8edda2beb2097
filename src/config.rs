//! Filesystem paths and version-type configuration (§6).
//!
//! The original source bakes these in as build-time constants (`#define
//! PATH_TO_...`, `#ifdef UPDATE_VERSION_TYPE_...`). We thread them through
//! a `Config` value instead, so tests can point every path at a temp
//! directory and a single binary can support either version discipline.

use std::path::{Path, PathBuf};

/// Selects which discipline governs `current_version()`/`dest_version`
/// comparisons, replacing the source's compile-time `#ifdef` switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionType {
    /// Free-form string, compared lexically.
    String,
    /// Decimal `u64`, version files must match `^[0-9]{8}$`.
    U64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub fw_env_config: PathBuf,
    pub rauc_system_conf: PathBuf,
    pub rauc_cert_dir: PathBuf,
    pub fw_version_file: PathBuf,
    pub app_version_file: PathBuf,
    pub app_slot_dir: PathBuf,
    pub update_workdir: PathBuf,
    pub version_type: VersionType,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fw_env_config: PathBuf::from("/etc/fw_env.config"),
            rauc_system_conf: PathBuf::from("/etc/rauc/system.conf"),
            rauc_cert_dir: PathBuf::from("/etc/rauc"),
            fw_version_file: PathBuf::from("/etc/fw_version"),
            app_version_file: PathBuf::from("/etc/app_version"),
            app_slot_dir: PathBuf::from("/rw_fs/root/application"),
            update_workdir: PathBuf::from("/tmp/adu/.update"),
            version_type: VersionType::U64,
        }
    }
}

impl Config {
    /// A config rooted entirely under `root`, for tests.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            fw_env_config: root.join("fw_env.config"),
            rauc_system_conf: root.join("rauc/system.conf"),
            rauc_cert_dir: root.join("rauc"),
            fw_version_file: root.join("fw_version"),
            app_version_file: root.join("app_version"),
            app_slot_dir: root.join("application"),
            update_workdir: root.join("update"),
            version_type: VersionType::U64,
        }
    }

    pub fn app_slot_path(&self, slot: crate::state::SlotId) -> PathBuf {
        match slot {
            crate::state::SlotId::A => self.app_slot_dir.join("app_a.squashfs"),
            crate::state::SlotId::B => self.app_slot_dir.join("app_b.squashfs"),
        }
    }

    pub fn tmp_app_path(&self) -> PathBuf {
        self.app_slot_dir.join("tmp.app")
    }
}
