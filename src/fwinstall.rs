//! C9: thin wrapper over the external firmware-install backend
//! (RAUC-style CLI). Grounded on `rauc_handler.{h,cpp}` and
//! `updateFirmware.{h,cpp}` in the original source.

use std::path::Path;
use std::process::Command;

use serde::Deserialize;

use crate::bootenv::BootEnv;
use crate::error::{AduError, Result};
use crate::logging::Logger;

const RAUC_BIN: &str = "rauc";

#[derive(Debug, Deserialize)]
pub struct SlotStatusEntry {
    pub bootname: String,
    pub boot_status: String,
}

#[derive(Debug, Deserialize)]
pub struct RaucStatus {
    pub booted: String,
    pub slots: Vec<std::collections::HashMap<String, SlotStatusEntry>>,
}

fn run(args: &[&str]) -> Result<(bool, String, String)> {
    let output = Command::new(RAUC_BIN)
        .args(args)
        .output()
        .map_err(|e| AduError::FwInstallError {
            stderr: format!("could not spawn {RAUC_BIN}: {e}"),
        })?;
    Ok((
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// Invokes the external firmware-install backend's CLI subcommands.
pub struct FwInstaller<'a> {
    bootenv: &'a BootEnv,
    logger: &'a Logger,
}

impl<'a> FwInstaller<'a> {
    pub fn new(bootenv: &'a BootEnv, logger: &'a Logger) -> Self {
        Self { bootenv, logger }
    }

    pub fn install(&self, path_to_bundle: &Path) -> Result<()> {
        let (ok, _stdout, stderr) = run(&["install", &path_to_bundle.to_string_lossy()])?;
        if !ok {
            return Err(AduError::FwInstallError { stderr });
        }

        let (sync_ok, _, sync_stderr) = run_sync()?;
        if !sync_ok {
            return Err(AduError::FwInstallError {
                stderr: format!("sync after install failed: {sync_stderr}"),
            });
        }
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        let (ok, _, stderr) = run(&["status", "--output-format=json", "mark-active", "other"])?;
        if !ok {
            return Err(AduError::FwRollbackError { stderr });
        }
        let (ok, _, stderr) = run(&["status", "--output-format=json", "mark-good", "other"])?;
        if !ok {
            return Err(AduError::FwRollbackError { stderr });
        }
        Ok(())
    }

    /// Marks the currently booted slot good and, if `BOOT_ORDER` has
    /// drifted from `BOOT_ORDER_OLD`, rewrites it to match.
    pub fn mark_good(&self) -> Result<()> {
        let (ok, _, stderr) = run(&["status", "--output-format=json", "mark-good"])?;
        if !ok {
            return Err(AduError::FwRollbackError { stderr });
        }

        let boot_order = self.bootenv.get("BOOT_ORDER")?;
        let boot_order_old = self.bootenv.get("BOOT_ORDER_OLD")?;
        if boot_order != boot_order_old {
            self.logger.debug(
                "firmware_update",
                format!("mark_good: rewriting BOOT_ORDER_OLD to {boot_order}"),
            );
            self.bootenv.stage("BOOT_ORDER", boot_order);
        }
        Ok(())
    }

    pub fn status(&self) -> Result<RaucStatus> {
        let (ok, stdout, stderr) = run(&["status", "--output-format=json"])?;
        if !ok {
            return Err(AduError::FwInstallError { stderr });
        }
        serde_json::from_str(&stdout).map_err(|e| AduError::FwInstallError {
            stderr: format!("could not parse rauc status json: {e}"),
        })
    }
}

fn run_sync() -> Result<(bool, String, String)> {
    let output = Command::new("sync")
        .output()
        .map_err(|e| AduError::FwInstallError {
            stderr: format!("could not spawn sync: {e}"),
        })?;
    Ok((
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// Queries currently mounted loop devices (the reconciler's
/// `losetup -a`-equivalent) and reports the raw output for the caller
/// to scan for `app_a.squashfs` / `app_b.squashfs`.
pub fn query_loop_devices() -> Result<String> {
    let output = Command::new("losetup")
        .arg("-a")
        .output()
        .map_err(|e| AduError::LoopDeviceQueryError(e.to_string()))?;
    if !output.status.success() {
        return Err(AduError::LoopDeviceQueryError(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rauc_status_json_parses() {
        let json = r#"{"booted":"A","slots":[{"rootfs.0":{"bootname":"A","boot_status":"good"}}]}"#;
        let status: RaucStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.booted, "A");
        assert_eq!(status.slots[0]["rootfs.0"].boot_status, "good");
    }
}
