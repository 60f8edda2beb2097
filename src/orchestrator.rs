//! C10: top-level API translating update outcomes into BootEnv writes,
//! plus the boot-time Bootstate reconciler. Grounded on `fsupdate.cpp`
//! and `handleUpdate.cpp` in the original source.

use std::path::Path;
use std::str::FromStr;

use crate::bootenv::BootEnv;
use crate::config::Config;
use crate::error::{AduError, Result};
use crate::extract::extract_tar_bz2;
use crate::fwinstall::{query_loop_devices, FwInstaller};
use crate::install::AppInstaller;
use crate::logging::Logger;
use crate::manifest::{verify_manifest, APPLICATION_IMAGE_NAME, FIRMWARE_IMAGE_NAME, MANIFEST_FILE_NAME};
use crate::signature::SignatureVerifier;
use crate::state::{classify, decode_in_flight, merge_update_field, BootstateFlag, SlotId, UpdateClass};
use crate::version::{read_current_version, Version};
use crate::wrapper::strip_wrapper;

const ALLOWED_UPDATE_VARIANTS: &[&str] = &["0000", "0001", "0011", "0010"];
const ALLOWED_BOOT_ORDER: &[&str] = &["A B", "B A"];
const ALLOWED_BOOT_LEFT: &[u8] = &[0, 1, 2, 3];

pub struct UpdateOrchestrator {
    config: Config,
    bootenv: BootEnv,
    logger: Logger,
}

impl UpdateOrchestrator {
    pub fn new(config: Config, bootenv: BootEnv, logger: Logger) -> Self {
        Self {
            config,
            bootenv,
            logger,
        }
    }

    fn cert_verifier(&self) -> Result<SignatureVerifier> {
        let cert_path = crate::signature::resolve_cert_path(
            &self.config.rauc_system_conf,
            &self.config.rauc_cert_dir,
        )?;
        SignatureVerifier::load(&cert_path)
    }

    /// Stages the post-failure bootstate for `error`'s kind and
    /// flushes, then returns the original error. The orchestrator's
    /// sole failure-path responsibility (§7).
    fn stage_failure_and_flush(&self, flag: BootstateFlag, error: AduError) -> AduError {
        self.bootenv.stage("update_reboot_state", flag.to_string());
        if let Err(flush_err) = self.bootenv.flush() {
            self.logger.error(
                "orchestrator",
                format!("stage_failure_and_flush: flush itself failed: {flush_err}"),
            );
        }
        error
    }

    /// Installs firmware only.
    pub fn update_firmware(&self, path: &Path) -> Result<()> {
        let installer = FwInstaller::new(&self.bootenv, &self.logger);
        match installer.install(path) {
            Ok(()) => {
                let existing = self.bootenv.get("update").unwrap_or_else(|_| "0000".into());
                self.bootenv.stage(
                    "update_reboot_state",
                    BootstateFlag::IncompleteFw.to_string(),
                );
                self.bootenv
                    .stage("update", merge_update_field(&existing, true, false));
                self.bootenv.flush()?;
                Ok(())
            }
            Err(e) => Err(self.stage_failure_and_flush(BootstateFlag::FailedFw, e)),
        }
    }

    /// Installs the application only. On failure stages `FailedApp` —
    /// the corrected mapping; the original stages `FailedFw` here (see
    /// design notes).
    pub fn update_application(&self, path: &Path) -> Result<()> {
        let verifier = self.cert_verifier()?;
        let installer = AppInstaller::new(&self.config, &self.bootenv, &self.logger);
        match installer.install(path, &verifier) {
            Ok(_new_slot) => {
                let existing = self.bootenv.get("update").unwrap_or_else(|_| "0000".into());
                self.bootenv.stage(
                    "update_reboot_state",
                    BootstateFlag::IncompleteApp.to_string(),
                );
                self.bootenv
                    .stage("update", merge_update_field(&existing, false, true));
                self.bootenv.flush()?;
                Ok(())
            }
            Err(e) => Err(self.stage_failure_and_flush(BootstateFlag::FailedApp, e)),
        }
    }

    /// Installs application then firmware. On full success stages
    /// `IncompleteApp`, a quirk kept verbatim from the original's final
    /// write (see design notes).
    pub fn update_firmware_and_application(&self, fw_path: &Path, app_path: &Path) -> Result<()> {
        let verifier = self.cert_verifier()?;
        let app_installer = AppInstaller::new(&self.config, &self.bootenv, &self.logger);

        let existing = self.bootenv.get("update").unwrap_or_else(|_| "0000".into());

        let app_result = app_installer.install(app_path, &verifier);
        let app_ok = match app_result {
            Ok(_) => true,
            Err(e) => {
                return Err(self.stage_failure_and_flush(BootstateFlag::FailedApp, e));
            }
        };

        let fw_installer = FwInstaller::new(&self.bootenv, &self.logger);
        match fw_installer.install(fw_path) {
            Ok(()) => {
                self.bootenv.stage(
                    "update_reboot_state",
                    BootstateFlag::IncompleteApp.to_string(),
                );
                self.bootenv
                    .stage("update", merge_update_field(&existing, app_ok, true));
                self.bootenv.flush()?;
                Ok(())
            }
            Err(e) => Err(self.stage_failure_and_flush(BootstateFlag::FailedFw, e)),
        }
    }

    /// Unwraps a combined update archive and dispatches to the
    /// installers it names. Runs strip-wrapper → extract → manifest
    /// verification → firmware/application install, using
    /// `Config::update_workdir` as the extraction sandbox (§2 data
    /// flow). Returns whether an install was dispatched.
    pub fn install_update_archive(&self, archive_path: &Path) -> Result<bool> {
        let workdir = &self.config.update_workdir;
        if workdir.exists() {
            std::fs::remove_dir_all(workdir).map_err(|source| AduError::WriteError {
                path: workdir.clone(),
                source,
            })?;
        }

        let reader = strip_wrapper(archive_path)?;
        let mut archive = reader.into_inner();
        extract_tar_bz2(&mut archive, workdir)?;

        let manifest_path = workdir.join(MANIFEST_FILE_NAME);
        let manifest_json =
            std::fs::read_to_string(&manifest_path).map_err(|source| AduError::ReadError {
                path: manifest_path.clone(),
                source,
            })?;
        let manifest = verify_manifest(&manifest_json, workdir)?;

        let fw_path = workdir.join(FIRMWARE_IMAGE_NAME);
        let app_path = workdir.join(APPLICATION_IMAGE_NAME);

        match (manifest.firmware_available, manifest.application_available) {
            (true, true) => {
                self.update_firmware_and_application(&fw_path, &app_path)?;
                Ok(true)
            }
            (true, false) => {
                self.update_firmware(&fw_path)?;
                Ok(true)
            }
            (false, true) => {
                self.update_application(&app_path)?;
                Ok(true)
            }
            (false, false) => Err(AduError::BadFormat(format!(
                "manifest {} referenced no supported images",
                manifest_path.display()
            ))),
        }
    }

    pub fn rollback_application(&self) -> Result<()> {
        let current = self
            .bootenv
            .get_one_of_char("application", &['A', 'B'])
            .and_then(SlotId::from_char)?;
        self.bootenv
            .stage("application", current.other().to_char().to_string());
        self.bootenv.flush()
    }

    pub fn rollback_firmware(&self) -> Result<()> {
        let installer = FwInstaller::new(&self.bootenv, &self.logger);
        installer.rollback()
    }

    /// Reads the current version, classifies it against the `update`
    /// field, and either performs an install, stages `NoUpdate`, or
    /// defers to `commit_update`.
    pub fn automatic_update_application(&self, path: &Path, dest_version: Version) -> Result<bool> {
        self.automatic_update(path, dest_version, UpdateKind::Application)
    }

    pub fn automatic_update_firmware(&self, path: &Path, dest_version: Version) -> Result<bool> {
        self.automatic_update(path, dest_version, UpdateKind::Firmware)
    }

    fn automatic_update(&self, path: &Path, dest_version: Version, kind: UpdateKind) -> Result<bool> {
        let version_file = match kind {
            UpdateKind::Firmware => &self.config.fw_version_file,
            UpdateKind::Application => &self.config.app_version_file,
        };
        let current = read_current_version(version_file, self.config.version_type)?;

        let update_field = self.bootenv.get("update").unwrap_or_else(|_| "0000".into());
        let position = match kind {
            UpdateKind::Firmware => update_field.as_bytes().get(2).copied().unwrap_or(b'0') as char,
            UpdateKind::Application => {
                update_field.as_bytes().get(3).copied().unwrap_or(b'0') as char
            }
        };
        let reboot_state = self
            .bootenv
            .get("update_reboot_state")
            .ok()
            .and_then(|s| BootstateFlag::from_str(&s).ok())
            .unwrap_or(BootstateFlag::NoUpdate);

        match classify(position, reboot_state) {
            UpdateClass::AfterClean | UpdateClass::AfterFailure => {
                if dest_version.is_newer_than(&current) {
                    match kind {
                        UpdateKind::Firmware => self.update_firmware(path)?,
                        UpdateKind::Application => self.update_application(path)?,
                    }
                    Ok(true)
                } else {
                    self.bootenv
                        .stage("update_reboot_state", BootstateFlag::NoUpdate.to_string());
                    self.bootenv.flush()?;
                    Ok(false)
                }
            }
            UpdateClass::Pending => self.commit_update(),
        }
    }

    /// Runs the boot-time Bootstate reconciler and returns whether
    /// anything was committed.
    pub fn commit_update(&self) -> Result<bool> {
        reconcile(&self.bootenv, &self.logger)
    }
}

enum UpdateKind {
    Firmware,
    Application,
}

/// Closes out an in-flight update observed in the bootloader
/// environment. A free function (not a method cycling back through
/// `UpdateOrchestrator`) per the design note breaking the source's
/// `Orchestrator -> Bootstate -> Orchestrator` cycle.
pub fn reconcile(bootenv: &BootEnv, logger: &Logger) -> Result<bool> {
    let update = match bootenv.get_one_of_str("update", ALLOWED_UPDATE_VARIANTS) {
        Ok(v) => v,
        Err(_) => return Ok(false),
    };
    let in_flight = decode_in_flight(&update);
    let mut chars: Vec<char> = update.chars().collect();
    let mut committed = false;

    if in_flight.fw {
        if let Some(new_committed) = reconcile_firmware(bootenv, logger, &mut chars)? {
            committed = committed || new_committed;
        }
    }

    if in_flight.app {
        if let Some(new_committed) = reconcile_application(bootenv, logger, &mut chars)? {
            committed = committed || new_committed;
        }
    }

    if committed {
        let new_update: String = chars.into_iter().collect();
        bootenv.stage("update", new_update);
        bootenv.flush()?;
    }

    Ok(committed)
}

fn reconcile_firmware(bootenv: &BootEnv, logger: &Logger, chars: &mut [char]) -> Result<Option<bool>> {
    let boot_order = bootenv.get_one_of_str("BOOT_ORDER", ALLOWED_BOOT_ORDER)?;
    let boot_order_old = bootenv.get_one_of_str("BOOT_ORDER_OLD", ALLOWED_BOOT_ORDER)?;
    let rauc_cmd = bootenv.get("rauc_cmd")?;
    let current_slot = rauc_cmd
        .split('=')
        .nth(1)
        .map(|s| s.trim().chars().next().unwrap_or('A'))
        .unwrap_or('A');
    let reboot_state_raw = bootenv.get("update_reboot_state")?;
    let reboot_state = BootstateFlag::from_str(&reboot_state_raw)?;

    let tries_a = bootenv.get_one_of_u8("BOOT_A_LEFT", ALLOWED_BOOT_LEFT)?;
    let tries_b = bootenv.get_one_of_u8("BOOT_B_LEFT", ALLOWED_BOOT_LEFT)?;

    let boot_order_first = boot_order.chars().next().unwrap_or('A');
    let attempted_slot_exhausted = match boot_order_first {
        'A' => tries_a == 0,
        _ => tries_b == 0,
    };

    // Per the design note's resolution of the reconciler's
    // self-contradictory predicate: "state is IncompleteFw AND
    // attempt-history indicates the reboot failed" — the bootloader
    // never made it onto the slot BOOT_ORDER prioritizes, either
    // because it's booted on the other slot already or because that
    // slot's attempt counter ran out.
    let attempt_history_indicates_failure = matches!(reboot_state, BootstateFlag::IncompleteFw)
        && (current_slot != boot_order_first || attempted_slot_exhausted);

    if attempt_history_indicates_failure {
        chars[2] = '0';
        bootenv.stage("BOOT_ORDER", boot_order_old);
        bootenv.stage(
            "update_reboot_state",
            BootstateFlag::NoUpdate.to_string(),
        );
        logger.info("reconciler", "firmware update reconciled as failed reboot");
        return Ok(Some(true));
    }

    Ok(Some(false))
}

fn reconcile_application(bootenv: &BootEnv, logger: &Logger, chars: &mut [char]) -> Result<Option<bool>> {
    let application = bootenv.get_one_of_char("application", &['A', 'B'])?;
    let mounted = match query_loop_devices() {
        Ok(output) => output,
        Err(e) => {
            logger.error("reconciler", format!("loop device query failed: {e}"));
            return Err(e);
        }
    };

    let matches = (mounted.contains("app_a.squashfs") && application == 'A')
        || (mounted.contains("app_b.squashfs") && application == 'B');

    if matches {
        chars[3] = '0';
        bootenv.stage(
            "update_reboot_state",
            BootstateFlag::NoUpdate.to_string(),
        );
        logger.info("reconciler", "application update reconciled as booted");
        return Ok(Some(true));
    }

    Ok(Some(false))
}
