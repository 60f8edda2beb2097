//! C8: atomic "install application" sequence — verify, copy to temp,
//! fsync, rename, flip slot variable. Grounded on
//! `updateApplication::install` in the original source; step ordering
//! is a hard contract per the concurrency model.

use std::path::Path;

use crate::bootenv::BootEnv;
use crate::bundle::AppBundle;
use crate::config::Config;
use crate::error::{AduError, Result};
use crate::logging::Logger;
use crate::signature::SignatureVerifier;
use crate::state::SlotId;

pub struct AppInstaller<'a> {
    config: &'a Config,
    bootenv: &'a BootEnv,
    logger: &'a Logger,
}

impl<'a> AppInstaller<'a> {
    pub fn new(config: &'a Config, bootenv: &'a BootEnv, logger: &'a Logger) -> Self {
        Self {
            config,
            bootenv,
            logger,
        }
    }

    /// Runs `Verify → CopyToTmp → FsyncTmp → Rename → FlipSlotVar`
    /// against `path_to_bundle`, staging the new `application` slot on
    /// success. Returns the slot that is now staged active.
    pub fn install(&self, path_to_bundle: &Path, verifier: &SignatureVerifier) -> Result<SlotId> {
        let current = self
            .bootenv
            .get_one_of_char("application", &['A', 'B'])
            .and_then(SlotId::from_char)?;
        let target_slot = current.other();
        let target_path = self.config.app_slot_path(target_slot);

        self.logger.debug(
            "app_update",
            format!("install: current app {current:?}, target {target_slot:?}"),
        );

        let mut bundle = AppBundle::open(path_to_bundle)?;
        if !verifier.verify(&mut bundle)? {
            return Err(AduError::SignatureMismatch(path_to_bundle.to_owned()));
        }

        let tmp_path = self.config.tmp_app_path();
        let _ = std::fs::remove_file(&tmp_path);
        bundle.copy_payload_to(&tmp_path)?;

        std::fs::rename(&tmp_path, &target_path).map_err(|source| AduError::RenameError {
            from: tmp_path,
            to: target_path,
            source,
        })?;

        self.bootenv.stage("application", target_slot.to_char().to_string());
        Ok(target_slot)
    }
}
