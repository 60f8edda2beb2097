//! C2: pure encode/decode of the bootstate flag and the 4-char `update`
//! field. Grounded on `update_definitions.{h,cpp}` and
//! `allowed_uboot_variable_states.h` in the original source.

use std::fmt;
use std::str::FromStr;

use crate::error::{AduError, Result};

/// Persisted as a decimal string "0".."12" in the `update_reboot_state`
/// bootloader variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstateFlag {
    NoUpdate,
    FwRebootFailed,
    IncompleteFw,
    IncompleteApp,
    IncompleteBoth,
    FailedFw,
    FailedApp,
    RollbackFwPending,
    RollbackAppPending,
    RollbackBothPending,
    IncompleteFwRollback,
    IncompleteAppRollback,
    IncompleteBothRollback,
}

impl BootstateFlag {
    pub fn to_code(self) -> u8 {
        match self {
            BootstateFlag::NoUpdate => 0,
            BootstateFlag::FwRebootFailed => 1,
            BootstateFlag::IncompleteFw => 2,
            BootstateFlag::IncompleteApp => 3,
            BootstateFlag::IncompleteBoth => 4,
            BootstateFlag::FailedFw => 5,
            BootstateFlag::FailedApp => 6,
            BootstateFlag::RollbackFwPending => 7,
            BootstateFlag::RollbackAppPending => 8,
            BootstateFlag::RollbackBothPending => 9,
            BootstateFlag::IncompleteFwRollback => 10,
            BootstateFlag::IncompleteAppRollback => 11,
            BootstateFlag::IncompleteBothRollback => 12,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => BootstateFlag::NoUpdate,
            1 => BootstateFlag::FwRebootFailed,
            2 => BootstateFlag::IncompleteFw,
            3 => BootstateFlag::IncompleteApp,
            4 => BootstateFlag::IncompleteBoth,
            5 => BootstateFlag::FailedFw,
            6 => BootstateFlag::FailedApp,
            7 => BootstateFlag::RollbackFwPending,
            8 => BootstateFlag::RollbackAppPending,
            9 => BootstateFlag::RollbackBothPending,
            10 => BootstateFlag::IncompleteFwRollback,
            11 => BootstateFlag::IncompleteAppRollback,
            12 => BootstateFlag::IncompleteBothRollback,
            _ => return None,
        })
    }

}

impl fmt::Display for BootstateFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_code())
    }
}

impl FromStr for BootstateFlag {
    type Err = AduError;

    fn from_str(s: &str) -> Result<Self> {
        let code: u8 = s
            .parse()
            .map_err(|_| AduError::NotAllowedUpdateState(s.to_owned()))?;
        Self::from_code(code).ok_or_else(|| AduError::NotAllowedUpdateState(s.to_owned()))
    }
}

/// `application` / firmware slot selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotId {
    A,
    B,
}

impl SlotId {
    pub fn other(self) -> Self {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::A,
        }
    }

    pub fn from_char(c: char) -> Result<Self> {
        match c {
            'A' => Ok(SlotId::A),
            'B' => Ok(SlotId::B),
            _ => Err(AduError::BootEnvNotAllowed {
                name: "application".into(),
                value: c.to_string(),
            }),
        }
    }

    pub fn to_char(self) -> char {
        match self {
            SlotId::A => 'A',
            SlotId::B => 'B',
        }
    }
}

/// The 4-character `update` field: positions 0,1 are reserved and
/// preserved verbatim, position 2 is "fw changed in flight", position 3
/// is "app changed in flight".
pub fn merge_update_field(existing: &str, fw_changed: bool, app_changed: bool) -> String {
    let mut chars: Vec<char> = if existing.len() == 4 {
        existing.chars().collect()
    } else {
        "0000".chars().collect()
    };
    chars[2] = if fw_changed { '1' } else { '0' };
    chars[3] = if app_changed { '1' } else { '0' };
    chars.into_iter().collect()
}

/// Decodes the set of in-flight changes encoded in `update`'s positions
/// 2 and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InFlight {
    pub fw: bool,
    pub app: bool,
}

pub fn decode_in_flight(update: &str) -> InFlight {
    let bytes = update.as_bytes();
    InFlight {
        fw: bytes.get(2) == Some(&b'1'),
        app: bytes.get(3) == Some(&b'1'),
    }
}

/// Decision table used by the `automatic_update_*` paths (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateClass {
    AfterClean,
    AfterFailure,
    Pending,
}

pub fn classify(existing_field_bit: char, current_flag: BootstateFlag) -> UpdateClass {
    if existing_field_bit == '0' && matches!(current_flag, BootstateFlag::NoUpdate) {
        return UpdateClass::AfterClean;
    }
    if existing_field_bit == '1'
        && matches!(
            current_flag,
            BootstateFlag::FailedFw | BootstateFlag::FailedApp | BootstateFlag::FwRebootFailed
        )
    {
        return UpdateClass::AfterFailure;
    }
    UpdateClass::Pending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstate_round_trips() {
        for n in 0..=12u8 {
            let flag = BootstateFlag::from_code(n).unwrap();
            assert_eq!(flag.to_code(), n);
            assert_eq!(BootstateFlag::from_str(&n.to_string()).unwrap().to_code(), n);
        }
        assert!(BootstateFlag::from_code(13).is_none());
        assert!(BootstateFlag::from_str("13").is_err());
        assert!(BootstateFlag::from_str("not-a-number").is_err());
    }

    #[test]
    fn merge_preserves_reserved_positions_and_sets_flags() {
        let merged = merge_update_field("X100", true, false);
        assert_eq!(merged.len(), 4);
        assert_eq!(&merged[0..2], "X1");
        assert_eq!(&merged[2..3], "1");
        assert_eq!(&merged[3..4], "0");

        let merged = merge_update_field("notfour", false, true);
        assert_eq!(merged, "0001");
    }

    #[test]
    fn decode_in_flight_reads_positions_2_and_3() {
        assert_eq!(decode_in_flight("0011"), InFlight { fw: true, app: true });
        assert_eq!(decode_in_flight("0000"), InFlight::default());
        assert_eq!(decode_in_flight("0010"), InFlight { fw: true, app: false });
    }

    #[test]
    fn classify_matches_decision_table() {
        assert_eq!(classify('0', BootstateFlag::NoUpdate), UpdateClass::AfterClean);
        assert_eq!(classify('1', BootstateFlag::FailedFw), UpdateClass::AfterFailure);
        assert_eq!(classify('1', BootstateFlag::FailedApp), UpdateClass::AfterFailure);
        assert_eq!(classify('1', BootstateFlag::FwRebootFailed), UpdateClass::AfterFailure);
        assert_eq!(classify('1', BootstateFlag::NoUpdate), UpdateClass::Pending);
        assert_eq!(classify('0', BootstateFlag::IncompleteFw), UpdateClass::Pending);
    }

    #[test]
    fn slot_other_flips() {
        assert_eq!(SlotId::A.other(), SlotId::B);
        assert_eq!(SlotId::B.other(), SlotId::A);
        assert_eq!(SlotId::from_char('A').unwrap(), SlotId::A);
        assert!(SlotId::from_char('C').is_err());
    }
}
