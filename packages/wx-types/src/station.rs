//! Station family identification.
//!
//! The model code lives in a single nibble of station processor memory
//! (bank 0, address 0x4D). Everything else about a family — LOOP layout,
//! archive record size, memory map — keys off this enum.

use serde::{Deserialize, Serialize};

/// Station model codes as stored in the model nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StationFamily {
    WizardIII = 0,
    WizardII = 1,
    Monitor = 2,
    Perception = 3,
    GroWeather = 4,
    Energy = 5,
    Health = 6,
    /// Monitor/Wizard behind a first-generation link.
    OldLink = 0x0F,
}

impl StationFamily {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::WizardIII),
            1 => Some(Self::WizardII),
            2 => Some(Self::Monitor),
            3 => Some(Self::Perception),
            4 => Some(Self::GroWeather),
            5 => Some(Self::Energy),
            6 => Some(Self::Health),
            0x0F => Some(Self::OldLink),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::WizardIII => "Weather Wizard III",
            Self::WizardII => "Weather Wizard II",
            Self::Monitor => "Weather Monitor II",
            Self::Perception => "Perception II",
            Self::GroWeather => "GroWeather",
            Self::Energy => "Energy",
            Self::Health => "Health",
            Self::OldLink => "Old Link (Monitor/Wizard)",
        }
    }

    /// Families sharing the 15-byte Monitor/Wizard/Perception LOOP format.
    pub fn is_basic(self) -> bool {
        matches!(
            self,
            Self::WizardIII | Self::WizardII | Self::Monitor | Self::Perception | Self::OldLink
        )
    }

    /// Families using the GroWeather memory layout and link banks.
    pub fn is_gro_family(self) -> bool {
        matches!(self, Self::GroWeather | Self::Energy | Self::Health)
    }

    /// LOOP packet data size in bytes (excluding SOH and CRC).
    pub fn loop_data_size(self) -> usize {
        match self {
            Self::GroWeather => 33,
            Self::Energy => 27,
            Self::Health => 25,
            _ => 15,
        }
    }

    /// Archive record size in bytes.
    pub fn archive_record_size(self) -> usize {
        match self {
            Self::GroWeather | Self::Energy => 32,
            Self::Health => 30,
            _ => 21,
        }
    }
}

/// Link firmware revision. Rev E accepts CRC-extended commands and
/// answers CAN (0x18) on checksum failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkRevision {
    D,
    E,
}

impl LinkRevision {
    pub fn letter(self) -> &'static str {
        match self {
            Self::D => "D",
            Self::E => "E",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for code in [0u8, 1, 2, 3, 4, 5, 6, 0x0F] {
            let family = StationFamily::from_code(code).unwrap();
            assert_eq!(family.code(), code);
        }
        assert_eq!(StationFamily::from_code(7), None);
        assert_eq!(StationFamily::from_code(0xE), None);
    }

    #[test]
    fn loop_sizes_per_family() {
        assert_eq!(StationFamily::Monitor.loop_data_size(), 15);
        assert_eq!(StationFamily::OldLink.loop_data_size(), 15);
        assert_eq!(StationFamily::GroWeather.loop_data_size(), 33);
        assert_eq!(StationFamily::Energy.loop_data_size(), 27);
        assert_eq!(StationFamily::Health.loop_data_size(), 25);
    }

    #[test]
    fn archive_sizes_per_family() {
        assert_eq!(StationFamily::WizardIII.archive_record_size(), 21);
        assert_eq!(StationFamily::GroWeather.archive_record_size(), 32);
        assert_eq!(StationFamily::Energy.archive_record_size(), 32);
        assert_eq!(StationFamily::Health.archive_record_size(), 30);
    }
}
