//! Protocol-table validation.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::optimizer::MODCOD_TABLE;
use crate::types::{ModCod, SliceKind};

/// Maximum number of physical layer pipes in one channel.
pub const MAX_PLPS: usize = 64;

/// One physical layer pipe in a signaling table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlpEntry {
    pub id: u8,
    pub slice: SliceKind,
    pub modcod: ModCod,
    pub bandwidth_mhz: f64,
}

/// Validates PLP tables before they are handed to deployment.
pub trait ProtocolValidator: Send + Sync {
    /// Name of the implementation, for logs.
    fn name(&self) -> &'static str;

    fn validate_plp_table(&self, entries: &[PlpEntry], channel_bandwidth_mhz: f64) -> Result<()>;
}

/// Pure Rust validator used when no native protocol library is linked.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessValidator;

impl ProtocolValidator for InProcessValidator {
    fn name(&self) -> &'static str {
        "in-process"
    }

    fn validate_plp_table(&self, entries: &[PlpEntry], channel_bandwidth_mhz: f64) -> Result<()> {
        if entries.is_empty() {
            return Err(Error::ProtocolValidation("PLP table is empty".into()));
        }
        if entries.len() > MAX_PLPS {
            return Err(Error::ProtocolValidation(format!(
                "{} PLPs exceed the limit of {MAX_PLPS}",
                entries.len()
            )));
        }

        let mut seen = HashSet::with_capacity(entries.len());
        for entry in entries {
            if usize::from(entry.id) >= MAX_PLPS {
                return Err(Error::ProtocolValidation(format!("PLP id {} out of range", entry.id)));
            }
            if !seen.insert(entry.id) {
                return Err(Error::ProtocolValidation(format!("duplicate PLP id {}", entry.id)));
            }
            if !(entry.bandwidth_mhz.is_finite() && entry.bandwidth_mhz > 0.0) {
                return Err(Error::ProtocolValidation(format!(
                    "PLP {} has invalid bandwidth {}",
                    entry.id, entry.bandwidth_mhz
                )));
            }
            if !MODCOD_TABLE.iter().any(|op| op.modcod == entry.modcod) {
                return Err(Error::ProtocolValidation(format!(
                    "PLP {} uses unsupported modcod {}",
                    entry.id, entry.modcod
                )));
            }
        }

        let total: f64 = entries.iter().map(|e| e.bandwidth_mhz).sum();
        if total > channel_bandwidth_mhz + 1e-9 {
            return Err(Error::ProtocolValidation(format!(
                "PLPs use {total:.3} MHz of a {channel_bandwidth_mhz:.3} MHz channel"
            )));
        }

        Ok(())
    }
}

/// Validator used by the pipeline. No native bridge is compiled in, so this
/// is always the in-process implementation.
pub fn default_validator() -> Arc<dyn ProtocolValidator> {
    Arc::new(InProcessValidator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CodingRate, Modulation};

    fn entry(id: u8, modcod: ModCod, bandwidth_mhz: f64) -> PlpEntry {
        PlpEntry {
            id,
            slice: SliceKind::Coverage,
            modcod,
            bandwidth_mhz,
        }
    }

    const QPSK_HALF: ModCod = ModCod::new(Modulation::Qpsk, CodingRate::R1_2);

    #[test]
    fn test_valid_table() {
        let table = [entry(0, QPSK_HALF, 2.0), entry(1, QPSK_HALF, 4.0)];
        assert!(InProcessValidator.validate_plp_table(&table, 6.0).is_ok());
    }

    #[test]
    fn test_rejects_duplicates_and_overflow() {
        let v = InProcessValidator;
        let dup = [entry(3, QPSK_HALF, 1.0), entry(3, QPSK_HALF, 1.0)];
        assert!(v.validate_plp_table(&dup, 6.0).is_err());

        let wide = [entry(0, QPSK_HALF, 4.0), entry(1, QPSK_HALF, 4.0)];
        assert!(v.validate_plp_table(&wide, 6.0).is_err());

        assert!(v.validate_plp_table(&[], 6.0).is_err());
    }

    #[test]
    fn test_rejects_unsupported_modcod() {
        let odd = ModCod::new(Modulation::Qpsk, CodingRate::R5_6);
        let table = [entry(0, odd, 1.0)];
        assert!(matches!(
            InProcessValidator.validate_plp_table(&table, 6.0),
            Err(Error::ProtocolValidation(_))
        ));
    }
}
