//! Readout topology.
//!
//! How many crates a sub-detector has, how many modules sit in a crate,
//! how many channels a module serves and how many S-Links carry one
//! crate's data. Fragments are located by these numbers, never by fixed
//! offsets.

use crate::codecs::SubsystemKind;
use crate::config::CodecConfig;

/// Crate/module/S-Link topology for one sub-detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub crates: u8,
    /// Modules per crate.
    pub modules: u8,
    /// Channels per module.
    pub channels: u16,
    /// S-Links per crate; each carries `modules / slinks` modules.
    pub slinks: u8,
}

impl Topology {
    pub fn ppm() -> Self {
        Self {
            crates: 8,
            modules: 16,
            channels: 64,
            slinks: 4,
        }
    }

    pub fn cp() -> Self {
        Self {
            crates: 4,
            modules: 14,
            channels: 80,
            slinks: 2,
        }
    }

    pub fn cp_roi() -> Self {
        Self {
            slinks: 1,
            ..Self::cp()
        }
    }

    pub fn jep() -> Self {
        Self {
            crates: 2,
            modules: 16,
            channels: 44,
            slinks: 4,
        }
    }

    pub fn jep_roi() -> Self {
        Self {
            slinks: 1,
            ..Self::jep()
        }
    }

    /// The default topology for a subsystem, with any configured
    /// S-Link override applied.
    pub fn for_kind(kind: SubsystemKind, cfg: &CodecConfig) -> Self {
        let base = match kind {
            SubsystemKind::Ppm | SubsystemKind::RodHeader => Self::ppm(),
            SubsystemKind::Cp => Self::cp(),
            SubsystemKind::CpRoi => Self::cp_roi(),
            SubsystemKind::Jep => Self::jep(),
            SubsystemKind::JepRoi => Self::jep_roi(),
        };
        match cfg.slinks_per_crate {
            Some(slinks) => base.with_slinks(slinks),
            None => base,
        }
    }

    pub fn with_slinks(mut self, slinks: u8) -> Self {
        self.slinks = slinks.max(1);
        self
    }

    /// Modules carried by each S-Link.
    pub fn modules_per_slink(&self) -> usize {
        (usize::from(self.modules) / usize::from(self.slinks)).max(1)
    }

    /// Zero-based module indices carried by `slink`.
    pub fn slink_modules(&self, slink: u8) -> std::ops::Range<u8> {
        let per = self.modules_per_slink() as u8;
        let first = slink * per;
        first..(first + per).min(self.modules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modules_per_slink() {
        assert_eq!(Topology::ppm().modules_per_slink(), 4);
        assert_eq!(Topology::cp().modules_per_slink(), 7);
        assert_eq!(Topology::jep().modules_per_slink(), 4);
        assert_eq!(Topology::ppm().slink_modules(1), 4..8);
    }
}
