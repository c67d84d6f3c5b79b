//! Region-of-interest words.
//!
//! RoI primitives wrap the packed hardware word; the top two bits identify
//! the word type and can never collide with sub-block boundary words
//! (which need both top bits set).

/// Marker in bits 31..30 of a CPM RoI word.
const CPM_ROI_MARKER: u32 = 0b10;
/// Marker in bits 31..30 of a JEM RoI word.
const JEM_ROI_MARKER: u32 = 0b01;
/// Marker in bits 31..30 of a CMM RoI word.
const CMM_ROI_MARKER: u32 = 0b00;

/// Cluster-processor RoI: one candidate location with its threshold hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CpmRoi(u32);

impl CpmRoi {
    pub fn new(crate_no: u8, module: u8, chip: u8, location: u8, error: bool, hits: u16) -> Self {
        let word = CPM_ROI_MARKER << 30
            | (u32::from(crate_no) & 0xf) << 26
            | (u32::from(module) & 0xf) << 22
            | (u32::from(chip) & 0x7) << 19
            | (u32::from(location) & 0x3) << 17
            | u32::from(error) << 16
            | u32::from(hits);
        Self(word)
    }

    /// Accepts a word only if it carries the CPM RoI marker.
    pub fn from_word(word: u32) -> Option<Self> {
        (word >> 30 == CPM_ROI_MARKER).then_some(Self(word))
    }

    pub fn word(self) -> u32 {
        self.0
    }

    pub fn crate_no(self) -> u8 {
        ((self.0 >> 26) & 0xf) as u8
    }

    pub fn module(self) -> u8 {
        ((self.0 >> 22) & 0xf) as u8
    }

    pub fn chip(self) -> u8 {
        ((self.0 >> 19) & 0x7) as u8
    }

    pub fn location(self) -> u8 {
        ((self.0 >> 17) & 0x3) as u8
    }

    pub fn error(self) -> bool {
        (self.0 >> 16) & 0x1 != 0
    }

    pub fn hits(self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

/// Jet/energy-processor RoI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct JemRoi(u32);

impl JemRoi {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        crate_no: u8,
        module: u8,
        frame: u8,
        location: u8,
        forward: bool,
        hits: u8,
        error: bool,
    ) -> Self {
        let word = JEM_ROI_MARKER << 30
            | (u32::from(crate_no) & 0xf) << 26
            | (u32::from(module) & 0xf) << 22
            | (u32::from(frame) & 0x7) << 19
            | (u32::from(location) & 0x3) << 17
            | u32::from(forward) << 16
            | u32::from(hits) << 8
            | u32::from(error) << 7;
        Self(word)
    }

    pub fn from_word(word: u32) -> Option<Self> {
        (word >> 30 == JEM_ROI_MARKER).then_some(Self(word))
    }

    pub fn word(self) -> u32 {
        self.0
    }

    pub fn crate_no(self) -> u8 {
        ((self.0 >> 26) & 0xf) as u8
    }

    pub fn module(self) -> u8 {
        ((self.0 >> 22) & 0xf) as u8
    }

    pub fn frame(self) -> u8 {
        ((self.0 >> 19) & 0x7) as u8
    }

    pub fn location(self) -> u8 {
        ((self.0 >> 17) & 0x3) as u8
    }

    pub fn forward(self) -> bool {
        (self.0 >> 16) & 0x1 != 0
    }

    pub fn hits(self) -> u8 {
        ((self.0 >> 8) & 0xff) as u8
    }

    pub fn error(self) -> bool {
        (self.0 >> 7) & 0x1 != 0
    }
}

/// CMM RoI word types, bits 29..27.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmmRoiWordType {
    JetEtHits = 0,
    SumEtHits = 1,
    MissingEtHits = 2,
    Ex = 3,
    Ey = 4,
}

/// Crate-level merger RoI: jet-ET, sum-ET and missing-ET hit maps plus the
/// Ex/Ey components, gathered from the five CMM RoI words of a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CmmRoi {
    pub crate_no: u8,
    /// Jet-ET threshold map (4 bits).
    pub jet_et_hits: u8,
    /// Sum-ET threshold map (4 bits).
    pub sum_et_hits: u8,
    /// Missing-ET threshold map (8 bits).
    pub missing_et_hits: u8,
    /// Energy components, sign-magnitude on the wire (15-bit magnitude).
    pub ex: i32,
    pub ey: i32,
    pub jet_et_error: bool,
    pub sum_et_error: bool,
    pub missing_et_error: bool,
    pub ex_error: bool,
    pub ey_error: bool,
}

impl CmmRoi {
    pub fn new(crate_no: u8) -> Self {
        Self {
            crate_no,
            ..Self::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        self.jet_et_hits == 0
            && self.sum_et_hits == 0
            && self.missing_et_hits == 0
            && self.ex == 0
            && self.ey == 0
            && !self.jet_et_error
            && !self.sum_et_error
            && !self.missing_et_error
            && !self.ex_error
            && !self.ey_error
    }

    /// Serialises the five RoI words in word-type order.
    pub fn to_words(&self) -> [u32; 5] {
        [
            cmm_word(CmmRoiWordType::JetEtHits, self.jet_et_error, u32::from(self.jet_et_hits)),
            cmm_word(CmmRoiWordType::SumEtHits, self.sum_et_error, u32::from(self.sum_et_hits)),
            cmm_word(
                CmmRoiWordType::MissingEtHits,
                self.missing_et_error,
                u32::from(self.missing_et_hits),
            ),
            cmm_word(CmmRoiWordType::Ex, self.ex_error, sign_magnitude(self.ex)),
            cmm_word(CmmRoiWordType::Ey, self.ey_error, sign_magnitude(self.ey)),
        ]
    }

    /// Folds one CMM RoI word into the primitive. Returns false for a word
    /// that is not a CMM RoI word.
    pub fn set_word(&mut self, word: u32) -> bool {
        if word >> 30 != CMM_ROI_MARKER {
            return false;
        }
        let error = (word >> 26) & 0x1 != 0;
        match (word >> 27) & 0x7 {
            0 => {
                self.jet_et_hits = (word & 0xf) as u8;
                self.jet_et_error = error;
            }
            1 => {
                self.sum_et_hits = (word & 0xf) as u8;
                self.sum_et_error = error;
            }
            2 => {
                self.missing_et_hits = (word & 0xff) as u8;
                self.missing_et_error = error;
            }
            3 => {
                self.ex = from_sign_magnitude(word);
                self.ex_error = error;
            }
            4 => {
                self.ey = from_sign_magnitude(word);
                self.ey_error = error;
            }
            _ => return false,
        }
        true
    }
}

fn cmm_word(word_type: CmmRoiWordType, error: bool, payload: u32) -> u32 {
    CMM_ROI_MARKER << 30 | (word_type as u32) << 27 | u32::from(error) << 26 | payload
}

fn sign_magnitude(value: i32) -> u32 {
    let sign = u32::from(value < 0);
    sign << 15 | (value.unsigned_abs() & 0x7fff)
}

fn from_sign_magnitude(word: u32) -> i32 {
    let magnitude = (word & 0x7fff) as i32;
    if (word >> 15) & 0x1 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpm_roi_roundtrip() {
        let roi = CpmRoi::new(3, 9, 5, 1, true, 0xbeef);
        let back = CpmRoi::from_word(roi.word()).unwrap();
        assert_eq!(back.crate_no(), 3);
        assert_eq!(back.module(), 9);
        assert_eq!(back.chip(), 5);
        assert_eq!(back.location(), 1);
        assert!(back.error());
        assert_eq!(back.hits(), 0xbeef);
    }

    #[test]
    fn test_jem_roi_roundtrip() {
        let roi = JemRoi::new(1, 12, 6, 2, true, 0xa5, false);
        let back = JemRoi::from_word(roi.word()).unwrap();
        assert_eq!(back.crate_no(), 1);
        assert_eq!(back.module(), 12);
        assert_eq!(back.frame(), 6);
        assert_eq!(back.location(), 2);
        assert!(back.forward());
        assert_eq!(back.hits(), 0xa5);
        assert!(!back.error());
    }

    #[test]
    fn test_roi_markers_disjoint() {
        assert!(CpmRoi::from_word(JemRoi::new(0, 0, 0, 0, false, 1, false).word()).is_none());
        assert!(JemRoi::from_word(CpmRoi::new(0, 0, 0, 0, false, 1).word()).is_none());
    }

    #[test]
    fn test_cmm_roi_word_cycle() {
        let mut roi = CmmRoi::new(1);
        roi.jet_et_hits = 0xa;
        roi.missing_et_hits = 0x5c;
        roi.ex = -1234;
        roi.ey = 4095;
        roi.ey_error = true;

        let mut back = CmmRoi::new(1);
        for word in roi.to_words() {
            assert!(back.set_word(word));
        }
        assert_eq!(back, roi);
    }

    #[test]
    fn test_cmm_rejects_foreign_words() {
        let mut roi = CmmRoi::new(0);
        assert!(!roi.set_word(CpmRoi::new(0, 0, 0, 0, false, 0).word()));
    }
}
