//! Sub-block layer shared by all L1Calo sub-detectors.
//!
//! A sub-block is one header word, a run of packed data words, and an
//! optional status trailer. Header-family words are recognised by their top
//! two bits, which data words are guaranteed never to set (16-bit datums in
//! the PPM uncompressed format, 31-bit streamed packing everywhere else).

use l1calo_words::WordWriter;

use crate::error::CodecError;

/// Header word id for PPM/CPM/JEM sub-blocks.
pub const WORD_ID_DATA: u8 = 0xc;
/// Header word id for CMM sub-blocks.
pub const WORD_ID_CMM: u8 = 0xe;
/// Sequence number marking a PPM error block.
pub const ERROR_MARKER: u8 = 63;

pub const FORMAT_NEUTRAL: u8 = 0;
pub const FORMAT_UNCOMPRESSED: u8 = 1;
pub const FORMAT_COMPRESSED: u8 = 2;

const HEADER_BIT: u32 = 30;
const HEADER_MASK: u32 = 0x3;
const HEADER_VAL: u32 = 0x3;
const STATUS_BIT: u32 = 28;

const WORD_ID_BIT: u32 = 28;
const VERSION_BIT: u32 = 25;
const FORMAT_BIT: u32 = 22;
const SEQNO_BIT: u32 = 16;
const CRATE_BIT: u32 = 12;
const MODULE_BIT: u32 = 8;
const SLICES_FADC_BIT: u32 = 4;
const SLICES_LUT_BIT: u32 = 0;
const WORD_ID_MASK: u32 = 0xf;
const VERSION_MASK: u32 = 0x7;
const FORMAT_MASK: u32 = 0x7;
const SEQNO_MASK: u32 = 0x3f;
const CRATE_MASK: u32 = 0xf;
const MODULE_MASK: u32 = 0xf;
const SLICES_MASK: u32 = 0xf;

const FAILING_BCN_BIT: u32 = 22;
const FAILING_BCN_MASK: u32 = 0x3f;
const GLINK_TIMEOUT_BIT: u32 = 7;
const GLINK_DOWN_BIT: u32 = 6;
const DAQ_OVERFLOW_BIT: u32 = 3;
const BCN_MISMATCH_BIT: u32 = 2;
const GLINK_PROTOCOL_BIT: u32 = 1;
const GLINK_PARITY_BIT: u32 = 0;

// CMM sub-blocks reuse the module nibble.
const CMM_SUMMING_BIT: u32 = 3;
const CMM_FIRMWARE_BIT: u32 = 1;
const CMM_FIRMWARE_MASK: u32 = 0x3;
const CMM_POSITION_BIT: u32 = 0;

/// Classification of a payload word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubBlockWordType {
    DataHeader,
    ErrorHeader,
    StatusTrailer,
    Data,
}

/// Classifies one payload word.
pub fn word_type(word: u32) -> SubBlockWordType {
    if (word >> HEADER_BIT) & HEADER_MASK != HEADER_VAL {
        return SubBlockWordType::Data;
    }
    if (word >> STATUS_BIT) & 0x1 != 0 {
        SubBlockWordType::StatusTrailer
    } else if (word >> SEQNO_BIT) & SEQNO_MASK == u32::from(ERROR_MARKER) {
        SubBlockWordType::ErrorHeader
    } else {
        SubBlockWordType::DataHeader
    }
}

/// CMM firmware codes, carried in the module nibble of a CMM header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmmFirmware {
    Cp = 1,
    Jet = 2,
    Energy = 3,
}

/// Unpacked sub-block header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubBlockHeader {
    pub word_id: u8,
    pub version: u8,
    pub format: u8,
    pub seqno: u8,
    pub crate_no: u8,
    pub module: u8,
    pub slices_fadc: u8,
    pub slices_lut: u8,
}

impl SubBlockHeader {
    pub fn from_word(word: u32) -> Self {
        Self {
            word_id: ((word >> WORD_ID_BIT) & WORD_ID_MASK) as u8,
            version: ((word >> VERSION_BIT) & VERSION_MASK) as u8,
            format: ((word >> FORMAT_BIT) & FORMAT_MASK) as u8,
            seqno: ((word >> SEQNO_BIT) & SEQNO_MASK) as u8,
            crate_no: ((word >> CRATE_BIT) & CRATE_MASK) as u8,
            module: ((word >> MODULE_BIT) & MODULE_MASK) as u8,
            slices_fadc: ((word >> SLICES_FADC_BIT) & SLICES_MASK) as u8,
            slices_lut: ((word >> SLICES_LUT_BIT) & SLICES_MASK) as u8,
        }
    }

    pub fn to_word(self) -> u32 {
        (u32::from(self.word_id) & WORD_ID_MASK) << WORD_ID_BIT
            | (u32::from(self.version) & VERSION_MASK) << VERSION_BIT
            | (u32::from(self.format) & FORMAT_MASK) << FORMAT_BIT
            | (u32::from(self.seqno) & SEQNO_MASK) << SEQNO_BIT
            | (u32::from(self.crate_no) & CRATE_MASK) << CRATE_BIT
            | (u32::from(self.module) & MODULE_MASK) << MODULE_BIT
            | (u32::from(self.slices_fadc) & SLICES_MASK) << SLICES_FADC_BIT
            | (u32::from(self.slices_lut) & SLICES_MASK) << SLICES_LUT_BIT
    }

    /// A PPM/CPM/JEM header.
    pub fn data(
        version: u8,
        format: u8,
        seqno: u8,
        crate_no: u8,
        module: u8,
        slices_fadc: u8,
        slices_lut: u8,
    ) -> Self {
        Self {
            word_id: WORD_ID_DATA,
            version,
            format,
            seqno,
            crate_no,
            module,
            slices_fadc,
            slices_lut,
        }
    }

    /// A CMM header; the module nibble packs summing/firmware/position.
    pub fn cmm(
        version: u8,
        format: u8,
        seqno: u8,
        crate_no: u8,
        firmware: CmmFirmware,
        summing: bool,
        position: bool,
        timeslices: u8,
    ) -> Self {
        let module = (u32::from(summing) << CMM_SUMMING_BIT
            | (firmware as u32 & CMM_FIRMWARE_MASK) << CMM_FIRMWARE_BIT
            | u32::from(position) << CMM_POSITION_BIT) as u8;
        Self {
            word_id: WORD_ID_CMM,
            version,
            format,
            seqno,
            crate_no,
            module,
            slices_fadc: 0,
            slices_lut: timeslices,
        }
    }

    pub fn is_cmm(&self) -> bool {
        self.word_id == WORD_ID_CMM
    }

    /// True for a PPM error block header.
    pub fn is_error_block(&self) -> bool {
        self.format == FORMAT_UNCOMPRESSED && self.seqno == ERROR_MARKER
    }

    pub fn cmm_firmware(&self) -> Option<CmmFirmware> {
        match (u32::from(self.module) >> CMM_FIRMWARE_BIT) & CMM_FIRMWARE_MASK {
            1 => Some(CmmFirmware::Cp),
            2 => Some(CmmFirmware::Jet),
            3 => Some(CmmFirmware::Energy),
            _ => None,
        }
    }

    pub fn cmm_summing(&self) -> bool {
        (self.module >> CMM_SUMMING_BIT) & 0x1 != 0
    }

    pub fn cmm_position(&self) -> bool {
        (self.module >> CMM_POSITION_BIT) & 0x1 != 0
    }

    /// Timeslices for CPM/JEM/CMM blocks (kept in the LUT-slices nibble).
    pub fn timeslices(&self) -> usize {
        usize::from(self.slices_lut)
    }
}

/// Sub-block status trailer flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubBlockStatus {
    pub failing_bcn: u8,
    pub glink_timeout: bool,
    pub glink_down: bool,
    pub daq_overflow: bool,
    pub bcn_mismatch: bool,
    pub glink_protocol: bool,
    pub glink_parity: bool,
}

impl SubBlockStatus {
    pub fn any(&self) -> bool {
        self.failing_bcn != 0
            || self.glink_timeout
            || self.glink_down
            || self.daq_overflow
            || self.bcn_mismatch
            || self.glink_protocol
            || self.glink_parity
    }

    pub fn from_word(word: u32) -> Self {
        Self {
            failing_bcn: ((word >> FAILING_BCN_BIT) & FAILING_BCN_MASK) as u8,
            glink_timeout: (word >> GLINK_TIMEOUT_BIT) & 0x1 != 0,
            glink_down: (word >> GLINK_DOWN_BIT) & 0x1 != 0,
            daq_overflow: (word >> DAQ_OVERFLOW_BIT) & 0x1 != 0,
            bcn_mismatch: (word >> BCN_MISMATCH_BIT) & 0x1 != 0,
            glink_protocol: (word >> GLINK_PROTOCOL_BIT) & 0x1 != 0,
            glink_parity: (word >> GLINK_PARITY_BIT) & 0x1 != 0,
        }
    }

    /// Packs the trailer for the block `header` belongs to. Returns zero
    /// when no flag is set; an all-clear trailer is simply not written.
    pub fn to_word(self, header: SubBlockHeader) -> u32 {
        let mut word = (u32::from(self.failing_bcn) & FAILING_BCN_MASK) << FAILING_BCN_BIT
            | u32::from(self.glink_timeout) << GLINK_TIMEOUT_BIT
            | u32::from(self.glink_down) << GLINK_DOWN_BIT
            | u32::from(self.daq_overflow) << DAQ_OVERFLOW_BIT
            | u32::from(self.bcn_mismatch) << BCN_MISMATCH_BIT
            | u32::from(self.glink_protocol) << GLINK_PROTOCOL_BIT
            | u32::from(self.glink_parity) << GLINK_PARITY_BIT;
        if word != 0 {
            word |= (u32::from(header.word_id) & WORD_ID_MASK) << WORD_ID_BIT;
            word |= 0x1 << STATUS_BIT;
            word |= (u32::from(header.seqno) & SEQNO_MASK) << SEQNO_BIT;
            word |= (u32::from(header.crate_no) & CRATE_MASK) << CRATE_BIT;
            word |= (u32::from(header.module) & MODULE_MASK) << MODULE_BIT;
        }
        word
    }
}

/// One located sub-block, borrowing the fragment payload.
#[derive(Debug, Clone, Copy)]
pub struct SubBlock<'a> {
    pub header: SubBlockHeader,
    pub data: &'a [u32],
    pub status: Option<SubBlockStatus>,
}

/// Splits a payload (after the user header) into its sub-blocks.
///
/// Boundaries come from header-word classification, so sub-blocks of any
/// length tile the payload exactly; a stray data word outside a block is a
/// structure error.
pub fn split_sub_blocks(payload: &[u32], source_id: u32) -> Result<Vec<SubBlock<'_>>, CodecError> {
    let mut blocks: Vec<SubBlock<'_>> = Vec::new();
    let mut current: Option<(SubBlockHeader, usize)> = None;

    for (pos, &word) in payload.iter().enumerate() {
        match word_type(word) {
            SubBlockWordType::DataHeader | SubBlockWordType::ErrorHeader => {
                if let Some((header, data_start)) = current.take() {
                    blocks.push(SubBlock {
                        header,
                        data: &payload[data_start..pos],
                        status: None,
                    });
                }
                current = Some((SubBlockHeader::from_word(word), pos + 1));
            }
            SubBlockWordType::StatusTrailer => {
                let (header, data_start) = current.take().ok_or_else(|| {
                    CodecError::malformed(
                        source_id,
                        format!("status trailer at word {pos} outside any sub-block"),
                    )
                })?;
                blocks.push(SubBlock {
                    header,
                    data: &payload[data_start..pos],
                    status: Some(SubBlockStatus::from_word(word)),
                });
            }
            SubBlockWordType::Data => {
                if current.is_none() {
                    return Err(CodecError::malformed(
                        source_id,
                        format!("data word at word {pos} before any sub-block header"),
                    ));
                }
            }
        }
    }
    if let Some((header, data_start)) = current.take() {
        blocks.push(SubBlock {
            header,
            data: &payload[data_start..],
            status: None,
        });
    }
    Ok(blocks)
}

/// A sub-block assembled for output.
pub struct SubBlockOut {
    pub header: SubBlockHeader,
    pub data: Vec<u32>,
    pub status: SubBlockStatus,
}

impl SubBlockOut {
    pub fn new(header: SubBlockHeader, data: Vec<u32>) -> Self {
        Self {
            header,
            data,
            status: SubBlockStatus::default(),
        }
    }

    /// Appends header, data and (when any flag is set) the trailer.
    pub fn write_to(&self, out: &mut WordWriter) {
        out.word(self.header.to_word());
        out.extend(&self.data);
        let trailer = self.status.to_word(self.header);
        if trailer != 0 {
            out.word(trailer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_word_roundtrip() {
        let header = SubBlockHeader::data(1, FORMAT_COMPRESSED, 1, 5, 9, 7, 1);
        let word = header.to_word();
        assert_eq!(word_type(word), SubBlockWordType::DataHeader);
        assert_eq!(SubBlockHeader::from_word(word), header);
    }

    #[test]
    fn test_error_header_classification() {
        let header = SubBlockHeader::data(1, FORMAT_UNCOMPRESSED, ERROR_MARKER, 0, 3, 7, 1);
        assert!(header.is_error_block());
        assert_eq!(word_type(header.to_word()), SubBlockWordType::ErrorHeader);
    }

    #[test]
    fn test_cmm_header() {
        let header = SubBlockHeader::cmm(1, FORMAT_UNCOMPRESSED, 0, 2, CmmFirmware::Energy, true, false, 1);
        let back = SubBlockHeader::from_word(header.to_word());
        assert!(back.is_cmm());
        assert_eq!(back.cmm_firmware(), Some(CmmFirmware::Energy));
        assert!(back.cmm_summing());
        assert!(!back.cmm_position());
        assert_eq!(back.timeslices(), 1);
    }

    #[test]
    fn test_status_trailer_roundtrip() {
        let header = SubBlockHeader::data(1, FORMAT_UNCOMPRESSED, 0, 1, 2, 7, 1);
        let status = SubBlockStatus {
            glink_parity: true,
            daq_overflow: true,
            ..Default::default()
        };
        let word = status.to_word(header);
        assert_eq!(word_type(word), SubBlockWordType::StatusTrailer);
        assert_eq!(SubBlockStatus::from_word(word), status);
    }

    #[test]
    fn test_split_blocks() {
        let h1 = SubBlockHeader::data(1, FORMAT_UNCOMPRESSED, 0, 1, 2, 7, 1);
        let h2 = SubBlockHeader::data(1, FORMAT_UNCOMPRESSED, 16, 1, 2, 7, 1);
        let status = SubBlockStatus {
            glink_timeout: true,
            ..Default::default()
        };
        let payload = [
            h1.to_word(),
            0x1234,
            0x5678,
            status.to_word(h1),
            h2.to_word(),
            0x9abc,
        ];
        let blocks = split_sub_blocks(&payload, 0).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].data, &[0x1234, 0x5678]);
        assert_eq!(blocks[0].status, Some(status));
        assert_eq!(blocks[1].header.seqno, 16);
        assert_eq!(blocks[1].data, &[0x9abc]);
        assert_eq!(blocks[1].status, None);
    }

    #[test]
    fn test_stray_data_word_rejected() {
        assert!(split_sub_blocks(&[0x1234], 0).is_err());
    }
}
