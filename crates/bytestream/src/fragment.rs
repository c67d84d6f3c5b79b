//! ROD fragment envelope.
//!
//! One fragment per (crate, S-Link) per event: a fixed nine-word header,
//! the payload (user header plus sub-blocks or RoI words), two status
//! words, and a three-word trailer whose length fields must tile the
//! buffer exactly.

use l1calo_words::WordReader;

use crate::error::CodecError;
use crate::event::RodHeader;
use crate::srcid::SourceId;

/// Event-format start marker, the first word of every fragment.
pub const START_MARKER: u32 = 0xEE1234EE;
/// Fixed ROD header length in words.
pub const HEADER_WORDS: usize = 9;
/// Status words per fragment.
pub const STATUS_WORDS: usize = 2;
/// Trailer words per fragment.
pub const TRAILER_WORDS: usize = 3;
/// Format version written by this codec: major 3.1, minor 0x1002.
pub const ROD_VERSION: u32 = 0x0301_1002;

/// Decode progression for one fragment. `Failed` is expressed as the
/// `Err` branch of the parse result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePhase {
    AwaitHeader,
    ReadingHeader,
    LocatingSubFragments,
    DecodingChannels,
    Done,
}

/// Parsed view of one raw fragment. Borrows the host's buffer; the codec
/// neither stores nor outlives it.
#[derive(Debug, Clone, Copy)]
pub struct RodFragment<'a> {
    pub version: u32,
    pub source_id: u32,
    pub run_number: u32,
    pub l1_id: u32,
    pub bcid: u32,
    pub trigger_type: u32,
    pub detector_type: u32,
    pub payload: &'a [u32],
    pub status: &'a [u32],
}

impl<'a> RodFragment<'a> {
    /// Parses the fragment envelope, checking the marker and that the
    /// declared lengths sum to the buffer length.
    pub fn parse(words: &'a [u32]) -> Result<Self, CodecError> {
        let mut phase = DecodePhase::AwaitHeader;
        log::trace!("fragment decode phase: {phase:?}");
        let mut reader = WordReader::new(words);

        // AwaitHeader: the start marker locates the header.
        if words.len() < HEADER_WORDS + TRAILER_WORDS {
            return Err(CodecError::malformed(
                0,
                format!("fragment of {} words is shorter than header and trailer", words.len()),
            ));
        }
        if reader.next()? != START_MARKER {
            return Err(CodecError::malformed(0, "missing event-format start marker"));
        }
        phase = DecodePhase::ReadingHeader;
        log::trace!("fragment decode phase: {phase:?}");

        let header_size = reader.next()? as usize;
        if header_size != HEADER_WORDS {
            return Err(CodecError::malformed(
                0,
                format!("unexpected header size {header_size}"),
            ));
        }
        let version = reader.next()?;
        let source_id = reader.next()?;
        let run_number = reader.next()? & 0xff_ffff;
        let l1_id = reader.next()?;
        let bcid = reader.next()? & 0xfff;
        let trigger_type = reader.next()?;
        let detector_type = reader.next()?;

        phase = DecodePhase::LocatingSubFragments;
        log::trace!("fragment decode phase: {phase:?}");

        let trailer = &words[words.len() - TRAILER_WORDS..];
        let n_status = trailer[0] as usize;
        let n_data = trailer[1] as usize;
        let body = words.len() - HEADER_WORDS - TRAILER_WORDS;
        if n_status + n_data != body {
            return Err(CodecError::malformed(
                source_id,
                format!(
                    "declared lengths data {n_data} + status {n_status} do not sum to body {body}"
                ),
            ));
        }
        let payload = reader.take(n_data)?;
        let status = reader.take(n_status)?;
        Ok(Self {
            version,
            source_id,
            run_number,
            l1_id,
            bcid,
            trigger_type,
            detector_type,
            payload,
            status,
        })
    }

    pub fn source(&self) -> SourceId {
        SourceId::from_word(self.source_id)
    }

    /// The RODHeaders primitive for this fragment.
    pub fn header(&self) -> RodHeader {
        RodHeader {
            version: self.version,
            source_id: self.source_id,
            run_number: self.run_number,
            l1_id: self.l1_id,
            bcid: self.bcid,
            trigger_type: self.trigger_type,
            detector_type: self.detector_type,
            status: self.status.to_vec(),
            payload_size: self.payload.len() as u32,
        }
    }
}

/// Assembles a complete fragment around a payload.
#[derive(Debug, Clone)]
pub struct RodFragmentBuilder {
    pub source: SourceId,
    pub run_number: u32,
    pub l1_id: u32,
    pub bcid: u32,
    pub trigger_type: u32,
    pub detector_type: u32,
    pub status: [u32; STATUS_WORDS],
}

impl RodFragmentBuilder {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            run_number: 0,
            l1_id: 0,
            bcid: 0,
            trigger_type: 0,
            detector_type: 0,
            status: [0; STATUS_WORDS],
        }
    }

    pub fn run_number(mut self, run: u32) -> Self {
        self.run_number = run & 0xff_ffff;
        self
    }

    pub fn l1_id(mut self, l1_id: u32) -> Self {
        self.l1_id = l1_id;
        self
    }

    pub fn bcid(mut self, bcid: u32) -> Self {
        self.bcid = bcid & 0xfff;
        self
    }

    /// Wraps `payload` into a complete fragment.
    pub fn build(&self, payload: Vec<u32>) -> Vec<u32> {
        let mut words = Vec::with_capacity(HEADER_WORDS + payload.len() + STATUS_WORDS + TRAILER_WORDS);
        words.push(START_MARKER);
        words.push(HEADER_WORDS as u32);
        words.push(ROD_VERSION);
        words.push(self.source.to_word());
        words.push(self.run_number);
        words.push(self.l1_id);
        words.push(self.bcid);
        words.push(self.trigger_type);
        words.push(self.detector_type);
        let n_data = payload.len() as u32;
        words.extend(payload);
        words.extend_from_slice(&self.status);
        words.push(STATUS_WORDS as u32);
        words.push(n_data);
        words.push(1); // status block follows the data block
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srcid::subdet;

    #[test]
    fn test_envelope_roundtrip() {
        let source = SourceId::new(subdet::PPM, false, 2, 1);
        let builder = RodFragmentBuilder::new(source)
            .run_number(123456)
            .l1_id(42)
            .bcid(0xabc);
        let words = builder.build(vec![0xf000_0001, 7, 8, 9]);

        let frag = RodFragment::parse(&words).unwrap();
        assert_eq!(frag.source(), source);
        assert_eq!(frag.run_number, 123456);
        assert_eq!(frag.l1_id, 42);
        assert_eq!(frag.bcid, 0xabc);
        assert_eq!(frag.payload, &[0xf000_0001, 7, 8, 9]);
        assert_eq!(frag.status, &[0, 0]);

        let header = frag.header();
        assert_eq!(header.payload_size, 4);
        assert_eq!(header.minor_version(), 0x1002);
    }

    #[test]
    fn test_bad_marker() {
        let source = SourceId::new(subdet::PPM, false, 0, 0);
        let mut words = RodFragmentBuilder::new(source).build(vec![]);
        words[0] = 0xDEADBEEF;
        assert!(RodFragment::parse(&words).is_err());
    }

    #[test]
    fn test_length_mismatch() {
        let source = SourceId::new(subdet::PPM, false, 0, 0);
        let mut words = RodFragmentBuilder::new(source).build(vec![1, 2, 3]);
        let len = words.len();
        words[len - 2] = 2; // claim fewer data words than present
        assert!(RodFragment::parse(&words).is_err());
    }
}
