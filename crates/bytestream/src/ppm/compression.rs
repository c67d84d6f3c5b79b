//! PPM sample compression.
//!
//! Compressed sub-blocks carry a 2-bit scheme code per channel followed by
//! the scheme's payload. The CompressionVersion property selects which
//! schemes the encoder may use; the decoder understands every code, so new
//! encoder versions do not break old readers.
//!
//! | code | scheme | payload |
//! |------|--------|---------|
//! | 0    | absent | none; decodes to all-zero samples |
//! | 1    | flat   | one 10-bit FADC value for every slice |
//! | 2    | delta  | LUT slices, 10-bit minimum FADC, per-slice deltas |
//! | 3    | raw    | LUT and FADC slices verbatim |
//!
//! Version 0 encoders use absent/raw only; version 1 adds flat and delta
//! and picks the smallest exact encoding. Either way compression is
//! lossless: absent is only chosen under the zero-suppression rule.

use l1calo_words::{BitReader, BitWriter, OutOfRange};

use super::data::PpmModuleData;
use super::{ERROR_BITS, FADC_MASK};

pub const SCHEME_COUNT: usize = 4;
pub const SCHEME_ABSENT: u8 = 0;
pub const SCHEME_FLAT: u8 = 1;
pub const SCHEME_DELTA: u8 = 2;
pub const SCHEME_RAW: u8 = 3;

const LUT_DATA_BITS: usize = 8;
const LUT_BCID_BITS: usize = 3;
const FADC_DATA_BITS: usize = 10;
const SHORT_DELTA_BITS: usize = 4;

/// One channel's samples, the unit the compression schemes work on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSamples {
    pub lut: Vec<u16>,
    pub fadc: Vec<u16>,
    pub bcid_lut: Vec<u8>,
    pub bcid_fadc: Vec<u8>,
}

impl ChannelSamples {
    pub fn empty(slices_lut: usize, slices_fadc: usize) -> Self {
        Self {
            lut: vec![0; slices_lut],
            fadc: vec![0; slices_fadc],
            bcid_lut: vec![0; slices_lut],
            bcid_fadc: vec![0; slices_fadc],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.lut.iter().all(|&v| v == 0)
            && self.fadc.iter().all(|&v| v == 0)
            && self.bcid_lut.iter().all(|&v| v == 0)
            && self.bcid_fadc.iter().all(|&v| v == 0)
    }

    fn quiet(&self) -> bool {
        self.lut.iter().all(|&v| v == 0)
            && self.bcid_lut.iter().all(|&v| v == 0)
            && self.bcid_fadc.iter().all(|&v| v == 0)
    }

    /// Quiet under the zero-suppression rule.
    pub fn below_pedestal(&self, pedestal: u16) -> bool {
        self.quiet() && self.fadc.iter().all(|&v| v <= pedestal)
    }

    fn flat(&self) -> bool {
        self.quiet() && self.fadc.windows(2).all(|w| w[0] == w[1])
    }
}

/// Outcome of decoding one compressed channel. Anomalies keep the bit
/// stream aligned, so the caller can skip the channel and carry on.
#[derive(Debug, PartialEq, Eq)]
pub enum ChannelOutcome {
    Decoded(ChannelSamples),
    Anomaly(&'static str),
}

/// Encodes one channel, returning the scheme used.
pub fn compress_channel(
    writer: &mut BitWriter,
    samples: &ChannelSamples,
    version: u8,
    pedestal: u16,
    zero_suppress: bool,
) -> Result<u8, OutOfRange> {
    if zero_suppress && samples.below_pedestal(pedestal) {
        writer.pack(u32::from(SCHEME_ABSENT), 2)?;
        return Ok(SCHEME_ABSENT);
    }
    if version >= 1 {
        if samples.flat() {
            writer.pack(u32::from(SCHEME_FLAT), 2)?;
            writer.pack(u32::from(samples.fadc.first().copied().unwrap_or(0)), FADC_DATA_BITS)?;
            return Ok(SCHEME_FLAT);
        }
        if delta_cost(samples) <= raw_fadc_cost(samples) {
            write_delta(writer, samples)?;
            return Ok(SCHEME_DELTA);
        }
    }
    write_raw(writer, samples)?;
    Ok(SCHEME_RAW)
}

/// Decodes one channel. Overruns are fatal; value anomalies are returned
/// as [`ChannelOutcome::Anomaly`] with the cursor already past the channel.
pub fn decompress_channel(
    reader: &mut BitReader<'_>,
    slices_lut: usize,
    slices_fadc: usize,
) -> Result<(u8, ChannelOutcome), OutOfRange> {
    let scheme = reader.unpack(2)? as u8;
    let mut samples = ChannelSamples::empty(slices_lut, slices_fadc);
    match scheme {
        SCHEME_ABSENT => {}
        SCHEME_FLAT => {
            let value = reader.unpack(FADC_DATA_BITS)? as u16;
            samples.fadc.fill(value);
        }
        SCHEME_DELTA => {
            for pos in 0..slices_lut {
                samples.lut[pos] = reader.unpack(LUT_DATA_BITS)? as u16;
                samples.bcid_lut[pos] = reader.unpack(LUT_BCID_BITS)? as u8;
            }
            let minimum = reader.unpack(FADC_DATA_BITS)?;
            let mut overflow = false;
            for pos in 0..slices_fadc {
                let wide = reader.unpack(1)? != 0;
                let delta = reader.unpack(if wide { FADC_DATA_BITS } else { SHORT_DELTA_BITS })?;
                let value = minimum + delta;
                overflow |= value > FADC_MASK;
                samples.fadc[pos] = (value & FADC_MASK) as u16;
                samples.bcid_fadc[pos] = reader.unpack(1)? as u8;
            }
            if overflow {
                return Ok((scheme, ChannelOutcome::Anomaly("FADC delta overflow")));
            }
        }
        _ => {
            for pos in 0..slices_lut {
                samples.lut[pos] = reader.unpack(LUT_DATA_BITS)? as u16;
                samples.bcid_lut[pos] = reader.unpack(LUT_BCID_BITS)? as u8;
            }
            for pos in 0..slices_fadc {
                samples.fadc[pos] = reader.unpack(FADC_DATA_BITS)? as u16;
                samples.bcid_fadc[pos] = reader.unpack(1)? as u8;
            }
        }
    }
    Ok((scheme, ChannelOutcome::Decoded(samples)))
}

/// Appends the pin-error section of a compressed sub-block: one presence
/// bit per pin, then the error words of the flagged pins.
pub(crate) fn pack_pin_errors(writer: &mut BitWriter, data: &PpmModuleData) -> Result<(), OutOfRange> {
    for pin in 0..data.pins() {
        writer.pack(u32::from(data.pin_error(pin) != 0), 1)?;
    }
    for pin in 0..data.pins() {
        let word = data.pin_error(pin);
        if word != 0 {
            writer.pack(word, ERROR_BITS)?;
        }
    }
    Ok(())
}

/// Reads the pin-error section back into the module data.
pub(crate) fn unpack_pin_errors(
    reader: &mut BitReader<'_>,
    data: &mut PpmModuleData,
) -> Result<(), OutOfRange> {
    let mut present = vec![false; data.pins()];
    for flag in present.iter_mut() {
        *flag = reader.unpack(1)? != 0;
    }
    for (pin, &flag) in present.iter().enumerate() {
        if flag {
            let word = reader.unpack(ERROR_BITS)?;
            data.set_pin_error(pin, word);
        }
    }
    Ok(())
}

fn write_raw(writer: &mut BitWriter, samples: &ChannelSamples) -> Result<(), OutOfRange> {
    writer.pack(u32::from(SCHEME_RAW), 2)?;
    for (&lut, &bcid) in samples.lut.iter().zip(&samples.bcid_lut) {
        writer.pack(u32::from(lut), LUT_DATA_BITS)?;
        writer.pack(u32::from(bcid), LUT_BCID_BITS)?;
    }
    for (&fadc, &bcid) in samples.fadc.iter().zip(&samples.bcid_fadc) {
        writer.pack(u32::from(fadc), FADC_DATA_BITS)?;
        writer.pack(u32::from(bcid), 1)?;
    }
    Ok(())
}

fn write_delta(writer: &mut BitWriter, samples: &ChannelSamples) -> Result<(), OutOfRange> {
    writer.pack(u32::from(SCHEME_DELTA), 2)?;
    for (&lut, &bcid) in samples.lut.iter().zip(&samples.bcid_lut) {
        writer.pack(u32::from(lut), LUT_DATA_BITS)?;
        writer.pack(u32::from(bcid), LUT_BCID_BITS)?;
    }
    let minimum = samples.fadc.iter().copied().min().unwrap_or(0);
    writer.pack(u32::from(minimum), FADC_DATA_BITS)?;
    for (&fadc, &bcid) in samples.fadc.iter().zip(&samples.bcid_fadc) {
        let delta = u32::from(fadc - minimum);
        if delta < 1 << SHORT_DELTA_BITS {
            writer.pack(0, 1)?;
            writer.pack(delta, SHORT_DELTA_BITS)?;
        } else {
            writer.pack(1, 1)?;
            writer.pack(delta, FADC_DATA_BITS)?;
        }
        writer.pack(u32::from(bcid), 1)?;
    }
    Ok(())
}

/// FADC-section cost of the delta scheme in bits.
fn delta_cost(samples: &ChannelSamples) -> usize {
    let minimum = samples.fadc.iter().copied().min().unwrap_or(0);
    let mut bits = FADC_DATA_BITS;
    for &fadc in &samples.fadc {
        let delta = u32::from(fadc - minimum);
        bits += 1
            + if delta < 1 << SHORT_DELTA_BITS {
                SHORT_DELTA_BITS
            } else {
                FADC_DATA_BITS
            }
            + 1;
    }
    bits
}

/// FADC-section cost of the raw scheme in bits.
fn raw_fadc_cost(samples: &ChannelSamples) -> usize {
    samples.fadc.len() * (FADC_DATA_BITS + 1)
}
