//! PPM fragment decode/encode.

use std::collections::HashMap;

use l1calo_words::{BitReader, BitWriter, WordWriter};

use crate::codecs::{FragmentCodec, SubsystemKind};
use crate::config::CodecConfig;
use crate::error::CodecError;
use crate::event::{ChannelId, DecodedEvent, TriggerTower};
use crate::fragment::{RodFragment, RodFragmentBuilder};
use crate::srcid::{subdet, SourceId};
use crate::stats::SessionStats;
use crate::subblock::{
    split_sub_blocks, SubBlock, SubBlockHeader, SubBlockOut, SubBlockStatus, FORMAT_COMPRESSED,
    FORMAT_UNCOMPRESSED,
};
use crate::topology::Topology;
use crate::user_header::UserHeader;

use super::compression::{
    compress_channel, decompress_channel, pack_pin_errors, unpack_pin_errors, ChannelOutcome,
    ChannelSamples,
};
use super::{modify_data, modify_peak, PpmModuleData, ASIC_CHANNELS, DATUM_BITS, ERROR_MASK};

/// Highest compression version this codec writes or reads.
const MAX_COMPRESSION_VERSION: u8 = 1;

/// Byte-stream codec for PPM trigger towers.
#[derive(Debug, Default)]
pub struct PpmCodec;

impl PpmCodec {
    pub fn new() -> Self {
        Self
    }

    /// Decodes one PPM fragment into trigger towers. Every channel of
    /// every module on the fragment becomes a tower; channels omitted by
    /// zero-suppression come back as all-zero entries.
    pub fn decode(
        &self,
        frag: &RodFragment<'_>,
        topo: &Topology,
        cfg: &CodecConfig,
        stats: &SessionStats,
        out: &mut DecodedEvent,
    ) -> Result<(), CodecError> {
        let sid = frag.source_id;
        let src = frag.source();
        check_topology(topo)?;
        if src.crate_no >= topo.crates {
            return Err(CodecError::malformed(
                sid,
                format!("crate {} out of range", src.crate_no),
            ));
        }
        if src.slink >= topo.slinks {
            return Err(CodecError::malformed(
                sid,
                format!("slink {} out of range", src.slink),
            ));
        }
        if frag.payload.is_empty() {
            return Ok(());
        }

        let first = frag.payload[0];
        if !UserHeader::is_valid(first) {
            return Err(CodecError::malformed(sid, "invalid or missing user header"));
        }
        let user_header = UserHeader::from_word(first);
        if user_header.words() != 1 {
            return Err(CodecError::malformed(
                sid,
                format!("unexpected number of user header words: {}", user_header.words()),
            ));
        }
        let trig_lut = user_header.ppm_lut();
        let trig_fadc = user_header.ppm_fadc();

        let blocks = split_sub_blocks(&frag.payload[1..], sid)?;
        if blocks.is_empty() {
            return Ok(());
        }
        log::trace!("fragment decode phase: {:?}", crate::fragment::DecodePhase::DecodingChannels);

        let channels = usize::from(topo.channels);
        let chan_per_block = channels / ASIC_CHANNELS;
        let data_blocks = channels / chan_per_block;
        let mut anomalies = 0u32;
        let mut seen_modules: Vec<u8> = Vec::new();

        let mut pos = 0;
        while pos < blocks.len() {
            let header = blocks[pos].header;
            check_block_header(&header, &blocks[0].header, src, sid)?;
            let module = header.module;
            if seen_modules.contains(&module) {
                return Err(CodecError::Duplicate {
                    what: "PPM module block",
                    crate_no: src.crate_no,
                    module,
                    index: 0,
                });
            }
            seen_modules.push(module);

            let slices_lut = usize::from(header.slices_lut);
            let slices_fadc = usize::from(header.slices_fadc);
            check_slices(slices_lut, slices_fadc, trig_lut, trig_fadc, cfg, sid)?;
            let mut data = PpmModuleData::new(channels, slices_lut, slices_fadc);

            match header.format {
                FORMAT_UNCOMPRESSED => {
                    pos = unpack_uncompressed_module(
                        &blocks, pos, &mut data, chan_per_block, data_blocks, sid,
                    )?;
                }
                FORMAT_COMPRESSED => {
                    if header.seqno > MAX_COMPRESSION_VERSION {
                        return Err(CodecError::UnsupportedCompression {
                            version: header.seqno,
                        });
                    }
                    unpack_compressed_module(&blocks[pos], &mut data, stats, &mut anomalies)?;
                    pos += 1;
                }
                other => {
                    return Err(CodecError::UnsupportedFormat {
                        kind: SubsystemKind::Ppm,
                        version: header.version,
                        format: other,
                    });
                }
            }

            if anomalies > cfg.error_max {
                return Err(CodecError::TooManyErrors {
                    source_id: sid,
                    count: anomalies,
                    max: cfg.error_max,
                });
            }

            for chan in 0..channels {
                let samples = data.channel_samples(chan);
                out.trigger_towers.push(TriggerTower {
                    id: ChannelId::new(src.crate_no, module, chan as u16),
                    lut: samples.lut,
                    fadc: samples.fadc,
                    bcid_lut: samples.bcid_lut,
                    bcid_fadc: samples.bcid_fadc,
                    error: data.channel_error(chan),
                    peak: trig_lut,
                    adc_peak: trig_fadc,
                });
            }
        }
        Ok(())
    }

    /// Encodes the towers of one (crate, S-Link) into a complete fragment.
    pub fn encode(
        &self,
        towers: &[TriggerTower],
        crate_no: u8,
        slink: u8,
        topo: &Topology,
        cfg: &CodecConfig,
        stats: &SessionStats,
    ) -> Result<Vec<u32>, CodecError> {
        check_topology(topo)?;
        if crate_no >= topo.crates || slink >= topo.slinks {
            return Err(CodecError::Config(format!(
                "crate {crate_no} slink {slink} outside topology"
            )));
        }
        if cfg.data_format == FORMAT_COMPRESSED && cfg.compression_version > MAX_COMPRESSION_VERSION
        {
            return Err(CodecError::UnsupportedCompression {
                version: cfg.compression_version,
            });
        }
        if cfg.data_format != FORMAT_UNCOMPRESSED && cfg.data_format != FORMAT_COMPRESSED {
            return Err(CodecError::UnsupportedFormat {
                kind: SubsystemKind::Ppm,
                version: cfg.data_version,
                format: cfg.data_format,
            });
        }

        let modules = topo.slink_modules(slink);
        let mut by_key: HashMap<(u8, u16), &TriggerTower> = HashMap::new();
        for tower in towers {
            if tower.id.crate_no != crate_no || !modules.contains(&tower.id.module) {
                continue;
            }
            if by_key.insert((tower.id.module, tower.id.channel), tower).is_some() {
                return Err(CodecError::Duplicate {
                    what: "trigger tower",
                    crate_no,
                    module: tower.id.module,
                    index: tower.id.channel,
                });
            }
        }

        let shape = slink_shape(by_key.values().copied(), cfg, crate_no, slink)?;
        let slices_fadc_out = cfg.effective_slices_fadc(shape.slices_fadc);
        let trig_fadc_out = modify_peak(shape.trig_fadc, shape.slices_fadc, slices_fadc_out);
        if shape.slices_lut > 15 || slices_fadc_out > 15 {
            return Err(CodecError::Config("slice count exceeds header field".into()));
        }

        let mut user_header = UserHeader::new();
        user_header.set_ppm_lut(shape.trig_lut);
        user_header.set_ppm_fadc(trig_fadc_out);
        let mut payload = WordWriter::new();
        payload.word(user_header.word());

        let channels = usize::from(topo.channels);
        for module in modules {
            let mut data = PpmModuleData::new(channels, shape.slices_lut, slices_fadc_out);
            for chan in 0..channels {
                if let Some(tower) = by_key.get(&(module, chan as u16)) {
                    let samples = ChannelSamples {
                        lut: tower.lut.clone(),
                        fadc: modify_data(&tower.fadc, slices_fadc_out),
                        bcid_lut: tower.bcid_lut.clone(),
                        bcid_fadc: modify_data(&tower.bcid_fadc, slices_fadc_out),
                    };
                    data.fill_channel(chan, &samples);
                    if tower.error != 0 {
                        data.fill_error(chan, tower.error);
                    }
                }
            }
            if cfg.data_format == FORMAT_UNCOMPRESSED {
                pack_uncompressed_module(&mut payload, &data, crate_no, module, cfg)?;
            } else {
                pack_compressed_module(&mut payload, &data, crate_no, module, cfg, stats)?;
            }
        }

        let source = SourceId::new(subdet::PPM, false, crate_no, slink);
        Ok(RodFragmentBuilder::new(source).build(payload.into_words()))
    }
}

impl FragmentCodec for PpmCodec {
    fn decode(
        &self,
        frag: &RodFragment<'_>,
        topo: &Topology,
        cfg: &CodecConfig,
        stats: &SessionStats,
        out: &mut DecodedEvent,
    ) -> Result<(), CodecError> {
        PpmCodec::decode(self, frag, topo, cfg, stats, out)
    }
}

/// Slice counts and triggered offsets shared by every tower on a slink.
struct SlinkShape {
    slices_lut: usize,
    slices_fadc: usize,
    trig_lut: usize,
    trig_fadc: usize,
}

fn slink_shape<'a>(
    towers: impl Iterator<Item = &'a TriggerTower>,
    cfg: &CodecConfig,
    crate_no: u8,
    slink: u8,
) -> Result<SlinkShape, CodecError> {
    let mut shape: Option<SlinkShape> = None;
    for tower in towers {
        let this = SlinkShape {
            slices_lut: tower.lut.len(),
            slices_fadc: tower.fadc.len(),
            trig_lut: tower.peak,
            trig_fadc: tower.adc_peak,
        };
        if tower.bcid_lut.len() != this.slices_lut || tower.bcid_fadc.len() != this.slices_fadc {
            return Err(CodecError::SliceMismatch { crate_no, slink });
        }
        match &shape {
            None => shape = Some(this),
            Some(seen) => {
                if seen.slices_lut != this.slices_lut
                    || seen.slices_fadc != this.slices_fadc
                    || seen.trig_lut != this.trig_lut
                    || seen.trig_fadc != this.trig_fadc
                {
                    return Err(CodecError::SliceMismatch { crate_no, slink });
                }
            }
        }
    }
    Ok(shape.unwrap_or(SlinkShape {
        slices_lut: cfg.default_slices_lut,
        slices_fadc: cfg.default_slices_fadc,
        trig_lut: cfg.default_slices_lut / 2,
        trig_fadc: cfg.default_slices_fadc / 2,
    }))
}

fn check_topology(topo: &Topology) -> Result<(), CodecError> {
    if topo.channels == 0 || usize::from(topo.channels) % ASIC_CHANNELS != 0 {
        return Err(CodecError::Config(format!(
            "PPM channels per module {} must be a positive multiple of {ASIC_CHANNELS}",
            topo.channels
        )));
    }
    Ok(())
}

fn check_block_header(
    header: &SubBlockHeader,
    first: &SubBlockHeader,
    src: SourceId,
    sid: u32,
) -> Result<(), CodecError> {
    if header.is_cmm() {
        return Err(CodecError::malformed(sid, "CMM sub-block in PPM fragment"));
    }
    if header.version != 1 {
        return Err(CodecError::UnsupportedFormat {
            kind: SubsystemKind::Ppm,
            version: header.version,
            format: header.format,
        });
    }
    if header.crate_no != src.crate_no {
        return Err(CodecError::malformed(
            sid,
            format!(
                "sub-block crate {} inconsistent with source id crate {}",
                header.crate_no, src.crate_no
            ),
        ));
    }
    if header.format != first.format {
        return Err(CodecError::malformed(sid, "mixed sub-block formats"));
    }
    Ok(())
}

fn check_slices(
    slices_lut: usize,
    slices_fadc: usize,
    trig_lut: usize,
    trig_fadc: usize,
    cfg: &CodecConfig,
    sid: u32,
) -> Result<(), CodecError> {
    if slices_lut == 0 || slices_fadc == 0 {
        return Err(CodecError::malformed(sid, "zero slice count in sub-block header"));
    }
    let max_fadc = cfg.effective_slices_fadc(cfg.default_slices_fadc);
    if slices_fadc > max_fadc || slices_lut > cfg.default_slices_lut {
        return Err(CodecError::malformed(
            sid,
            format!("slice counts {slices_lut}/{slices_fadc} exceed configured bounds"),
        ));
    }
    if trig_lut >= slices_lut || trig_fadc >= slices_fadc {
        return Err(CodecError::malformed(
            sid,
            "triggered slice offset inconsistent with slice count",
        ));
    }
    Ok(())
}

/// Reads the fixed group of data sub-blocks (plus any error block) for one
/// module; returns the index of the next unconsumed block.
fn unpack_uncompressed_module(
    blocks: &[SubBlock<'_>],
    start: usize,
    data: &mut PpmModuleData,
    chan_per_block: usize,
    data_blocks: usize,
    sid: u32,
) -> Result<usize, CodecError> {
    let module = blocks[start].header.module;
    let slices = data.slices();
    for idx in 0..data_blocks {
        let block = blocks.get(start + idx).ok_or_else(|| {
            CodecError::malformed(sid, format!("premature end of module {module} sub-blocks"))
        })?;
        let header = block.header;
        if header.module != module || header.crate_no != blocks[start].header.crate_no {
            return Err(CodecError::malformed(
                sid,
                "inconsistent crate/module numbers in sub-blocks",
            ));
        }
        let expected_seqno = (idx * chan_per_block) as u8;
        if header.is_error_block() || header.seqno != expected_seqno {
            return Err(CodecError::malformed(
                sid,
                format!(
                    "unexpected channel sequence number {} (expected {expected_seqno})",
                    header.seqno
                ),
            ));
        }
        let expected_words = (slices * chan_per_block * DATUM_BITS + 31) / 32;
        if block.data.len() != expected_words {
            return Err(CodecError::malformed(
                sid,
                format!(
                    "sub-block data of {} words where {expected_words} are implied",
                    block.data.len()
                ),
            ));
        }
        let mut reader = BitReader::new(block.data);
        for slice in 0..slices {
            for chan in 0..chan_per_block {
                let datum = reader.unpack(DATUM_BITS)?;
                data.set_datum(idx * chan_per_block + chan, slice, datum);
            }
        }
    }
    let mut next = start + data_blocks;
    if let Some(block) = blocks.get(next) {
        if block.header.is_error_block() && block.header.module == module {
            let expected_words = (data.pins() * DATUM_BITS + 31) / 32;
            if block.data.len() != expected_words {
                return Err(CodecError::malformed(
                    sid,
                    format!(
                        "error block of {} words where {expected_words} are implied",
                        block.data.len()
                    ),
                ));
            }
            let mut reader = BitReader::new(block.data);
            for pin in 0..data.pins() {
                let word = reader.unpack(DATUM_BITS)?;
                data.set_pin_error(pin, word & ERROR_MASK);
            }
            next += 1;
        }
    }
    Ok(next)
}

fn unpack_compressed_module(
    block: &SubBlock<'_>,
    data: &mut PpmModuleData,
    stats: &SessionStats,
    anomalies: &mut u32,
) -> Result<(), CodecError> {
    let slices_lut = usize::from(block.header.slices_lut);
    let slices_fadc = usize::from(block.header.slices_fadc);
    let mut reader = BitReader::streamed(block.data);
    for chan in 0..data.channels() {
        let (scheme, outcome) = decompress_channel(&mut reader, slices_lut, slices_fadc)?;
        stats.record_scheme(scheme);
        match outcome {
            ChannelOutcome::Decoded(samples) => data.fill_channel(chan, &samples),
            ChannelOutcome::Anomaly(reason) => {
                log::debug!(
                    "skipping channel {chan} of crate {} module {}: {reason}",
                    block.header.crate_no,
                    block.header.module
                );
                stats.record_channel_error();
                *anomalies += 1;
            }
        }
    }
    unpack_pin_errors(&mut reader, data)?;
    Ok(())
}

/// Status trailer flags derived from the folded pin errors.
fn status_from_errors(data: &PpmModuleData) -> SubBlockStatus {
    let global = data.global_error();
    SubBlockStatus {
        glink_timeout: global & 0x30 != 0,
        daq_overflow: global & 0x240 != 0,
        bcn_mismatch: global & 0x180 != 0,
        glink_parity: global & 0x400 != 0,
        ..Default::default()
    }
}

fn pack_uncompressed_module(
    payload: &mut WordWriter,
    data: &PpmModuleData,
    crate_no: u8,
    module: u8,
    cfg: &CodecConfig,
) -> Result<(), CodecError> {
    let channels = data.channels();
    let chan_per_block = channels / ASIC_CHANNELS;
    let data_blocks = channels / chan_per_block;
    let slices = data.slices();
    let status = status_from_errors(data);
    let slices_header = header_slices(data);

    for idx in 0..data_blocks {
        let header = SubBlockHeader::data(
            cfg.data_version,
            FORMAT_UNCOMPRESSED,
            (idx * chan_per_block) as u8,
            crate_no,
            module,
            slices_header.1,
            slices_header.0,
        );
        let mut writer = BitWriter::new();
        for slice in 0..slices {
            for chan in 0..chan_per_block {
                writer.pack(data.datum(idx * chan_per_block + chan, slice), DATUM_BITS)?;
            }
        }
        let mut out = SubBlockOut::new(header, writer.into_words());
        if idx == data_blocks - 1 {
            out.status = status;
        }
        out.write_to(payload);
    }

    // Uncompressed data carries its channel errors in a separate block.
    let error_header = SubBlockHeader::data(
        cfg.data_version,
        FORMAT_UNCOMPRESSED,
        crate::subblock::ERROR_MARKER,
        crate_no,
        module,
        slices_header.1,
        slices_header.0,
    );
    let mut writer = BitWriter::new();
    for pin in 0..data.pins() {
        writer.pack(data.pin_error(pin), DATUM_BITS)?;
    }
    let mut out = SubBlockOut::new(error_header, writer.into_words());
    out.status = status;
    out.write_to(payload);
    Ok(())
}

fn pack_compressed_module(
    payload: &mut WordWriter,
    data: &PpmModuleData,
    crate_no: u8,
    module: u8,
    cfg: &CodecConfig,
    stats: &SessionStats,
) -> Result<(), CodecError> {
    let slices_header = header_slices(data);
    let header = SubBlockHeader::data(
        cfg.data_version,
        FORMAT_COMPRESSED,
        cfg.compression_version,
        crate_no,
        module,
        slices_header.1,
        slices_header.0,
    );
    let mut writer = BitWriter::streamed();
    for chan in 0..data.channels() {
        let samples = data.channel_samples(chan);
        let scheme = compress_channel(
            &mut writer,
            &samples,
            cfg.compression_version,
            cfg.pedestal_value,
            cfg.zero_suppress,
        )?;
        stats.record_scheme(scheme);
    }
    pack_pin_errors(&mut writer, data)?;
    let mut out = SubBlockOut::new(header, writer.into_words());
    out.status = status_from_errors(data);
    out.write_to(payload);
    Ok(())
}

fn header_slices(data: &PpmModuleData) -> (u8, u8) {
    let slices_fadc = data.slices() - data.slices_lut();
    (data.slices_lut() as u8, slices_fadc as u8)
}
