//! Cluster-processor (CP) byte-stream codec.
//!
//! A CP fragment carries one sub-block per CPM (towers plus cluster hit
//! words) and, on the last S-Link of a crate, the CMM-CP sub-block with
//! the merged hits. All data is 31-bit streamed.

use std::collections::HashMap;

use l1calo_words::{BitReader, BitWriter, WordWriter};

use crate::codecs::{FragmentCodec, SubsystemKind};
use crate::config::CodecConfig;
use crate::error::CodecError;
use crate::event::{ChannelId, CmmCpHits, CpmHits, CpmTower, DecodedEvent};
use crate::fragment::{RodFragment, RodFragmentBuilder};
use crate::srcid::{subdet, SourceId};
use crate::stats::SessionStats;
use crate::subblock::{
    split_sub_blocks, CmmFirmware, SubBlockHeader, SubBlockOut, FORMAT_UNCOMPRESSED,
};
use crate::topology::Topology;
use crate::user_header::UserHeader;

/// CPM modules are numbered from one.
const MODULE_OFFSET: u8 = 1;

const ENERGY_BITS: usize = 8;
const ERROR_BITS: usize = 2;
const HIT_BITS: usize = 24;

/// Byte-stream codec for CPM towers, CPM hits and CMM-CP hits.
#[derive(Debug, Default)]
pub struct CpCodec;

impl CpCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(
        &self,
        frag: &RodFragment<'_>,
        topo: &Topology,
        out: &mut DecodedEvent,
    ) -> Result<(), CodecError> {
        let sid = frag.source_id;
        let src = frag.source();
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
        let peak = user_header.cpm();
        let cmm_peak = user_header.cp_cmm();

        let channels = usize::from(topo.channels);
        let mut seen_modules: Vec<u8> = Vec::new();
        let mut seen_cmm = false;
        for block in split_sub_blocks(&frag.payload[1..], sid)? {
            let header = block.header;
            check_version_format(&header, SubsystemKind::Cp)?;
            if header.crate_no != src.crate_no {
                return Err(CodecError::malformed(
                    sid,
                    "sub-block crate inconsistent with source id",
                ));
            }
            let slices = header.timeslices();
            if slices == 0 {
                return Err(CodecError::malformed(sid, "zero timeslices in sub-block header"));
            }
            if header.is_cmm() {
                if header.cmm_firmware() != Some(CmmFirmware::Cp) {
                    return Err(CodecError::malformed(sid, "wrong CMM firmware in CP fragment"));
                }
                if cmm_peak >= slices {
                    return Err(CodecError::malformed(
                        sid,
                        "triggered slice offset inconsistent with timeslices",
                    ));
                }
                if seen_cmm {
                    return Err(CodecError::malformed(sid, "duplicate CMM-CP sub-block"));
                }
                seen_cmm = true;
                decode_cmm_block(block.data, sid, src.crate_no, slices, cmm_peak, out)?;
                continue;
            }
            if peak >= slices {
                return Err(CodecError::malformed(
                    sid,
                    "triggered slice offset inconsistent with timeslices",
                ));
            }
            let module = header.module;
            if module < MODULE_OFFSET || module > topo.modules {
                return Err(CodecError::malformed(sid, format!("CPM module {module} out of range")));
            }
            if seen_modules.contains(&module) {
                return Err(CodecError::Duplicate {
                    what: "CPM module block",
                    crate_no: src.crate_no,
                    module,
                    index: 0,
                });
            }
            seen_modules.push(module);
            decode_cpm_block(block.data, sid, src.crate_no, module, channels, slices, peak, out)?;
        }
        Ok(())
    }

    /// Encodes one (crate, S-Link) of CP data into a complete fragment.
    /// The CMM-CP collection is only consulted for the crate's last link.
    pub fn encode(
        &self,
        towers: &[CpmTower],
        hits: &[CpmHits],
        cmm_hits: &[CmmCpHits],
        crate_no: u8,
        slink: u8,
        topo: &Topology,
        cfg: &CodecConfig,
    ) -> Result<Vec<u32>, CodecError> {
        if crate_no >= topo.crates || slink >= topo.slinks {
            return Err(CodecError::Config(format!(
                "crate {crate_no} slink {slink} outside topology"
            )));
        }
        check_encode_format(cfg, SubsystemKind::Cp)?;
        let modules = topo.slink_modules(slink);
        let last_slink = slink == topo.slinks - 1;

        let mut tower_map: HashMap<(u8, u16), &CpmTower> = HashMap::new();
        let mut shape: Option<(usize, usize)> = None;
        for tower in towers {
            let module = tower.id.module;
            let on_link = tower.id.crate_no == crate_no
                && module
                    .checked_sub(MODULE_OFFSET)
                    .is_some_and(|m| modules.contains(&m));
            if !on_link {
                continue;
            }
            merge_shape(&mut shape, tower.em.len(), tower.peak, crate_no, slink)?;
            if tower.had.len() != tower.em.len()
                || tower.em_error.len() != tower.em.len()
                || tower.had_error.len() != tower.em.len()
            {
                return Err(CodecError::SliceMismatch { crate_no, slink });
            }
            if tower_map.insert((module, tower.id.channel), tower).is_some() {
                return Err(CodecError::Duplicate {
                    what: "CPM tower",
                    crate_no,
                    module,
                    index: tower.id.channel,
                });
            }
        }
        let mut hits_map: HashMap<u8, &CpmHits> = HashMap::new();
        for entry in hits {
            let on_link = entry.crate_no == crate_no
                && entry
                    .module
                    .checked_sub(MODULE_OFFSET)
                    .is_some_and(|m| modules.contains(&m));
            if !on_link {
                continue;
            }
            merge_shape(&mut shape, entry.hits0.len(), entry.peak, crate_no, slink)?;
            if entry.hits1.len() != entry.hits0.len() {
                return Err(CodecError::SliceMismatch { crate_no, slink });
            }
            if hits_map.insert(entry.module, entry).is_some() {
                return Err(CodecError::Duplicate {
                    what: "CPM hits",
                    crate_no,
                    module: entry.module,
                    index: 0,
                });
            }
        }
        let (slices, peak) = shape.unwrap_or((1, 0));
        if slices > 15 {
            return Err(CodecError::Config("timeslices exceed header field".into()));
        }

        let mut cmm_shape: Option<(usize, usize)> = None;
        let mut cmm_map: HashMap<u8, &CmmCpHits> = HashMap::new();
        if last_slink {
            for entry in cmm_hits {
                if entry.crate_no != crate_no || entry.data_id >= CmmCpHits::SOURCES {
                    continue;
                }
                merge_shape(&mut cmm_shape, entry.hits0.len(), entry.peak, crate_no, slink)?;
                if entry.hits1.len() != entry.hits0.len()
                    || entry.err0.len() != entry.hits0.len()
                    || entry.err1.len() != entry.hits0.len()
                {
                    return Err(CodecError::SliceMismatch { crate_no, slink });
                }
                if cmm_map.insert(entry.data_id, entry).is_some() {
                    return Err(CodecError::Duplicate {
                        what: "CMM-CP hits",
                        crate_no,
                        module: entry.data_id,
                        index: 0,
                    });
                }
            }
        }
        let (cmm_slices, cmm_peak) = cmm_shape.unwrap_or((1, 0));

        let mut user_header = UserHeader::new();
        user_header.set_cpm(peak);
        user_header.set_cp_cmm(cmm_peak);
        let mut payload = WordWriter::new();
        payload.word(user_header.word());

        let channels = usize::from(topo.channels);
        for module0 in modules {
            let module = module0 + MODULE_OFFSET;
            let header = SubBlockHeader::data(
                cfg.data_version,
                FORMAT_UNCOMPRESSED,
                0,
                crate_no,
                module,
                0,
                slices as u8,
            );
            let mut writer = BitWriter::streamed();
            for slice in 0..slices {
                for chan in 0..channels {
                    let tower = tower_map.get(&(module, chan as u16));
                    let (em, had, em_err, had_err) = match tower {
                        Some(t) => (t.em[slice], t.had[slice], t.em_error[slice], t.had_error[slice]),
                        None => (0, 0, 0, 0),
                    };
                    writer.pack(u32::from(em), ENERGY_BITS)?;
                    writer.pack(u32::from(had), ENERGY_BITS)?;
                    writer.pack(u32::from(em_err), ERROR_BITS)?;
                    writer.pack(u32::from(had_err), ERROR_BITS)?;
                }
            }
            for slice in 0..slices {
                let (hits0, hits1) = match hits_map.get(&module) {
                    Some(h) => (h.hits0[slice], h.hits1[slice]),
                    None => (0, 0),
                };
                writer.pack(hits0, HIT_BITS)?;
                writer.pack(hits1, HIT_BITS)?;
            }
            SubBlockOut::new(header, writer.into_words()).write_to(&mut payload);
        }

        if last_slink {
            if cmm_slices > 15 {
                return Err(CodecError::Config("timeslices exceed header field".into()));
            }
            let header = SubBlockHeader::cmm(
                cfg.data_version,
                FORMAT_UNCOMPRESSED,
                0,
                crate_no,
                CmmFirmware::Cp,
                false,
                false,
                cmm_slices as u8,
            );
            let mut writer = BitWriter::streamed();
            for slice in 0..cmm_slices {
                for source in 0..CmmCpHits::SOURCES {
                    let entry = cmm_map.get(&source);
                    let (hits0, err0, hits1, err1) = match entry {
                        Some(e) => (e.hits0[slice], e.err0[slice], e.hits1[slice], e.err1[slice]),
                        None => (0, 0, 0, 0),
                    };
                    writer.pack(hits0, HIT_BITS)?;
                    writer.pack(u32::from(err0), ERROR_BITS)?;
                    writer.pack(hits1, HIT_BITS)?;
                    writer.pack(u32::from(err1), ERROR_BITS)?;
                }
            }
            SubBlockOut::new(header, writer.into_words()).write_to(&mut payload);
        }

        let source = SourceId::new(subdet::CP_DAQ, false, crate_no, slink);
        Ok(RodFragmentBuilder::new(source).build(payload.into_words()))
    }
}

impl FragmentCodec for CpCodec {
    fn decode(
        &self,
        frag: &RodFragment<'_>,
        topo: &Topology,
        _cfg: &CodecConfig,
        _stats: &SessionStats,
        out: &mut DecodedEvent,
    ) -> Result<(), CodecError> {
        CpCodec::decode(self, frag, topo, out)
    }
}

fn decode_cpm_block(
    data: &[u32],
    sid: u32,
    crate_no: u8,
    module: u8,
    channels: usize,
    slices: usize,
    peak: usize,
    out: &mut DecodedEvent,
) -> Result<(), CodecError> {
    let bits = slices * (channels * (2 * ENERGY_BITS + 2 * ERROR_BITS) + 2 * HIT_BITS);
    check_block_len(data, bits, sid)?;
    let mut reader = BitReader::streamed(data);
    let mut towers: Vec<CpmTower> = (0..channels)
        .map(|chan| CpmTower::empty(ChannelId::new(crate_no, module, chan as u16), slices, peak))
        .collect();
    for slice in 0..slices {
        for tower in towers.iter_mut() {
            tower.em[slice] = reader.unpack(ENERGY_BITS)? as u16;
            tower.had[slice] = reader.unpack(ENERGY_BITS)? as u16;
            tower.em_error[slice] = reader.unpack(ERROR_BITS)? as u8;
            tower.had_error[slice] = reader.unpack(ERROR_BITS)? as u8;
        }
    }
    let mut hits = CpmHits {
        crate_no,
        module,
        hits0: vec![0; slices],
        hits1: vec![0; slices],
        peak,
    };
    for slice in 0..slices {
        hits.hits0[slice] = reader.unpack(HIT_BITS)?;
        hits.hits1[slice] = reader.unpack(HIT_BITS)?;
    }
    out.cpm_towers.extend(towers.into_iter().filter(|t| !t.is_zero()));
    if !hits.is_zero() {
        out.cpm_hits.push(hits);
    }
    Ok(())
}

fn decode_cmm_block(
    data: &[u32],
    sid: u32,
    crate_no: u8,
    slices: usize,
    peak: usize,
    out: &mut DecodedEvent,
) -> Result<(), CodecError> {
    let bits = slices * usize::from(CmmCpHits::SOURCES) * (2 * HIT_BITS + 2 * ERROR_BITS);
    check_block_len(data, bits, sid)?;
    let mut reader = BitReader::streamed(data);
    let mut entries: Vec<CmmCpHits> = (0..CmmCpHits::SOURCES)
        .map(|data_id| CmmCpHits {
            crate_no,
            data_id,
            hits0: vec![0; slices],
            hits1: vec![0; slices],
            err0: vec![0; slices],
            err1: vec![0; slices],
            peak,
        })
        .collect();
    for slice in 0..slices {
        for entry in entries.iter_mut() {
            entry.hits0[slice] = reader.unpack(HIT_BITS)?;
            entry.err0[slice] = reader.unpack(ERROR_BITS)? as u8;
            entry.hits1[slice] = reader.unpack(HIT_BITS)?;
            entry.err1[slice] = reader.unpack(ERROR_BITS)? as u8;
        }
    }
    out.cmm_cp_hits.extend(entries.into_iter().filter(|e| !e.is_zero()));
    Ok(())
}

pub(crate) fn check_version_format(
    header: &SubBlockHeader,
    kind: SubsystemKind,
) -> Result<(), CodecError> {
    if header.version != 1 || header.format != FORMAT_UNCOMPRESSED {
        return Err(CodecError::UnsupportedFormat {
            kind,
            version: header.version,
            format: header.format,
        });
    }
    Ok(())
}

pub(crate) fn check_encode_format(cfg: &CodecConfig, kind: SubsystemKind) -> Result<(), CodecError> {
    if cfg.data_version != 1 || cfg.data_format != FORMAT_UNCOMPRESSED {
        return Err(CodecError::UnsupportedFormat {
            kind,
            version: cfg.data_version,
            format: cfg.data_format,
        });
    }
    Ok(())
}

/// Streamed sub-block data must occupy exactly the words its field count
/// implies; a size mismatch means the block structure is corrupt.
pub(crate) fn check_block_len(data: &[u32], bits: usize, sid: u32) -> Result<(), CodecError> {
    let expected = (bits + 30) / 31;
    if data.len() != expected {
        return Err(CodecError::malformed(
            sid,
            format!("sub-block data of {} words where {expected} are implied", data.len()),
        ));
    }
    Ok(())
}

/// Folds one primitive's (slices, peak) into the running shape, requiring
/// every primitive on the link to agree.
pub(crate) fn merge_shape(
    shape: &mut Option<(usize, usize)>,
    slices: usize,
    peak: usize,
    crate_no: u8,
    slink: u8,
) -> Result<(), CodecError> {
    match shape {
        None => {
            *shape = Some((slices, peak));
            Ok(())
        }
        Some((s, p)) if *s == slices && *p == peak => Ok(()),
        Some(_) => Err(CodecError::SliceMismatch { crate_no, slink }),
    }
}
