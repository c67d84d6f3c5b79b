//! Jet/energy-processor (JEP) byte-stream codec.
//!
//! A JEP fragment carries one sub-block per JEM (jet elements, jet hits
//! and energy sums) and, on the last S-Link of a crate, the CMM-Jet and
//! CMM-Energy sub-blocks with the merged results.

use std::collections::HashMap;

use l1calo_words::{BitReader, BitWriter, WordWriter};

use crate::codecs::{FragmentCodec, SubsystemKind};
use crate::config::CodecConfig;
use crate::cp::{check_block_len, check_encode_format, check_version_format, merge_shape};
use crate::error::CodecError;
use crate::event::{ChannelId, CmmEtSums, CmmJetHits, DecodedEvent, JemEtSums, JemHits, JetElement};
use crate::fragment::{RodFragment, RodFragmentBuilder};
use crate::srcid::{subdet, SourceId};
use crate::stats::SessionStats;
use crate::subblock::{
    split_sub_blocks, CmmFirmware, SubBlockHeader, SubBlockOut, FORMAT_UNCOMPRESSED,
};
use crate::topology::Topology;
use crate::user_header::UserHeader;

const ENERGY_BITS: usize = 10;
const PARITY_BITS: usize = 1;
const LINK_BITS: usize = 2;
const HIT_BITS: usize = 24;
const SUM_BITS: usize = 12;
const SUM_ERROR_BITS: usize = 3;
const CMM_ERROR_BITS: usize = 2;

/// Byte-stream codec for jet elements, JEM hits/energy sums and the two
/// merger sub-blocks.
#[derive(Debug, Default)]
pub struct JepCodec;

impl JepCodec {
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
        let peak = user_header.jem();
        let cmm_peak = user_header.jep_cmm();

        let channels = usize::from(topo.channels);
        let mut seen_modules: Vec<u8> = Vec::new();
        let mut seen_cmm_jet = false;
        let mut seen_cmm_energy = false;
        for block in split_sub_blocks(&frag.payload[1..], sid)? {
            let header = block.header;
            check_version_format(&header, SubsystemKind::Jep)?;
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
            let trig = if header.is_cmm() { cmm_peak } else { peak };
            if trig >= slices {
                return Err(CodecError::malformed(
                    sid,
                    "triggered slice offset inconsistent with timeslices",
                ));
            }
            if header.is_cmm() {
                match header.cmm_firmware() {
                    Some(CmmFirmware::Jet) => {
                        if seen_cmm_jet {
                            return Err(CodecError::malformed(sid, "duplicate CMM-Jet sub-block"));
                        }
                        seen_cmm_jet = true;
                        decode_cmm_jet_block(block.data, sid, src.crate_no, slices, cmm_peak, out)?
                    }
                    Some(CmmFirmware::Energy) => {
                        if seen_cmm_energy {
                            return Err(CodecError::malformed(sid, "duplicate CMM-Energy sub-block"));
                        }
                        seen_cmm_energy = true;
                        decode_cmm_energy_block(block.data, sid, src.crate_no, slices, cmm_peak, out)?
                    }
                    _ => {
                        return Err(CodecError::malformed(
                            sid,
                            "wrong CMM firmware in JEP fragment",
                        ))
                    }
                }
                continue;
            }
            let module = header.module;
            if module >= topo.modules {
                return Err(CodecError::malformed(sid, format!("JEM module {module} out of range")));
            }
            if seen_modules.contains(&module) {
                return Err(CodecError::Duplicate {
                    what: "JEM module block",
                    crate_no: src.crate_no,
                    module,
                    index: 0,
                });
            }
            seen_modules.push(module);
            decode_jem_block(block.data, sid, src.crate_no, module, channels, slices, peak, out)?;
        }
        Ok(())
    }

    /// Encodes one (crate, S-Link) of JEP data into a complete fragment.
    /// The CMM collections are only consulted for the crate's last link.
    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &self,
        elements: &[JetElement],
        hits: &[JemHits],
        sums: &[JemEtSums],
        cmm_hits: &[CmmJetHits],
        cmm_sums: &[CmmEtSums],
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
        check_encode_format(cfg, SubsystemKind::Jep)?;
        let modules = topo.slink_modules(slink);
        let last_slink = slink == topo.slinks - 1;

        let mut element_map: HashMap<(u8, u16), &JetElement> = HashMap::new();
        let mut shape: Option<(usize, usize)> = None;
        for element in elements {
            if element.id.crate_no != crate_no || !modules.contains(&element.id.module) {
                continue;
            }
            merge_shape(&mut shape, element.em.len(), element.peak, crate_no, slink)?;
            if element.had.len() != element.em.len()
                || element.em_parity.len() != element.em.len()
                || element.had_parity.len() != element.em.len()
                || element.link_error.len() != element.em.len()
            {
                return Err(CodecError::SliceMismatch { crate_no, slink });
            }
            if element_map
                .insert((element.id.module, element.id.channel), element)
                .is_some()
            {
                return Err(CodecError::Duplicate {
                    what: "jet element",
                    crate_no,
                    module: element.id.module,
                    index: element.id.channel,
                });
            }
        }
        let mut hits_map: HashMap<u8, &JemHits> = HashMap::new();
        for entry in hits {
            if entry.crate_no != crate_no || !modules.contains(&entry.module) {
                continue;
            }
            merge_shape(&mut shape, entry.hits.len(), entry.peak, crate_no, slink)?;
            if hits_map.insert(entry.module, entry).is_some() {
                return Err(CodecError::Duplicate {
                    what: "JEM hits",
                    crate_no,
                    module: entry.module,
                    index: 0,
                });
            }
        }
        let mut sums_map: HashMap<u8, &JemEtSums> = HashMap::new();
        for entry in sums {
            if entry.crate_no != crate_no || !modules.contains(&entry.module) {
                continue;
            }
            merge_shape(&mut shape, entry.ex.len(), entry.peak, crate_no, slink)?;
            if entry.ey.len() != entry.ex.len() || entry.et.len() != entry.ex.len() {
                return Err(CodecError::SliceMismatch { crate_no, slink });
            }
            if sums_map.insert(entry.module, entry).is_some() {
                return Err(CodecError::Duplicate {
                    what: "JEM energy sums",
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
        let mut cmm_jet_map: HashMap<u8, &CmmJetHits> = HashMap::new();
        let mut cmm_energy_map: HashMap<u8, &CmmEtSums> = HashMap::new();
        if last_slink {
            for entry in cmm_hits {
                if entry.crate_no != crate_no || entry.data_id >= CmmJetHits::SOURCES {
                    continue;
                }
                merge_shape(&mut cmm_shape, entry.hits.len(), entry.peak, crate_no, slink)?;
                if entry.error.len() != entry.hits.len() {
                    return Err(CodecError::SliceMismatch { crate_no, slink });
                }
                if cmm_jet_map.insert(entry.data_id, entry).is_some() {
                    return Err(CodecError::Duplicate {
                        what: "CMM jet hits",
                        crate_no,
                        module: entry.data_id,
                        index: 0,
                    });
                }
            }
            for entry in cmm_sums {
                if entry.crate_no != crate_no || entry.data_id >= CmmEtSums::SOURCES {
                    continue;
                }
                merge_shape(&mut cmm_shape, entry.ex.len(), entry.peak, crate_no, slink)?;
                if entry.ey.len() != entry.ex.len()
                    || entry.et.len() != entry.ex.len()
                    || entry.error.len() != entry.ex.len()
                {
                    return Err(CodecError::SliceMismatch { crate_no, slink });
                }
                if cmm_energy_map.insert(entry.data_id, entry).is_some() {
                    return Err(CodecError::Duplicate {
                        what: "CMM energy sums",
                        crate_no,
                        module: entry.data_id,
                        index: 0,
                    });
                }
            }
        }
        let (cmm_slices, cmm_peak) = cmm_shape.unwrap_or((1, 0));
        if cmm_slices > 15 {
            return Err(CodecError::Config("timeslices exceed header field".into()));
        }

        let mut user_header = UserHeader::new();
        user_header.set_jem(peak);
        user_header.set_jep_cmm(cmm_peak);
        let mut payload = WordWriter::new();
        payload.word(user_header.word());

        let channels = usize::from(topo.channels);
        for module in modules {
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
                    let element = element_map.get(&(module, chan as u16));
                    let (em, had, em_par, had_par, link) = match element {
                        Some(e) => (
                            e.em[slice],
                            e.had[slice],
                            e.em_parity[slice],
                            e.had_parity[slice],
                            e.link_error[slice],
                        ),
                        None => (0, 0, 0, 0, 0),
                    };
                    writer.pack(u32::from(em), ENERGY_BITS)?;
                    writer.pack(u32::from(had), ENERGY_BITS)?;
                    writer.pack(u32::from(em_par), PARITY_BITS)?;
                    writer.pack(u32::from(had_par), PARITY_BITS)?;
                    writer.pack(u32::from(link), LINK_BITS)?;
                }
            }
            for slice in 0..slices {
                let hit = hits_map.get(&module).map_or(0, |h| h.hits[slice]);
                writer.pack(hit, HIT_BITS)?;
            }
            for slice in 0..slices {
                let (ex, ey, et) = match sums_map.get(&module) {
                    Some(s) => (s.ex[slice], s.ey[slice], s.et[slice]),
                    None => (0, 0, 0),
                };
                writer.pack(u32::from(ex), SUM_BITS)?;
                writer.pack(u32::from(ey), SUM_BITS)?;
                writer.pack(u32::from(et), SUM_BITS)?;
            }
            SubBlockOut::new(header, writer.into_words()).write_to(&mut payload);
        }

        if last_slink {
            let header = SubBlockHeader::cmm(
                cfg.data_version,
                FORMAT_UNCOMPRESSED,
                0,
                crate_no,
                CmmFirmware::Jet,
                false,
                false,
                cmm_slices as u8,
            );
            let mut writer = BitWriter::streamed();
            for slice in 0..cmm_slices {
                for source in 0..CmmJetHits::SOURCES {
                    let entry = cmm_jet_map.get(&source);
                    let (hit, err) = match entry {
                        Some(e) => (e.hits[slice], e.error[slice]),
                        None => (0, 0),
                    };
                    writer.pack(hit, HIT_BITS)?;
                    writer.pack(u32::from(err), CMM_ERROR_BITS)?;
                }
            }
            SubBlockOut::new(header, writer.into_words()).write_to(&mut payload);

            let header = SubBlockHeader::cmm(
                cfg.data_version,
                FORMAT_UNCOMPRESSED,
                0,
                crate_no,
                CmmFirmware::Energy,
                false,
                false,
                cmm_slices as u8,
            );
            let mut writer = BitWriter::streamed();
            for slice in 0..cmm_slices {
                for source in 0..CmmEtSums::SOURCES {
                    let entry = cmm_energy_map.get(&source);
                    let (ex, ey, et, err) = match entry {
                        Some(e) => (e.ex[slice], e.ey[slice], e.et[slice], e.error[slice]),
                        None => (0, 0, 0, 0),
                    };
                    writer.pack(u32::from(ex), SUM_BITS)?;
                    writer.pack(u32::from(ey), SUM_BITS)?;
                    writer.pack(u32::from(et), SUM_BITS)?;
                    writer.pack(u32::from(err), SUM_ERROR_BITS)?;
                }
            }
            SubBlockOut::new(header, writer.into_words()).write_to(&mut payload);
        }

        let source = SourceId::new(subdet::JEP_DAQ, false, crate_no, slink);
        Ok(RodFragmentBuilder::new(source).build(payload.into_words()))
    }
}

impl FragmentCodec for JepCodec {
    fn decode(
        &self,
        frag: &RodFragment<'_>,
        topo: &Topology,
        _cfg: &CodecConfig,
        _stats: &SessionStats,
        out: &mut DecodedEvent,
    ) -> Result<(), CodecError> {
        JepCodec::decode(self, frag, topo, out)
    }
}

fn decode_jem_block(
    data: &[u32],
    sid: u32,
    crate_no: u8,
    module: u8,
    channels: usize,
    slices: usize,
    peak: usize,
    out: &mut DecodedEvent,
) -> Result<(), CodecError> {
    let bits = slices
        * (channels * (2 * ENERGY_BITS + 2 * PARITY_BITS + LINK_BITS) + HIT_BITS + 3 * SUM_BITS);
    check_block_len(data, bits, sid)?;
    let mut reader = BitReader::streamed(data);
    let mut elements: Vec<JetElement> = (0..channels)
        .map(|chan| JetElement::empty(ChannelId::new(crate_no, module, chan as u16), slices, peak))
        .collect();
    for slice in 0..slices {
        for element in elements.iter_mut() {
            element.em[slice] = reader.unpack(ENERGY_BITS)? as u16;
            element.had[slice] = reader.unpack(ENERGY_BITS)? as u16;
            element.em_parity[slice] = reader.unpack(PARITY_BITS)? as u8;
            element.had_parity[slice] = reader.unpack(PARITY_BITS)? as u8;
            element.link_error[slice] = reader.unpack(LINK_BITS)? as u8;
        }
    }
    let mut hits = JemHits {
        crate_no,
        module,
        hits: vec![0; slices],
        peak,
    };
    for slice in 0..slices {
        hits.hits[slice] = reader.unpack(HIT_BITS)?;
    }
    let mut sums = JemEtSums {
        crate_no,
        module,
        ex: vec![0; slices],
        ey: vec![0; slices],
        et: vec![0; slices],
        peak,
    };
    for slice in 0..slices {
        sums.ex[slice] = reader.unpack(SUM_BITS)? as u16;
        sums.ey[slice] = reader.unpack(SUM_BITS)? as u16;
        sums.et[slice] = reader.unpack(SUM_BITS)? as u16;
    }
    out.jet_elements.extend(elements.into_iter().filter(|e| !e.is_zero()));
    if !hits.is_zero() {
        out.jem_hits.push(hits);
    }
    if !sums.is_zero() {
        out.jem_et_sums.push(sums);
    }
    Ok(())
}

fn decode_cmm_jet_block(
    data: &[u32],
    sid: u32,
    crate_no: u8,
    slices: usize,
    peak: usize,
    out: &mut DecodedEvent,
) -> Result<(), CodecError> {
    let bits = slices * usize::from(CmmJetHits::SOURCES) * (HIT_BITS + CMM_ERROR_BITS);
    check_block_len(data, bits, sid)?;
    let mut reader = BitReader::streamed(data);
    let mut entries: Vec<CmmJetHits> = (0..CmmJetHits::SOURCES)
        .map(|data_id| CmmJetHits {
            crate_no,
            data_id,
            hits: vec![0; slices],
            error: vec![0; slices],
            peak,
        })
        .collect();
    for slice in 0..slices {
        for entry in entries.iter_mut() {
            entry.hits[slice] = reader.unpack(HIT_BITS)?;
            entry.error[slice] = reader.unpack(CMM_ERROR_BITS)? as u8;
        }
    }
    out.cmm_jet_hits.extend(entries.into_iter().filter(|e| !e.is_zero()));
    Ok(())
}

fn decode_cmm_energy_block(
    data: &[u32],
    sid: u32,
    crate_no: u8,
    slices: usize,
    peak: usize,
    out: &mut DecodedEvent,
) -> Result<(), CodecError> {
    let bits = slices * usize::from(CmmEtSums::SOURCES) * (3 * SUM_BITS + SUM_ERROR_BITS);
    check_block_len(data, bits, sid)?;
    let mut reader = BitReader::streamed(data);
    let mut entries: Vec<CmmEtSums> = (0..CmmEtSums::SOURCES)
        .map(|data_id| CmmEtSums {
            crate_no,
            data_id,
            ex: vec![0; slices],
            ey: vec![0; slices],
            et: vec![0; slices],
            error: vec![0; slices],
            peak,
        })
        .collect();
    for slice in 0..slices {
        for entry in entries.iter_mut() {
            entry.ex[slice] = reader.unpack(SUM_BITS)? as u16;
            entry.ey[slice] = reader.unpack(SUM_BITS)? as u16;
            entry.et[slice] = reader.unpack(SUM_BITS)? as u16;
            entry.error[slice] = reader.unpack(SUM_ERROR_BITS)? as u8;
        }
    }
    out.cmm_et_sums.extend(entries.into_iter().filter(|e| !e.is_zero()));
    Ok(())
}
