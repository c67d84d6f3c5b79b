//! RoI byte-stream codecs (CP RoI and JEP RoI).
//!
//! RoI fragments are flat lists of packed RoI words, optionally preceded
//! by a user header. The same wire encoding serves two destinations:
//! fragments on S-Links 0..2 are normal readout, S-Links 2.. feed the RoI
//! builder, and decode routes them to the `...RoIsRoIB` locations.
//!
//! An unrecognised word is a channel-level anomaly: it is skipped and
//! counted against ErrorMax rather than failing the fragment.

use std::collections::BTreeSet;

use l1calo_words::WordWriter;

use crate::codecs::{FragmentCodec, SubsystemKind};
use crate::config::CodecConfig;
use crate::cp::check_encode_format;
use crate::error::CodecError;
use crate::event::{CmmRoi, CpmRoi, DecodedEvent, JemRoi};
use crate::fragment::{RodFragment, RodFragmentBuilder};
use crate::srcid::{subdet, SourceId};
use crate::stats::SessionStats;
use crate::topology::Topology;
use crate::user_header::UserHeader;

/// First S-Link feeding the RoI builder.
const ROIB_FIRST_SLINK: u8 = 2;

/// True when a fragment's RoIs are destined for the RoI-builder path.
fn roib_destination(src: SourceId) -> bool {
    src.slink >= ROIB_FIRST_SLINK
}

/// RoI words of a fragment, with the user header skipped.
fn roi_words(payload: &[u32]) -> &[u32] {
    match payload.first() {
        Some(&word) if UserHeader::is_valid(word) => {
            let skip = UserHeader::from_word(word).words().min(payload.len());
            &payload[skip..]
        }
        _ => payload,
    }
}

/// Byte-stream codec for CPM RoIs.
#[derive(Debug, Default)]
pub struct CpRoiCodec;

impl CpRoiCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(
        &self,
        frag: &RodFragment<'_>,
        cfg: &CodecConfig,
        stats: &SessionStats,
        out: &mut DecodedEvent,
    ) -> Result<(), CodecError> {
        let src = frag.source();
        let roib = roib_destination(src);
        let mut anomalies = 0u32;
        let mut rois = Vec::new();
        for &word in roi_words(frag.payload) {
            match CpmRoi::from_word(word) {
                Some(roi) => rois.push(roi),
                None => {
                    log::debug!("invalid CPM RoI word {word:#010x}");
                    stats.record_channel_error();
                    anomalies += 1;
                }
            }
        }
        if anomalies > cfg.error_max {
            return Err(CodecError::TooManyErrors {
                source_id: frag.source_id,
                count: anomalies,
                max: cfg.error_max,
            });
        }
        if roib {
            out.cpm_rois_roib.extend(rois);
        } else {
            out.cpm_rois.extend(rois);
        }
        Ok(())
    }

    /// Encodes the RoIs of one crate into a complete fragment for the
    /// given destination.
    pub fn encode(
        &self,
        rois: &[CpmRoi],
        crate_no: u8,
        roib: bool,
        cfg: &CodecConfig,
    ) -> Result<Vec<u32>, CodecError> {
        check_encode_format(cfg, SubsystemKind::CpRoi)?;
        let words: BTreeSet<u32> = rois
            .iter()
            .filter(|roi| roi.crate_no() == crate_no && (roi.hits() != 0 || roi.error()))
            .map(|roi| roi.word())
            .collect();
        let mut payload = WordWriter::new();
        payload.word(UserHeader::new().word());
        for word in words {
            payload.word(word);
        }
        let slink = if roib { ROIB_FIRST_SLINK } else { 0 };
        let source = SourceId::new(subdet::CP_ROI, true, crate_no, slink);
        Ok(RodFragmentBuilder::new(source).build(payload.into_words()))
    }
}

impl FragmentCodec for CpRoiCodec {
    fn decode(
        &self,
        frag: &RodFragment<'_>,
        _topo: &Topology,
        cfg: &CodecConfig,
        stats: &SessionStats,
        out: &mut DecodedEvent,
    ) -> Result<(), CodecError> {
        CpRoiCodec::decode(self, frag, cfg, stats, out)
    }
}

/// Byte-stream codec for JEM RoIs and the crate CMM RoI.
#[derive(Debug, Default)]
pub struct JepRoiCodec;

impl JepRoiCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(
        &self,
        frag: &RodFragment<'_>,
        cfg: &CodecConfig,
        stats: &SessionStats,
        out: &mut DecodedEvent,
    ) -> Result<(), CodecError> {
        let src = frag.source();
        let roib = roib_destination(src);
        let mut anomalies = 0u32;
        let mut rois = Vec::new();
        let mut cmm = CmmRoi::new(src.crate_no);
        for &word in roi_words(frag.payload) {
            if let Some(roi) = JemRoi::from_word(word) {
                rois.push(roi);
            } else if cmm.set_word(word) {
                // accumulated into the crate CMM RoI
            } else {
                log::debug!("invalid JEP RoI word {word:#010x}");
                stats.record_channel_error();
                anomalies += 1;
            }
        }
        if anomalies > cfg.error_max {
            return Err(CodecError::TooManyErrors {
                source_id: frag.source_id,
                count: anomalies,
                max: cfg.error_max,
            });
        }
        if roib {
            out.jem_rois_roib.extend(rois);
            if !cmm.is_zero() {
                out.cmm_rois_roib.push(cmm);
            }
        } else {
            out.jem_rois.extend(rois);
            if !cmm.is_zero() {
                out.cmm_rois.push(cmm);
            }
        }
        Ok(())
    }

    /// Encodes one crate's JEM RoIs plus its CMM RoI into a fragment for
    /// the given destination.
    pub fn encode(
        &self,
        rois: &[JemRoi],
        cmm_rois: &[CmmRoi],
        crate_no: u8,
        roib: bool,
        cfg: &CodecConfig,
    ) -> Result<Vec<u32>, CodecError> {
        check_encode_format(cfg, SubsystemKind::JepRoi)?;
        let words: BTreeSet<u32> = rois
            .iter()
            .filter(|roi| roi.crate_no() == crate_no && (roi.hits() != 0 || roi.error()))
            .map(|roi| roi.word())
            .collect();
        let mut cmm: Option<&CmmRoi> = None;
        for entry in cmm_rois {
            if entry.crate_no != crate_no {
                continue;
            }
            if cmm.is_some() {
                return Err(CodecError::Duplicate {
                    what: "CMM RoI",
                    crate_no,
                    module: 0,
                    index: 0,
                });
            }
            cmm = Some(entry);
        }
        let mut payload = WordWriter::new();
        payload.word(UserHeader::new().word());
        for word in words {
            payload.word(word);
        }
        if let Some(entry) = cmm {
            if !entry.is_zero() {
                payload.extend(&entry.to_words());
            }
        }
        let slink = if roib { ROIB_FIRST_SLINK } else { 0 };
        let source = SourceId::new(subdet::JEP_ROI, true, crate_no, slink);
        Ok(RodFragmentBuilder::new(source).build(payload.into_words()))
    }
}

impl FragmentCodec for JepRoiCodec {
    fn decode(
        &self,
        frag: &RodFragment<'_>,
        _topo: &Topology,
        cfg: &CodecConfig,
        stats: &SessionStats,
        out: &mut DecodedEvent,
    ) -> Result<(), CodecError> {
        JepRoiCodec::decode(self, frag, cfg, stats, out)
    }
}
