//! Dispatch table and codec session.
//!
//! The registry maps (subsystem kind, data version, data format) to a
//! concrete codec; unknown combinations are a hard `UnsupportedFormat`
//! error for that sub-fragment. [`CodecSession`] is the front door: it is
//! stateless apart from its shared diagnostics counters, so independent
//! fragments may be decoded concurrently from a worker pool.

use std::fmt;

use serde_json::{Map, Value};

use crate::config::CodecConfig;
use crate::cp::CpCodec;
use crate::error::CodecError;
use crate::event::{
    CmmCpHits, CmmEtSums, CmmJetHits, CmmRoi, CpmHits, CpmRoi, CpmTower, DecodedEvent, JemEtSums,
    JemHits, JemRoi, JetElement, RodHeader, TriggerTower,
};
use crate::fragment::RodFragment;
use crate::jep::JepCodec;
use crate::ppm::PpmCodec;
use crate::rodheader::RodHeaderCodec;
use crate::roi::{CpRoiCodec, JepRoiCodec};
use crate::srcid::subdet;
use crate::stats::SessionStats;
use crate::subblock::{word_type, SubBlockHeader, SubBlockWordType, FORMAT_COMPRESSED, FORMAT_UNCOMPRESSED};
use crate::topology::Topology;
use crate::user_header::UserHeader;

/// The sub-detector systems this codec layer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubsystemKind {
    Ppm,
    Cp,
    CpRoi,
    Jep,
    JepRoi,
    RodHeader,
}

impl fmt::Display for SubsystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubsystemKind::Ppm => "PPM",
            SubsystemKind::Cp => "CP",
            SubsystemKind::CpRoi => "CP-RoI",
            SubsystemKind::Jep => "JEP",
            SubsystemKind::JepRoi => "JEP-RoI",
            SubsystemKind::RodHeader => "ROD-header",
        };
        f.write_str(name)
    }
}

impl SubsystemKind {
    /// Maps a source-id sub-detector byte to its kind.
    pub fn from_subdetector(id: u8) -> Option<Self> {
        match id {
            subdet::PPM => Some(SubsystemKind::Ppm),
            subdet::CP_DAQ => Some(SubsystemKind::Cp),
            subdet::CP_ROI => Some(SubsystemKind::CpRoi),
            subdet::JEP_DAQ => Some(SubsystemKind::Jep),
            subdet::JEP_ROI => Some(SubsystemKind::JepRoi),
            _ => None,
        }
    }

    /// S-Links per crate when the configuration does not say otherwise.
    pub fn default_slinks(self) -> u8 {
        match self {
            SubsystemKind::Ppm | SubsystemKind::Jep | SubsystemKind::RodHeader => 4,
            SubsystemKind::Cp => 2,
            SubsystemKind::CpRoi | SubsystemKind::JepRoi => 1,
        }
    }
}

/// One subsystem's decode entry point, selected through the registry.
pub trait FragmentCodec: Send + Sync {
    fn decode(
        &self,
        frag: &RodFragment<'_>,
        topo: &Topology,
        cfg: &CodecConfig,
        stats: &SessionStats,
        out: &mut DecodedEvent,
    ) -> Result<(), CodecError>;
}

/// Concrete codecs for every subsystem.
#[derive(Debug, Default)]
pub struct CodecRegistry {
    pub ppm: PpmCodec,
    pub cp: CpCodec,
    pub cp_roi: CpRoiCodec,
    pub jep: JepCodec,
    pub jep_roi: JepRoiCodec,
    pub rod: RodHeaderCodec,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the codec for a (kind, version, format) combination.
    pub fn lookup(
        &self,
        kind: SubsystemKind,
        version: u8,
        format: u8,
    ) -> Result<&dyn FragmentCodec, CodecError> {
        let supported = version == 1
            && match kind {
                SubsystemKind::Ppm => {
                    format == FORMAT_UNCOMPRESSED || format == FORMAT_COMPRESSED
                }
                SubsystemKind::Cp
                | SubsystemKind::Jep
                | SubsystemKind::CpRoi
                | SubsystemKind::JepRoi => format == FORMAT_UNCOMPRESSED,
                SubsystemKind::RodHeader => true,
            };
        if !supported {
            return Err(CodecError::UnsupportedFormat {
                kind,
                version,
                format,
            });
        }
        Ok(match kind {
            SubsystemKind::Ppm => &self.ppm,
            SubsystemKind::Cp => &self.cp,
            SubsystemKind::CpRoi => &self.cp_roi,
            SubsystemKind::Jep => &self.jep,
            SubsystemKind::JepRoi => &self.jep_roi,
            SubsystemKind::RodHeader => &self.rod,
        })
    }
}

/// One configured codec instance plus its diagnostics counters.
///
/// Decode and encode take `&self`; a session can be shared across worker
/// threads processing independent fragments.
#[derive(Debug, Default)]
pub struct CodecSession {
    config: CodecConfig,
    stats: SessionStats,
    registry: CodecRegistry,
}

impl CodecSession {
    pub fn new(config: CodecConfig) -> Self {
        Self {
            config,
            stats: SessionStats::new(),
            registry: CodecRegistry::new(),
        }
    }

    /// Builds a session from a host property map.
    pub fn from_properties(props: &Map<String, Value>) -> Result<Self, CodecError> {
        Ok(Self::new(CodecConfig::from_properties(props)?))
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    /// The topology used for a subsystem, with any configured S-Link
    /// override applied.
    pub fn topology(&self, kind: SubsystemKind) -> Topology {
        Topology::for_kind(kind, &self.config)
    }

    /// Decodes one raw fragment into typed collections, dispatching on the
    /// fragment's source id and its first sub-block header.
    pub fn decode_fragment(&self, words: &[u32]) -> Result<DecodedEvent, CodecError> {
        let frag = RodFragment::parse(words)?;
        let src = frag.source();
        let kind = SubsystemKind::from_subdetector(src.subdetector).ok_or_else(|| {
            CodecError::malformed(
                frag.source_id,
                format!("unknown sub-detector {:#04x}", src.subdetector),
            )
        })?;
        let topo = self.topology(kind);
        self.decode_parsed(&frag, kind, &topo)
    }

    /// As [`decode_fragment`](Self::decode_fragment) but against an
    /// explicit topology.
    pub fn decode_fragment_with(
        &self,
        words: &[u32],
        topo: &Topology,
    ) -> Result<DecodedEvent, CodecError> {
        let frag = RodFragment::parse(words)?;
        let src = frag.source();
        let kind = SubsystemKind::from_subdetector(src.subdetector).ok_or_else(|| {
            CodecError::malformed(
                frag.source_id,
                format!("unknown sub-detector {:#04x}", src.subdetector),
            )
        })?;
        self.decode_parsed(&frag, kind, topo)
    }

    fn decode_parsed(
        &self,
        frag: &RodFragment<'_>,
        kind: SubsystemKind,
        topo: &Topology,
    ) -> Result<DecodedEvent, CodecError> {
        let (version, format) = discover_version_format(frag, &self.config);
        let codec = self.registry.lookup(kind, version, format)?;
        let mut event = DecodedEvent::new();
        event.rod_headers.push(frag.header());
        codec.decode(frag, topo, &self.config, &self.stats, &mut event)?;
        log::trace!(
            "fragment decode phase: {:?}",
            crate::fragment::DecodePhase::Done
        );
        Ok(event)
    }

    /// Parses fragment envelopes only, for the "RODHeaders" location.
    pub fn decode_rod_headers<'a, I>(&self, fragments: I) -> Result<Vec<RodHeader>, CodecError>
    where
        I: IntoIterator<Item = &'a [u32]>,
    {
        self.registry.rod.decode_headers(fragments)
    }

    pub fn encode_trigger_towers(
        &self,
        towers: &[TriggerTower],
        crate_no: u8,
        slink: u8,
    ) -> Result<Vec<u32>, CodecError> {
        let topo = self.topology(SubsystemKind::Ppm);
        self.encode_trigger_towers_with(towers, crate_no, slink, &topo)
    }

    pub fn encode_trigger_towers_with(
        &self,
        towers: &[TriggerTower],
        crate_no: u8,
        slink: u8,
        topo: &Topology,
    ) -> Result<Vec<u32>, CodecError> {
        self.registry
            .ppm
            .encode(towers, crate_no, slink, topo, &self.config, &self.stats)
    }

    pub fn encode_cp(
        &self,
        towers: &[CpmTower],
        hits: &[CpmHits],
        cmm_hits: &[CmmCpHits],
        crate_no: u8,
        slink: u8,
    ) -> Result<Vec<u32>, CodecError> {
        let topo = self.topology(SubsystemKind::Cp);
        self.encode_cp_with(towers, hits, cmm_hits, crate_no, slink, &topo)
    }

    pub fn encode_cp_with(
        &self,
        towers: &[CpmTower],
        hits: &[CpmHits],
        cmm_hits: &[CmmCpHits],
        crate_no: u8,
        slink: u8,
        topo: &Topology,
    ) -> Result<Vec<u32>, CodecError> {
        self.registry
            .cp
            .encode(towers, hits, cmm_hits, crate_no, slink, topo, &self.config)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn encode_jep(
        &self,
        elements: &[JetElement],
        hits: &[JemHits],
        sums: &[JemEtSums],
        cmm_hits: &[CmmJetHits],
        cmm_sums: &[CmmEtSums],
        crate_no: u8,
        slink: u8,
    ) -> Result<Vec<u32>, CodecError> {
        let topo = self.topology(SubsystemKind::Jep);
        self.encode_jep_with(
            elements, hits, sums, cmm_hits, cmm_sums, crate_no, slink, &topo,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn encode_jep_with(
        &self,
        elements: &[JetElement],
        hits: &[JemHits],
        sums: &[JemEtSums],
        cmm_hits: &[CmmJetHits],
        cmm_sums: &[CmmEtSums],
        crate_no: u8,
        slink: u8,
        topo: &Topology,
    ) -> Result<Vec<u32>, CodecError> {
        self.registry.jep.encode(
            elements,
            hits,
            sums,
            cmm_hits,
            cmm_sums,
            crate_no,
            slink,
            topo,
            &self.config,
        )
    }

    /// Encodes CPM RoIs; `roib` selects the RoI-builder destination.
    pub fn encode_cp_roi(
        &self,
        rois: &[CpmRoi],
        crate_no: u8,
        roib: bool,
    ) -> Result<Vec<u32>, CodecError> {
        self.registry.cp_roi.encode(rois, crate_no, roib, &self.config)
    }

    /// Encodes JEM RoIs plus the crate CMM RoI.
    pub fn encode_jep_roi(
        &self,
        rois: &[JemRoi],
        cmm_rois: &[CmmRoi],
        crate_no: u8,
        roib: bool,
    ) -> Result<Vec<u32>, CodecError> {
        self.registry
            .jep_roi
            .encode(rois, cmm_rois, crate_no, roib, &self.config)
    }

    /// Logs the end-of-run statistics now instead of at drop.
    pub fn report_stats(&self) {
        self.stats.report();
    }
}

impl Drop for CodecSession {
    fn drop(&mut self) {
        if self.config.print_comp_stats {
            self.stats.report();
        }
    }
}

/// Version/format selection for decode: read from the first sub-block
/// header when the payload has one, otherwise fall back to the configured
/// defaults (RoI fragments carry bare words, not sub-blocks).
fn discover_version_format(frag: &RodFragment<'_>, cfg: &CodecConfig) -> (u8, u8) {
    let mut words = frag.payload;
    if let Some(&first) = words.first() {
        if UserHeader::is_valid(first) {
            let skip = UserHeader::from_word(first).words().min(words.len());
            words = &words[skip..];
        }
    }
    match words.first() {
        Some(&word)
            if matches!(
                word_type(word),
                SubBlockWordType::DataHeader | SubBlockWordType::ErrorHeader
            ) =>
        {
            let header = SubBlockHeader::from_word(word);
            (header.version, header.format)
        }
        _ => (cfg.data_version, cfg.data_format),
    }
}
