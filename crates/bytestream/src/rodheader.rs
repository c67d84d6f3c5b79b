//! ROD header codec.
//!
//! Extracts the envelope fields of fragments as `RodHeader` primitives
//! ("RODHeaders"), independent of the sub-detector payload format.

use crate::codecs::FragmentCodec;
use crate::config::CodecConfig;
use crate::error::CodecError;
use crate::event::{DecodedEvent, RodHeader};
use crate::fragment::RodFragment;
use crate::stats::SessionStats;
use crate::topology::Topology;

#[derive(Debug, Default)]
pub struct RodHeaderCodec;

impl RodHeaderCodec {
    pub fn new() -> Self {
        Self
    }

    /// Parses each raw fragment and returns its header primitive.
    pub fn decode_headers<'a, I>(&self, fragments: I) -> Result<Vec<RodHeader>, CodecError>
    where
        I: IntoIterator<Item = &'a [u32]>,
    {
        fragments
            .into_iter()
            .map(|words| RodFragment::parse(words).map(|frag| frag.header()))
            .collect()
    }
}

impl FragmentCodec for RodHeaderCodec {
    fn decode(
        &self,
        frag: &RodFragment<'_>,
        _topo: &Topology,
        _cfg: &CodecConfig,
        _stats: &SessionStats,
        out: &mut DecodedEvent,
    ) -> Result<(), CodecError> {
        out.rod_headers.push(frag.header());
        Ok(())
    }
}
