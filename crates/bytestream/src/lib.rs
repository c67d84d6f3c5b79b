//! Byte-stream codecs for L1Calo trigger read-out fragments.
//!
//! Converts between raw read-out-driver (ROD) fragments and typed trigger
//! primitives: PPM trigger towers, CP towers/hits, jet elements and energy
//! sums, RoI words and ROD headers. The host framework owns the event loop
//! and the raw buffers; this crate owns the encode/decode state machines,
//! the multi-version dispatch and the PPM compression scheme.
//!
//! The usual entry point is [`CodecSession`]:
//!
//! ```
//! use l1calo_bytestream::{ChannelId, CodecConfig, CodecSession, TriggerTower};
//!
//! let session = CodecSession::new(CodecConfig::default());
//! let mut tower = TriggerTower::empty(ChannelId::new(0, 0, 7), 1, 7, 0, 3);
//! tower.fadc[3] = 100;
//!
//! let fragment = session.encode_trigger_towers(&[tower.clone()], 0, 0)?;
//! let event = session.decode_fragment(&fragment)?;
//! let decoded = event.trigger_towers.iter().find(|t| t.id == tower.id).unwrap();
//! assert_eq!(decoded.fadc[3], 100);
//! # Ok::<(), l1calo_bytestream::CodecError>(())
//! ```

mod codecs;
mod config;
mod error;
mod stats;

pub mod cp;
pub mod event;
pub mod fragment;
pub mod jep;
pub mod ppm;
pub mod rodheader;
pub mod roi;
pub mod srcid;
pub mod subblock;
pub mod topology;
pub mod user_header;

pub use codecs::{CodecRegistry, CodecSession, FragmentCodec, SubsystemKind};
pub use config::CodecConfig;
pub use error::CodecError;
pub use event::{
    locations, ChannelId, CmmCpHits, CmmEtSums, CmmJetHits, CmmRoi, Collection, CpmHits, CpmRoi,
    CpmTower, DecodedEvent, JemEtSums, JemHits, JemRoi, JetElement, RodHeader, TriggerTower,
};
pub use fragment::{DecodePhase, RodFragment, RodFragmentBuilder};
pub use srcid::SourceId;
pub use stats::SessionStats;
pub use topology::Topology;
pub use user_header::UserHeader;
