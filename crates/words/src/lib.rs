//! Word and bit-field cursor primitives for L1Calo byte-stream fragments.
//!
//! Raw read-out-driver fragments are flat sequences of 32-bit words. This
//! crate provides the two cursor layers everything else is built on: a
//! word-level cursor ([`WordReader`] / [`WordWriter`]) for walking fragment
//! structure, and a bit-level cursor ([`BitReader`] / [`BitWriter`]) for the
//! packed sub-block payloads, including the 31-bit streamed mode used by
//! compressed formats.

mod bits;
mod error;
mod reader;
mod writer;

pub use bits::{min_bits, BitReader, BitWriter};
pub use error::OutOfRange;
pub use reader::WordReader;
pub use writer::WordWriter;
