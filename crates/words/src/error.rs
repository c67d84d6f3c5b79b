use thiserror::Error;

/// Cursor violation: a read crossed the end of the buffer, or a value does
/// not fit the requested field width.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum OutOfRange {
    #[error("read of {nbits} bits at word {word} crosses the buffer end")]
    Read { word: usize, nbits: usize },
    #[error("value {value:#x} does not fit in {nbits} bits")]
    Value { value: u32, nbits: usize },
    #[error("field width {nbits} exceeds the {max} usable bits per word")]
    Width { nbits: usize, max: usize },
}
