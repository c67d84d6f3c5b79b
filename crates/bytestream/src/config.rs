//! Codec configuration.
//!
//! The host hands every codec instance an opaque key/value property map at
//! construction time. [`CodecConfig`] resolves it against the documented
//! defaults once; the resulting struct is immutable and passed explicitly
//! to decode/encode.

use serde_json::{Map, Value};

use crate::error::CodecError;

/// Immutable configuration-with-defaults for one codec session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    /// Format version number written to sub-block headers (3-bit field).
    pub data_version: u8,
    /// Format identifier: 1 uncompressed, 2 compressed.
    pub data_format: u8,
    /// S-Links per crate; `None` uses the per-subsystem default.
    pub slinks_per_crate: Option<u8>,
    /// PPM compression scheme selector (sub-block sequence number).
    pub compression_version: u8,
    /// FADC pedestal, the compression baseline.
    pub pedestal_value: u16,
    /// Omit quiet PPM channels from the encoded fragment.
    pub zero_suppress: bool,
    /// LUT slices used when an input collection is empty.
    pub default_slices_lut: usize,
    /// FADC slices used when an input collection is empty.
    pub default_slices_fadc: usize,
    /// If nonzero, overrides the FADC slice count on encode.
    pub force_slices_fadc: usize,
    /// Log compression statistics at end-of-run.
    pub print_comp_stats: bool,
    /// Channel anomalies tolerated per fragment before the whole fragment
    /// fails.
    pub error_max: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            data_version: 1,
            data_format: 1,
            slinks_per_crate: None,
            compression_version: 1,
            pedestal_value: 10,
            zero_suppress: false,
            default_slices_lut: 1,
            default_slices_fadc: 7,
            force_slices_fadc: 0,
            print_comp_stats: false,
            error_max: 1,
        }
    }
}

impl CodecConfig {
    /// Builds a configuration from a host property map. Absent keys take
    /// their defaults, unknown keys are ignored, wrongly-typed or
    /// out-of-range values are an error.
    pub fn from_properties(props: &Map<String, Value>) -> Result<Self, CodecError> {
        let mut cfg = Self::default();
        if let Some(v) = props.get("DataVersion") {
            cfg.data_version = uint(v, "DataVersion", 7)? as u8;
        }
        if let Some(v) = props.get("DataFormat") {
            cfg.data_format = uint(v, "DataFormat", 7)? as u8;
        }
        if let Some(v) = props.get("SlinksPerCrate") {
            let slinks = uint(v, "SlinksPerCrate", 4)?;
            if slinks == 0 {
                return Err(CodecError::Config(
                    "SlinksPerCrate must be at least 1".into(),
                ));
            }
            cfg.slinks_per_crate = Some(slinks as u8);
        }
        if let Some(v) = props.get("CompressionVersion") {
            cfg.compression_version = uint(v, "CompressionVersion", 63)? as u8;
        }
        if let Some(v) = props.get("PedestalValue") {
            cfg.pedestal_value = uint(v, "PedestalValue", 0x3ff)? as u16;
        }
        if let Some(v) = props.get("ZeroSuppress") {
            cfg.zero_suppress = flag(v, "ZeroSuppress")?;
        }
        if let Some(v) = props.get("DefaultSlicesLUT") {
            cfg.default_slices_lut = nonzero(v, "DefaultSlicesLUT")?;
        }
        if let Some(v) = props.get("DefaultSlicesFADC") {
            cfg.default_slices_fadc = nonzero(v, "DefaultSlicesFADC")?;
        }
        if let Some(v) = props.get("ForceSlicesFADC") {
            cfg.force_slices_fadc = uint(v, "ForceSlicesFADC", 15)? as usize;
        }
        if let Some(v) = props.get("PrintCompStats") {
            cfg.print_comp_stats = flag(v, "PrintCompStats")?;
        }
        if let Some(v) = props.get("ErrorMax") {
            cfg.error_max = uint(v, "ErrorMax", u64::from(u32::MAX))? as u32;
        }
        Ok(cfg)
    }

    /// FADC slice count actually written: the forced count when set, else
    /// the count found in the data (or the default for empty input).
    pub fn effective_slices_fadc(&self, from_data: usize) -> usize {
        if self.force_slices_fadc > 0 {
            self.force_slices_fadc
        } else {
            from_data
        }
    }
}

fn uint(v: &Value, key: &str, max: u64) -> Result<u64, CodecError> {
    let n = v
        .as_u64()
        .ok_or_else(|| CodecError::Config(format!("{key} must be a non-negative integer")))?;
    if n > max {
        return Err(CodecError::Config(format!("{key} = {n} exceeds maximum {max}")));
    }
    Ok(n)
}

fn nonzero(v: &Value, key: &str) -> Result<usize, CodecError> {
    let n = uint(v, key, 15)?;
    if n == 0 {
        return Err(CodecError::Config(format!("{key} must be at least 1")));
    }
    Ok(n as usize)
}

/// Boolean properties historically arrive as ints as often as bools.
fn flag(v: &Value, key: &str) -> Result<bool, CodecError> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_u64().unwrap_or(0) != 0),
        _ => Err(CodecError::Config(format!("{key} must be a bool or int"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_defaults() {
        let cfg = CodecConfig::from_properties(&Map::new()).unwrap();
        assert_eq!(cfg, CodecConfig::default());
        assert_eq!(cfg.pedestal_value, 10);
        assert_eq!(cfg.default_slices_fadc, 7);
        assert_eq!(cfg.error_max, 1);
        assert!(cfg.slinks_per_crate.is_none());
    }

    #[test]
    fn test_overrides() {
        let cfg = CodecConfig::from_properties(&props(json!({
            "DataFormat": 2,
            "SlinksPerCrate": 2,
            "ZeroSuppress": 1,
            "ForceSlicesFADC": 5,
            "ErrorMax": 10,
            "SomeUnknownKey": "ignored",
        })))
        .unwrap();
        assert_eq!(cfg.data_format, 2);
        assert_eq!(cfg.slinks_per_crate, Some(2));
        assert!(cfg.zero_suppress);
        assert_eq!(cfg.effective_slices_fadc(7), 5);
        assert_eq!(cfg.error_max, 10);
    }

    #[test]
    fn test_bad_types_rejected() {
        assert!(CodecConfig::from_properties(&props(json!({"DataVersion": "one"}))).is_err());
        assert!(CodecConfig::from_properties(&props(json!({"ZeroSuppress": "yes"}))).is_err());
        assert!(CodecConfig::from_properties(&props(json!({"DefaultSlicesLUT": 0}))).is_err());
        assert!(CodecConfig::from_properties(&props(json!({"SlinksPerCrate": 5}))).is_err());
    }
}
