//! JSON codec with a configurable nesting-depth cap.

use core::fmt;

use serde::Serialize;
use serde_json::Value;

/// Default maximum nesting depth for decoded and encoded envelopes.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Encodes and decodes envelope text.
///
/// Structures nested deeper than `max_depth` containers are rejected as a
/// decode (or encode) failure instead of being processed. serde_json's own
/// parser refuses input past its internal recursion limit before this check
/// runs, so the depth walk below operates on already-bounded trees.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    max_depth: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Codec {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Decode one message into a generic value tree.
    pub fn decode(&self, text: &str) -> Result<Value, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        self.check_depth(&value)?;
        Ok(value)
    }

    /// Encode one message to wire text.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<String, CodecError> {
        let value = serde_json::to_value(message)?;
        self.check_depth(&value)?;
        Ok(value.to_string())
    }

    fn check_depth(&self, value: &Value) -> Result<(), CodecError> {
        let depth = depth_of(value);
        if depth > self.max_depth {
            return Err(CodecError::TooDeep {
                depth,
                max: self.max_depth,
            });
        }
        Ok(())
    }
}

/// Nesting depth of a value: scalars are 0, each container level adds 1.
fn depth_of(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth_of).max().unwrap_or(0),
        Value::Object(fields) => 1 + fields.values().map(depth_of).max().unwrap_or(0),
        _ => 0,
    }
}

/// Codec errors.
#[derive(Debug)]
pub enum CodecError {
    Json(serde_json::Error),
    TooDeep { depth: usize, max: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "invalid JSON: {e}"),
            Self::TooDeep { depth, max } => {
                write!(f, "value nested {depth} levels deep exceeds max {max}")
            }
        }
    }
}

impl std::error::Error for CodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::TooDeep { .. } => None,
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_rejects_malformed_text() {
        let codec = Codec::default();
        assert!(matches!(codec.decode("{not json"), Err(CodecError::Json(_))));
    }

    #[test]
    fn decode_accepts_nesting_up_to_the_cap() {
        let codec = Codec::new(3);
        assert!(codec.decode(r#"{"a": [{"b": 1}]}"#).is_ok());
    }

    #[test]
    fn decode_rejects_nesting_past_the_cap() {
        let codec = Codec::new(2);
        let err = codec.decode(r#"{"a": [{"b": 1}]}"#).unwrap_err();
        assert!(matches!(err, CodecError::TooDeep { depth: 3, max: 2 }));
    }

    #[test]
    fn encode_applies_the_same_cap() {
        let codec = Codec::new(1);
        let deep = json!({"a": {"b": 1}});
        assert!(matches!(
            codec.encode(&deep),
            Err(CodecError::TooDeep { .. })
        ));
        assert_eq!(codec.encode(&json!({"a": 1})).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn full_64_bit_integers_survive() {
        let codec = Codec::default();
        let value = codec
            .decode(&format!(r#"{{"big": {}, "neg": {}}}"#, u64::MAX, i64::MIN))
            .unwrap();
        assert_eq!(value["big"].as_u64(), Some(u64::MAX));
        assert_eq!(value["neg"].as_i64(), Some(i64::MIN));
    }

    #[test]
    fn scalars_have_depth_zero() {
        let codec = Codec::new(0);
        assert!(codec.decode("42").is_ok());
        assert!(codec.decode("[]").is_err());
    }
}
