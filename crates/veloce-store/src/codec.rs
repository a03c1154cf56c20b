use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// Converts documents to bytes and back.
pub trait Serializer: Send + Sync {
    /// Encode `value`. `indent` is the number of spaces per nesting level;
    /// `None` produces compact output.
    fn encode(&self, value: &Value, indent: Option<usize>) -> StoreResult<Vec<u8>>;

    /// Decode bytes previously produced by [`encode`](Self::encode) (or
    /// written by hand).
    fn decode(&self, bytes: &[u8]) -> StoreResult<Value>;
}

/// UTF-8 JSON, formatted like `JSON.stringify(value, null, indent)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode(&self, value: &Value, indent: Option<usize>) -> StoreResult<Vec<u8>> {
        let Some(width) = indent.filter(|w| *w > 0) else {
            return serde_json::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()));
        };

        let indent = vec![b' '; width];
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(&indent);
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value
            .serialize(&mut ser)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> StoreResult<Value> {
        // Editors commonly prepend a byte order mark to UTF-8 files.
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        serde_json::from_slice(bytes).map_err(|e| StoreError::Decode(e.to_string()))
    }
}
