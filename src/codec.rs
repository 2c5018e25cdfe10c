//! Payload codecs for task envelopes.
//!
//! Two codecs travel with every task:
//! - the **payload codec** (bincode): compact binary encoding of the
//!   attribute set carried in the envelope's `payload` field;
//! - the **closure codec** (serde_json): encoding of closure calls and
//!   delegate contexts, whose operator names are resolved against the same
//!   session registry on the worker.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encode a value with the compact binary payload codec.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a value produced by [`encode`]. Truncated or foreign input fails
/// with a codec error.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Encode a closure-side value (operator call or delegate context).
pub fn encode_object<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a closure-side value produced by [`encode_object`].
pub fn decode_object<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use uuid::Uuid;

    use super::*;
    use crate::error::FlowgridError;
    use crate::task::TaskAttrs;

    #[test]
    fn test_attrs_round_trip() {
        let mut input_files = HashMap::new();
        input_files.insert("in.txt".to_string(), PathBuf::from("/shared/abc"));
        input_files.insert("ref.fa".to_string(), PathBuf::from("/shared/ref.fa"));

        let attrs = TaskAttrs {
            task_id: Uuid::new_v4(),
            name: "align (1)".to_string(),
            work_dir: PathBuf::from("/shared/work/ab/cdef"),
            target_dir: PathBuf::from("/shared/results"),
            input_files,
            output_files: vec!["*.bam".to_string(), "**/*.log".to_string()],
        };

        let bytes = encode(&attrs).unwrap();
        let decoded: TaskAttrs = decode(&bytes).unwrap();
        assert_eq!(decoded, attrs);
    }

    #[test]
    fn test_truncated_payload_fails() {
        let attrs = TaskAttrs {
            task_id: Uuid::new_v4(),
            name: "t".to_string(),
            work_dir: PathBuf::from("/w"),
            target_dir: PathBuf::from("/t"),
            input_files: HashMap::new(),
            output_files: Vec::new(),
        };

        let bytes = encode(&attrs).unwrap();
        let result: Result<TaskAttrs> = decode(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(FlowgridError::Codec(_))));
    }

    #[test]
    fn test_object_round_trip() {
        let value = serde_json::json!({"sum": 3, "names": ["a", "b"]});
        let bytes = encode_object(&value).unwrap();
        let decoded: serde_json::Value = decode_object(&bytes).unwrap();
        assert_eq!(decoded, value);
    }
}
