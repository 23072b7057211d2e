use serde_json::{Map, Value};

use super::{ChangeResolver, ResolverError};

const ELEMENTS: &str = "elements";
const ID: &str = "id";

/// Append-only list of records, such as a discussion thread.
///
/// Content is a JSON object `{"elements": [...]}`. Each change record is a
/// JSON object with a string `"id"`; it is appended unless an element with
/// the same id already exists, so applying a change twice is harmless.
pub struct CommentFile;

impl CommentFile {
    fn parse_content(content: &[u8]) -> Result<Map<String, Value>, ResolverError> {
        let value: Value = serde_json::from_slice(content)
            .map_err(|e| ResolverError::InvalidContent(e.to_string()))?;
        let Value::Object(object) = value else {
            return Err(ResolverError::InvalidContent(
                "top level is not an object".into(),
            ));
        };
        match object.get(ELEMENTS) {
            Some(Value::Array(elements)) => {
                for element in elements {
                    record_id(element).map_err(|_| {
                        ResolverError::InvalidContent("element without string id".into())
                    })?;
                }
            }
            _ => {
                return Err(ResolverError::InvalidContent(
                    "missing \"elements\" array".into(),
                ));
            }
        }
        Ok(object)
    }
}

fn record_id(record: &Value) -> Result<&str, ResolverError> {
    record
        .get(ID)
        .and_then(Value::as_str)
        .ok_or_else(|| ResolverError::InvalidChange("record without string id".into()))
}

impl ChangeResolver for CommentFile {
    fn name(&self) -> &'static str {
        "CommentFile"
    }

    fn validate_v0(&self, content: &[u8]) -> Result<(), ResolverError> {
        Self::parse_content(content).map(|_| ())
    }

    fn merge(&self, existing: &[u8], changes: &[Vec<u8>]) -> Result<Vec<u8>, ResolverError> {
        let mut object = Self::parse_content(existing)?;
        let Some(Value::Array(elements)) = object.get_mut(ELEMENTS) else {
            return Err(ResolverError::InvalidContent(
                "missing \"elements\" array".into(),
            ));
        };

        for change in changes {
            let record: Value = serde_json::from_slice(change)
                .map_err(|e| ResolverError::InvalidChange(e.to_string()))?;
            if !record.is_object() {
                return Err(ResolverError::InvalidChange("record is not an object".into()));
            }
            let id = record_id(&record)?;
            let present = elements
                .iter()
                .any(|element| element.get(ID).and_then(Value::as_str) == Some(id));
            if !present {
                elements.push(record);
            }
        }

        Ok(serde_json::to_vec(&object)?)
    }
}
