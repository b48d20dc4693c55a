use serde_json::Value;
use std::fmt;

/// A single record-ingest message parsed far enough to dispatch it, and no further.
///
/// Only `DATA_SOURCE` and `RECORD_ID` are pulled out; every other field is opaque and is
/// forwarded to the engine verbatim as part of `raw`. This crate never validates or transforms
/// record contents beyond extracting these two identifiers.
#[derive(Debug, Clone)]
pub struct Record {
    pub data_source: String,
    pub record_id: String,
    /// The full message body, trimmed of leading/trailing whitespace, forwarded verbatim.
    pub raw: String,
}

#[derive(Debug)]
pub struct RecordParseError(anyhow::Error);

impl fmt::Display for RecordParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid record: {:#}", self.0)
    }
}

impl std::error::Error for RecordParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl Record {
    /// Parse a record out of a raw message body.
    ///
    /// The body is trimmed first; the trimmed form is what gets stored in `raw` and what
    /// eventually reaches `EngineAdapter::process` verbatim.
    pub fn parse(body: &str) -> Result<Self, RecordParseError> {
        let trimmed = body.trim();
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|err| RecordParseError(anyhow::Error::new(err).context("decode record json")))?;

        let obj = value
            .as_object()
            .ok_or_else(|| RecordParseError(anyhow::anyhow!("record body must be a JSON object")))?;

        let data_source = required_string(obj, "DATA_SOURCE")?;
        let record_id = required_string(obj, "RECORD_ID")?;

        Ok(Self {
            data_source,
            record_id,
            raw: trimmed.to_string(),
        })
    }
}

fn required_string(
    obj: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<String, RecordParseError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RecordParseError(anyhow::anyhow!("missing required string field {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_fields_and_keeps_raw_trimmed() {
        let rec = Record::parse("  {\"DATA_SOURCE\":\"A\",\"RECORD_ID\":\"1\",\"NAME\":\"x\"}  \n")
            .expect("parse");
        assert_eq!(rec.data_source, "A");
        assert_eq!(rec.record_id, "1");
        assert_eq!(rec.raw, "{\"DATA_SOURCE\":\"A\",\"RECORD_ID\":\"1\",\"NAME\":\"x\"}");
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Record::parse("not json").is_err());
    }

    #[test]
    fn rejects_missing_record_id() {
        let err = Record::parse(r#"{"DATA_SOURCE":"A"}"#).unwrap_err();
        assert!(err.to_string().contains("RECORD_ID"));
    }

    #[test]
    fn rejects_non_object_body() {
        assert!(Record::parse("[1,2,3]").is_err());
    }
}
