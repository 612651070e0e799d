use crate::domain::contract::StageSchema;
use serde_json::{Map, Value};

/// Key under which unparseable model text is returned.
pub const NARRATIVE_FIELD: &str = "narrative";

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    /// Always carries every field of the schema defaults.
    pub record: Map<String, Value>,
    /// False when no JSON object could be recovered and `record` is defaults plus narrative.
    pub structured: bool,
}

impl ParsedOutput {
    pub fn narrative(&self) -> Option<&str> {
        if self.structured {
            return None;
        }
        self.record.get(NARRATIVE_FIELD).and_then(Value::as_str)
    }
}

/// Removes a surrounding Markdown fence (```json ... ``` or ``` ... ```), if any.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the language tag on the opening line.
    let mut inner = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    if let Some(end) = inner.rfind("```") {
        inner = &inner[..end];
    }
    inner.trim()
}

/// Returns the balanced `{...}` span opening at byte `start`, honouring JSON string escapes.
fn balanced_object_at(text: &str, start: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }

    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Best-effort recovery: the first balanced `{...}` span that parses as a JSON object.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    text.match_indices('{').find_map(|(idx, _)| {
        let span = balanced_object_at(text, idx)?;
        match serde_json::from_str::<Value>(span) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    })
}

fn unwrap_envelope(mut obj: Map<String, Value>, envelope: &str) -> Map<String, Value> {
    match obj.remove(envelope) {
        Some(Value::Object(inner)) => inner,
        Some(other) => {
            obj.insert(envelope.to_string(), other);
            obj
        }
        None => obj,
    }
}

fn fill_defaults(record: &mut Map<String, Value>, defaults: &Map<String, Value>) -> usize {
    let mut filled = 0;
    for (key, default) in defaults {
        let missing = record.get(key).map_or(true, Value::is_null);
        if missing {
            record.insert(key.clone(), default.clone());
            filled += 1;
        }
    }
    filled
}

/// Turns free-form model text into a schema-complete record. Never fails.
///
/// Order: strip a Markdown fence, strict JSON parse, first balanced `{...}` span, and finally
/// the raw text as a narrative field on top of the schema defaults.
pub fn parse_stage_output(raw_text: &str, schema: &StageSchema) -> ParsedOutput {
    let body = strip_code_fence(raw_text);

    let parsed = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Some(map),
        // A fence opened on the same line as the payload strips the payload itself.
        _ => extract_json_object(body).or_else(|| extract_json_object(raw_text)),
    };

    match parsed {
        Some(obj) => {
            let mut record = unwrap_envelope(obj, schema.envelope());
            let filled = fill_defaults(&mut record, &schema.defaults);
            if filled > 0 {
                tracing::debug!(
                    schema = %schema.kind,
                    filled,
                    "stage output missing required fields; defaults substituted"
                );
            }
            ParsedOutput {
                record,
                structured: true,
            }
        }
        None => {
            tracing::warn!(
                schema = %schema.kind,
                len = raw_text.len(),
                "no JSON object in stage output; returning narrative fallback"
            );
            let mut record = schema.defaults.clone();
            record.insert(
                NARRATIVE_FIELD.to_string(),
                Value::String(raw_text.trim().to_string()),
            );
            ParsedOutput {
                record,
                structured: false,
            }
        }
    }
}
