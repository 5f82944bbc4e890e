use crate::error::Result;
use crate::schema::{RawStatement, RowId, StatementKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// One document to be read as one statement kind.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub file_name: String,
    pub document: Vec<u8>,
    pub kind: StatementKind,
    /// Used when the payload carries no `rok`.
    pub year_hint: Option<i32>,
    /// Overrides the configured tolerance for this request.
    pub tolerance: Option<u64>,
}

impl ExtractionRequest {
    pub fn new(file_name: impl Into<String>, document: Vec<u8>, kind: StatementKind) -> Self {
        Self {
            file_name: file_name.into(),
            document,
            kind,
            year_hint: None,
            tolerance: None,
        }
    }

    pub fn with_year_hint(mut self, year: i32) -> Self {
        self.year_hint = Some(year);
        self
    }

    pub fn with_tolerance(mut self, tolerance: u64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }
}

/// The recognition service. Returns the raw text the model produced.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExtractionEvent {
    Starting {
        file_name: String,
        kind: StatementKind,
    },
    Extracting {
        attempt: usize,
        max_attempts: usize,
    },
    Parsed {
        attempt: usize,
        rows: usize,
    },
    ExtractFailed {
        attempt: usize,
        reason: String,
    },
    ValidationFailed {
        attempt: usize,
        violations: usize,
    },
    Accepted {
        attempt: usize,
    },
    Degraded {
        attempts: usize,
        issues: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionFailure {
    EmptyResponse,
    InvalidPayload(String),
    Service(String),
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::InvalidPayload(reason) => write!(f, "invalid payload: {}", reason),
            Self::Service(reason) => write!(f, "extraction service failed: {}", reason),
        }
    }
}

pub type ExtractionOutcome = std::result::Result<RawStatement, ExtractionFailure>;

/// Calls the extractor once and parses what it returns. Never fails outright.
pub async fn extract_once<E: Extractor + ?Sized>(
    extractor: &E,
    request: &ExtractionRequest,
    prompt: &str,
) -> ExtractionOutcome {
    match extractor.extract(request, prompt).await {
        Ok(text) => parse_payload(&text),
        Err(e) => Err(ExtractionFailure::Service(e.to_string())),
    }
}

/// Parses `{ "rok": <year>, "data": { "<row id>": {...} } }`, normalising row
/// keys to integers. Falls back to [`clean_json_output`] when the text is not
/// JSON as-is.
pub fn parse_payload(text: &str) -> ExtractionOutcome {
    if text.trim().is_empty() {
        return Err(ExtractionFailure::EmptyResponse);
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(first) => serde_json::from_str(&clean_json_output(text))
            .map_err(|_| ExtractionFailure::InvalidPayload(first.to_string()))?,
    };

    let object = value.as_object().ok_or_else(|| {
        ExtractionFailure::InvalidPayload("top level is not an object".to_string())
    })?;

    Ok(RawStatement {
        year: parse_year(object)?,
        rows: normalise_rows(object)?,
    })
}

fn parse_year(object: &Map<String, Value>) -> std::result::Result<Option<i32>, ExtractionFailure> {
    let invalid = |v: &Value| ExtractionFailure::InvalidPayload(format!("'rok' is not a year: {}", v));

    match object.get("rok").or_else(|| object.get("year")) {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Number(n)) => n
            .as_i64()
            .and_then(|y| i32::try_from(y).ok())
            .map(Some)
            .ok_or_else(|| invalid(v)),
        Some(v @ Value::String(s)) => s.trim().parse::<i32>().map(Some).map_err(|_| invalid(v)),
        Some(v) => Err(invalid(v)),
    }
}

fn normalise_rows(
    object: &Map<String, Value>,
) -> std::result::Result<BTreeMap<RowId, Value>, ExtractionFailure> {
    let data = object
        .get("data")
        .or_else(|| object.get("rows"))
        .ok_or_else(|| ExtractionFailure::InvalidPayload("missing 'data'".to_string()))?
        .as_object()
        .ok_or_else(|| ExtractionFailure::InvalidPayload("'data' is not an object".to_string()))?;

    let mut rows = BTreeMap::new();
    for (key, body) in data {
        let id = key.trim().parse::<RowId>().map_err(|_| {
            ExtractionFailure::InvalidPayload(format!("row key '{}' is not an integer", key))
        })?;
        if rows.insert(id, body.clone()).is_some() {
            return Err(ExtractionFailure::InvalidPayload(format!(
                "row {} appears more than once",
                id
            )));
        }
    }

    Ok(rows)
}

/// Strips a Markdown code fence if there is one, otherwise slices from the
/// first `{` to the last `}`.
pub fn clean_json_output(raw: &str) -> String {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body = after
            .strip_prefix("json")
            .or_else(|| after.strip_prefix("JSON"))
            .unwrap_or(after);
        if let Some(end) = body.find("```") {
            return body[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}
