//! Field-class codecs. Every record field belongs to one of four classes and
//! the functions here are the only path between in-memory values and the
//! strings the store holds.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Num,
    Text,
    Json,
    Date,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Num(i64),
    Text(String),
    Json(serde_json::Value),
    Date(DateTime<Utc>),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid number \"{0}\"")]
    Number(String),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid timestamp \"{0}\"")]
    Timestamp(String),
    #[error("value does not hold a {0}")]
    Shape(&'static str),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Num(_) => FieldKind::Num,
            Self::Text(_) => FieldKind::Text,
            Self::Json(_) => FieldKind::Json,
            Self::Date(_) => FieldKind::Date,
        }
    }

    pub fn into_num(self) -> Result<i64, CodecError> {
        match self {
            Self::Num(n) => Ok(n),
            _ => Err(CodecError::Shape("number")),
        }
    }

    pub fn into_text(self) -> Result<String, CodecError> {
        match self {
            Self::Text(s) => Ok(s),
            _ => Err(CodecError::Shape("text")),
        }
    }

    pub fn into_json(self) -> Result<serde_json::Value, CodecError> {
        match self {
            Self::Json(v) => Ok(v),
            _ => Err(CodecError::Shape("json value")),
        }
    }

    pub fn into_date(self) -> Result<DateTime<Utc>, CodecError> {
        match self {
            Self::Date(d) => Ok(d),
            _ => Err(CodecError::Shape("timestamp")),
        }
    }
}

/// Encode a value for storage. Timestamps become fractional UNIX seconds.
pub fn store_val(value: &FieldValue) -> String {
    match value {
        FieldValue::Num(n) => n.to_string(),
        FieldValue::Text(s) => s.clone(),
        FieldValue::Json(v) => v.to_string(),
        FieldValue::Date(d) => {
            let seconds = d.timestamp() as f64 + f64::from(d.timestamp_subsec_micros()) / 1e6;
            format!("{seconds:.6}")
        }
    }
}

/// Decode a stored string back into a value of the given class.
pub fn use_val(raw: &str, kind: FieldKind) -> Result<FieldValue, CodecError> {
    match kind {
        FieldKind::Num => raw
            .trim()
            .parse::<i64>()
            .map(FieldValue::Num)
            .map_err(|_| CodecError::Number(raw.to_owned())),
        FieldKind::Text => Ok(FieldValue::Text(raw.to_owned())),
        FieldKind::Json => Ok(FieldValue::Json(serde_json::from_str(raw)?)),
        FieldKind::Date => {
            let seconds: f64 = raw
                .trim()
                .parse()
                .map_err(|_| CodecError::Timestamp(raw.to_owned()))?;
            let whole = seconds.floor();
            let nanos = ((seconds - whole) * 1e9).round() as u32;
            DateTime::<Utc>::from_timestamp(whole as i64, nanos)
                .map(FieldValue::Date)
                .ok_or_else(|| CodecError::Timestamp(raw.to_owned()))
        }
    }
}
