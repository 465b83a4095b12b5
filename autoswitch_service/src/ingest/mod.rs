//! Device listing sources.
//!
//! A source only returns the raw JSON body; shape checks and the validity
//! filter live in the fetcher so every source is held to the same rules.
//!
//! Submodules:
//! - `api`: the backend's authenticated `/devices` endpoint over HTTP.

pub mod api;

use async_trait::async_trait;
use serde_json::Value;

use crate::model::FetchError;

/// Anything that can produce the raw device listing.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// Fetches the listing body once. No retries at this level.
    async fn fetch_raw(&self) -> Result<Value, FetchError>;
}

/// Extracts the record array from a listing body.
///
/// The backend wraps collections as `{ "data": [...] }`; a bare array is
/// accepted too. Anything else is an `InvalidShape` error.
pub fn unwrap_records(body: Value) -> Result<Vec<Value>, FetchError> {
    match body {
        Value::Array(records) => Ok(records),
        Value::Object(mut envelope) => match envelope.remove("data") {
            Some(Value::Array(records)) => Ok(records),
            Some(other) => Err(FetchError::InvalidShape(format!(
                "\"data\" is {}, expected an array",
                json_kind(&other)
            ))),
            None => Err(FetchError::InvalidShape(
                "object without a \"data\" array".to_string(),
            )),
        },
        other => Err(FetchError::InvalidShape(format!(
            "body is {}, expected an array",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
