//! Decoding tool-call arguments that may still be mid-stream.
//!
//! A buffer that does not yet parse as JSON is *incomplete data*, not an
//! error. Only a structurally valid document of the wrong shape is an error.

use crate::error::{Result, ToolError};
use anyllm_client::ToolCall;
use serde::de::{DeserializeOwned, IgnoredAny};

/// True when `s` is one complete JSON document. Empty input is never valid.
pub fn is_valid_json(s: &str) -> bool {
    !s.is_empty() && serde_json::from_str::<IgnoredAny>(s).is_ok()
}

/// Argument payload in whichever form the caller holds it.
#[derive(Debug, Clone, Copy)]
pub enum RawArguments<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
    Value(&'a serde_json::Value),
}

impl<'a> From<&'a str> for RawArguments<'a> {
    fn from(s: &'a str) -> Self {
        Self::Text(s)
    }
}

impl<'a> From<&'a [u8]> for RawArguments<'a> {
    fn from(b: &'a [u8]) -> Self {
        Self::Bytes(b)
    }
}

impl<'a> From<&'a serde_json::Value> for RawArguments<'a> {
    fn from(v: &'a serde_json::Value) -> Self {
        Self::Value(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    Complete(T),
    Incomplete,
}

impl<T> Parsed<T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    pub fn complete(self) -> Option<T> {
        match self {
            Self::Complete(v) => Some(v),
            Self::Incomplete => None,
        }
    }
}

pub fn parse_arguments_safely<T: DeserializeOwned>(call: &ToolCall) -> Result<Parsed<T>> {
    parse_raw_arguments_safely(RawArguments::Text(&call.function.arguments))
}

pub fn parse_raw_arguments_safely<T: DeserializeOwned>(raw: RawArguments<'_>) -> Result<Parsed<T>> {
    let text = match raw {
        RawArguments::Text(s) => std::borrow::Cow::Borrowed(s),
        RawArguments::Bytes(b) => match std::str::from_utf8(b) {
            Ok(s) => std::borrow::Cow::Borrowed(s),
            // A multi-byte character may be split across fragments.
            Err(_) => return Ok(Parsed::Incomplete),
        },
        RawArguments::Value(v) => std::borrow::Cow::Owned(serde_json::to_string(v).map_err(
            |e| ToolError::InvalidArguments(format!("failed to re-encode arguments: {e}")),
        )?),
    };

    if !is_valid_json(&text) {
        return Ok(Parsed::Incomplete);
    }
    serde_json::from_str(&text)
        .map(Parsed::Complete)
        .map_err(|e| ToolError::InvalidArguments(format!("arguments do not match: {e}")))
}

/// Strict decode for handlers: anything short of a well-shaped document fails.
pub fn parse_arguments<T: DeserializeOwned>(call: &ToolCall) -> Result<T> {
    match parse_arguments_safely(call)? {
        Parsed::Complete(v) => Ok(v),
        Parsed::Incomplete => Err(ToolError::InvalidArguments(format!(
            "incomplete arguments for {}: {:?}",
            call.function.name, call.function.arguments
        ))),
    }
}
