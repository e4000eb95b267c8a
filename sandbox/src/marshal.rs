//! Value marshalling between the host and guest contracts.
//!
//! Guests exchange JSON text whose numbers are IEEE-754 doubles, so plain
//! numbers are only exact up to 2^53 - 1. Integers beyond that travel as a
//! boxed object `{"$int64":"<decimal>"}`. Host to guest always chooses the
//! exact form; guest to host refuses any number it cannot convert exactly.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use ledgerbox_primitives::{ContractError, HostValue, MAX_SAFE_INTEGER};

/// Key of the boxed 64-bit integer object.
pub const INT64_TAG: &str = "$int64";

/// Malformed bytes received from a guest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid encoding: {0}")]
pub struct DecodeError(pub String);

/// A value as guest code sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Null,
    Bool(bool),
    Number(f64),
    Int64(i64),
    String(String),
    Array(Vec<ScriptValue>),
    Object(BTreeMap<String, ScriptValue>),
}

impl ScriptValue {
    pub fn to_json_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::Int64(i) => {
                let mut boxed = Map::new();
                boxed.insert(INT64_TAG.to_string(), Value::String(i.to_string()));
                Value::Object(boxed)
            }
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json_value).collect()),
            Self::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json_value()))
                    .collect(),
            ),
        }
    }

    pub fn from_json_value(value: Value) -> Result<Self, DecodeError> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            // Every JSON number is a double on the guest side.
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(
                items
                    .into_iter()
                    .map(Self::from_json_value)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(tagged) = map.get(INT64_TAG) {
                        return parse_boxed_int64(tagged).map(Self::Int64);
                    }
                }
                Self::Object(
                    map.into_iter()
                        .map(|(k, v)| Self::from_json_value(v).map(|v| (k, v)))
                        .collect::<Result<_, _>>()?,
                )
            }
        })
    }
}

fn number_to_json(n: f64) -> Value {
    // Integral doubles in the safe range print without a fraction.
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER as f64 {
        return Value::Number(Number::from(n as i64));
    }
    // Like JSON.stringify, non-finite numbers become null.
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

fn parse_boxed_int64(tagged: &Value) -> Result<i64, DecodeError> {
    tagged
        .as_str()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| DecodeError(format!("'{}' must hold a decimal 64-bit integer string", INT64_TAG)))
}

/// Serialize to the guest wire format.
pub fn encode(value: &ScriptValue) -> Vec<u8> {
    value.to_json_value().to_string().into_bytes()
}

/// Parse guest wire bytes.
pub fn decode(bytes: &[u8]) -> Result<ScriptValue, DecodeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| DecodeError(e.to_string()))?;
    ScriptValue::from_json_value(value)
}

/// Parse a host-call argument list. Empty input means no arguments.
pub fn decode_args(bytes: &[u8]) -> Result<Vec<ScriptValue>, DecodeError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    match decode(bytes)? {
        ScriptValue::Array(items) => Ok(items),
        _ => Err(DecodeError("host call arguments must be a JSON array".into())),
    }
}

/// Host to guest. Exact for every host value.
pub fn host_to_script(value: &HostValue) -> ScriptValue {
    match value {
        HostValue::Null => ScriptValue::Null,
        HostValue::Bool(b) => ScriptValue::Bool(*b),
        HostValue::Int(i) if i.unsigned_abs() <= MAX_SAFE_INTEGER as u64 => {
            ScriptValue::Number(*i as f64)
        }
        HostValue::Int(i) => ScriptValue::Int64(*i),
        HostValue::String(s) => ScriptValue::String(s.clone()),
        HostValue::Array(items) => ScriptValue::Array(items.iter().map(host_to_script).collect()),
        HostValue::Map(map) => ScriptValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), host_to_script(v)))
                .collect(),
        ),
    }
}

/// Guest to host.
///
/// Fails with `ScriptError` for numbers that are fractional, non-finite or
/// outside the safe integer range: converting them would silently change
/// the value.
pub fn script_to_host(value: &ScriptValue) -> Result<HostValue, ContractError> {
    Ok(match value {
        ScriptValue::Null => HostValue::Null,
        ScriptValue::Bool(b) => HostValue::Bool(*b),
        ScriptValue::Number(n) => HostValue::Int(safe_integer(*n)?),
        ScriptValue::Int64(i) => HostValue::Int(*i),
        ScriptValue::String(s) => HostValue::String(s.clone()),
        ScriptValue::Array(items) => HostValue::Array(
            items
                .iter()
                .map(script_to_host)
                .collect::<Result<_, _>>()?,
        ),
        ScriptValue::Object(map) => HostValue::Map(
            map.iter()
                .map(|(k, v)| script_to_host(v).map(|v| (k.clone(), v)))
                .collect::<Result<_, _>>()?,
        ),
    })
}

fn safe_integer(n: f64) -> Result<i64, ContractError> {
    if !n.is_finite() || n.fract() != 0.0 {
        return Err(ContractError::script(format!(
            "number {} has no exact 64-bit integer value",
            n
        )));
    }
    if n.abs() > MAX_SAFE_INTEGER as f64 {
        return Err(ContractError::script(format!(
            "number {} is outside the safe integer range, use a boxed int64",
            n
        )));
    }
    Ok(n as i64)
}
