//! JSON-RPC 2.0 envelope building and strict dissection.
//!
//! Dissection enforces the envelope rules rather than deserializing loosely:
//! unknown members are rejected by name, required members are checked, and
//! the version string must be exactly `"2.0"`. The produced error strings are
//! surfaced to peers in the `data` member of error replies.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Standard JSON-RPC 2.0 error codes.
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Implementation-specific codes.
pub const CAPACITY_FAILURE: i64 = -1;
pub const EMAD_FAILURE: i64 = -2;

/// Why an envelope failed dissection; the message is peer-facing.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct DissectError(pub String);

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_object(value: &Value) -> Result<&serde_json::Map<String, Value>, DissectError> {
    value.as_object().ok_or_else(|| {
        DissectError(format!(
            "Value expected to be an object, but is {}",
            type_name(value)
        ))
    })
}

fn expect_string<'a>(key: &str, value: &'a Value) -> Result<&'a str, DissectError> {
    value.as_str().ok_or_else(|| {
        DissectError(format!(
            "The member {key} is expected to be a string, but is {}",
            type_name(value)
        ))
    })
}

fn required<T>(key: &str, value: Option<T>) -> Result<T, DissectError> {
    value.ok_or_else(|| DissectError(format!("Required member {key} not present")))
}

fn check_version(version: &str) -> Result<(), DissectError> {
    if version != "2.0" {
        return Err(DissectError(format!(
            "Unsupported jsonrpc version: {version}"
        )));
    }
    Ok(())
}

/// A dissected request. `id` keeps its JSON shape; any type is allowed.
#[derive(Clone, Debug)]
pub struct Request {
    pub id: Value,
    pub method: String,
    pub params: Option<Value>,
}

pub fn dissect_request(value: &Value) -> Result<Request, DissectError> {
    let obj = as_object(value)?;

    let mut version = None;
    let mut id = None;
    let mut method = None;
    let mut params = None;
    for (key, val) in obj {
        match key.as_str() {
            "jsonrpc" => version = Some(expect_string(key, val)?),
            "id" => id = Some(val.clone()),
            "method" => method = Some(expect_string(key, val)?.to_owned()),
            "params" => params = Some(val.clone()),
            _ => {
                return Err(DissectError(format!("The member {key} is not expected")));
            }
        }
    }

    check_version(required("jsonrpc", version)?)?;
    Ok(Request {
        id: required("id", id)?,
        method: required("method", method)?,
        params,
    })
}

/// A dissected response: exactly one of `result`/`error`, carried in
/// `payload` with `is_error` telling which.
#[derive(Clone, Debug)]
pub struct Response {
    pub id: Value,
    pub payload: Value,
    pub is_error: bool,
}

pub fn dissect_response(value: &Value) -> Result<Response, DissectError> {
    let obj = as_object(value)?;

    let mut version = None;
    let mut id = None;
    let mut result = None;
    let mut error = None;
    for (key, val) in obj {
        match key.as_str() {
            "jsonrpc" => version = Some(expect_string(key, val)?),
            "id" => id = Some(val.clone()),
            "result" => result = Some(val.clone()),
            "error" => {
                as_object(val)
                    .map_err(|_| {
                        DissectError(format!(
                            "The member error is expected to be an object, but is {}",
                            type_name(val)
                        ))
                    })?;
                error = Some(val.clone());
            }
            _ => {
                return Err(DissectError(format!("The member {key} is not expected")));
            }
        }
    }

    check_version(required("jsonrpc", version)?)?;
    let id = required("id", id)?;
    match (result, error) {
        (Some(_), Some(_)) => Err(DissectError(
            "Both error and result present in jsonrpc response".into(),
        )),
        (None, None) => Err(DissectError(
            "Neither error nor result present in jsonrpc response".into(),
        )),
        (Some(result), None) => Ok(Response {
            id,
            payload: result,
            is_error: false,
        }),
        (None, Some(error)) => Ok(Response {
            id,
            payload: error,
            is_error: true,
        }),
    }
}

/// The `error` member of a response.
#[derive(Clone, Debug)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

pub fn dissect_error(value: &Value) -> Result<RpcError, DissectError> {
    let obj = as_object(value)?;

    let mut code = None;
    let mut message = None;
    let mut data = None;
    for (key, val) in obj {
        match key.as_str() {
            "code" => {
                code = Some(val.as_i64().ok_or_else(|| {
                    DissectError(format!(
                        "The member code is expected to be a number, but is {}",
                        type_name(val)
                    ))
                })?);
            }
            "message" => message = Some(expect_string(key, val)?.to_owned()),
            "data" => data = Some(val.clone()),
            _ => {
                return Err(DissectError(format!("The member {key} is not expected")));
            }
        }
    }

    Ok(RpcError {
        code: required("code", code)?,
        message: required("message", message)?,
        data,
    })
}

/// Methods that take no parameters accept either an absent `params` or an
/// empty object.
pub fn dissect_params_empty(params: Option<&Value>) -> Result<(), DissectError> {
    let Some(params) = params else {
        return Ok(());
    };
    let obj = as_object(params)?;
    if let Some(key) = obj.keys().next() {
        return Err(DissectError(format!("The member {key} is not expected")));
    }
    Ok(())
}

/// Parameters of the `emad` method: `{"payload": <hex string>}`.
pub fn dissect_params_emad(params: Option<&Value>) -> Result<String, DissectError> {
    let params = required("params", params)?;
    let obj = as_object(params)?;

    let mut payload = None;
    for (key, val) in obj {
        match key.as_str() {
            "payload" => payload = Some(expect_string(key, val)?.to_owned()),
            _ => {
                return Err(DissectError(format!("The member {key} is not expected")));
            }
        }
    }
    required("payload", payload)
}

/// One row of the `stats` result.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StatsCounter {
    pub name: String,
    pub descr: String,
    pub value: i64,
    pub capacity: u64,
}

pub fn dissect_stats(result: &Value) -> Result<Vec<StatsCounter>, DissectError> {
    let obj = as_object(result)?;

    let mut counters = None;
    for (key, val) in obj {
        match key.as_str() {
            "counters" => {
                if !val.is_array() {
                    return Err(DissectError(format!(
                        "The member counters is expected to be an array, but is {}",
                        type_name(val)
                    )));
                }
                counters = Some(val.clone());
            }
            _ => {
                return Err(DissectError(format!("The member {key} is not expected")));
            }
        }
    }

    serde_json::from_value(required("counters", counters)?)
        .map_err(|err| DissectError(format!("Invalid counter object: {err}")))
}

pub fn request(id: i64, method: &str, params: Option<Value>) -> Value {
    let mut obj = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
    });
    if let Some(params) = params {
        obj["params"] = params;
    }
    obj
}

pub fn result_response(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

pub fn error_response(id: &Value, code: i64, message: &str, data: Option<&str>) -> Value {
    let mut error = json!({
        "code": code,
        "message": message,
    });
    if let Some(data) = data {
        error["data"] = Value::String(data.to_owned());
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": error,
    })
}
