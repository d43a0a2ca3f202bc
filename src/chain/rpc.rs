//! JSON-RPC 2.0 over HTTP POST.

use super::ProviderError;
use serde_json::{Value, json};
use std::io::Read;

/// Responses larger than this are treated as malformed.
const MAX_RESPONSE_BYTES: u64 = 4 * 1024 * 1024;

/// Perform one JSON-RPC call and return its `result` value.
pub fn call(url: &str, method: &str, params: Value) -> Result<Value, ProviderError> {
    let body = serde_json::to_vec(&json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1
    }))
    .map_err(|error| ProviderError::Rpc(format!("failed to serialize {method} request: {error}")))?;

    let response = ureq::post(url)
        .set("content-type", "application/json")
        .send_bytes(&body)
        .map_err(|error| match error {
            ureq::Error::Status(status, _) => {
                ProviderError::Rpc(format!("{method} returned status {status}"))
            }
            ureq::Error::Transport(transport) => {
                ProviderError::Rpc(format!("{method} transport failed: {transport}"))
            }
        })?;

    let mut raw = Vec::new();
    response
        .into_reader()
        .take(MAX_RESPONSE_BYTES)
        .read_to_end(&mut raw)
        .map_err(|error| ProviderError::Rpc(format!("failed to read {method} response: {error}")))?;

    let value: Value = serde_json::from_slice(&raw)
        .map_err(|error| ProviderError::Rpc(format!("failed to parse {method} response: {error}")))?;

    if let Some(error) = value.get("error") {
        return Err(ProviderError::Rpc(format!(
            "node returned error for {method}: {error}"
        )));
    }
    value
        .get("result")
        .cloned()
        .ok_or_else(|| ProviderError::Rpc(format!("{method} result was missing")))
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(raw: &str, what: &str) -> Result<u64, ProviderError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16)
        .map_err(|error| ProviderError::Rpc(format!("invalid {what} quantity `{raw}`: {error}")))
}

/// Read a quantity that nodes report either as a JSON number or a hex
/// string.
pub fn quantity(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => parse_hex_u64(s, "quantity").ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0x1c9c380", "gasLimit").unwrap(), 30_000_000);
        assert_eq!(parse_hex_u64("ff", "gasLimit").unwrap(), 255);
        assert!(parse_hex_u64("0xzz", "gasLimit").is_err());
    }

    #[test]
    fn test_quantity_accepts_number_and_hex() {
        assert_eq!(quantity(&json!(42)), Some(42));
        assert_eq!(quantity(&json!("0x2a")), Some(42));
        assert_eq!(quantity(&json!(null)), None);
    }
}
