//! `solc --standard-json` gateway.
//!
//! Compilation shells out to the solidity compiler with a standard-json
//! input built from the source map. The gas ceiling comes from the
//! configured RPC endpoint (`eth_getBlockByNumber("latest")`).

use super::{CompilerGateway, GatewayError};
use crate::chain::rpc;
use crate::config::ConfigHandle;
use crate::exec::Cmd;
use crate::log;
use crate::store::{CompileResult, Diagnostic, Severity, SourceLocation, SourceMap};
use serde_json::{Value, json};
use std::path::PathBuf;

pub struct SolcGateway {
    solc: PathBuf,
    config: ConfigHandle,
}

impl SolcGateway {
    /// Locate the compiler binary (config override first, then PATH).
    pub fn new(config: ConfigHandle) -> Result<Self, GatewayError> {
        let solc = match config.load().solc_override() {
            Some(path) => path,
            None => which::which("solc")
                .map_err(|_| GatewayError::CompilerMissing("solc".to_string()))?,
        };
        Ok(Self { solc, config })
    }
}

impl CompilerGateway for SolcGateway {
    fn compile(&self, sources: &SourceMap) -> Result<CompileResult, GatewayError> {
        let input = serde_json::to_vec(&standard_json_input(sources))
            .map_err(|error| GatewayError::Malformed(error.to_string()))?;

        let output = Cmd::new(&self.solc)
            .arg("--standard-json")
            .stdin(input)
            .run()
            .map_err(|error| GatewayError::Invocation(error.to_string()))?;

        parse_standard_output(&output.stdout)
    }

    fn gas_limit(&self) -> Result<u64, GatewayError> {
        let config = self.config.load();
        let result = rpc::call(
            &config.provider.rpc_address,
            "eth_getBlockByNumber",
            json!(["latest", false]),
        )?;
        let raw = result
            .get("gasLimit")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::Malformed("eth_getBlockByNumber result missing gasLimit".to_string())
            })?;
        rpc::parse_hex_u64(raw, "gasLimit").map_err(Into::into)
    }
}

// =============================================================================
// Standard JSON mapping
// =============================================================================

fn standard_json_input(sources: &SourceMap) -> Value {
    json!({
        "language": "Solidity",
        "sources": sources,
        "settings": {
            "outputSelection": {
                "*": {
                    "*": ["abi", "evm.bytecode"]
                }
            }
        }
    })
}

/// Map compiler output to a tagged result: error-severity diagnostics make
/// it a `Failure` carrying the full ordered diagnostic list; otherwise the
/// artifact is a `Success` (sub-error diagnostics are logged).
pub(crate) fn parse_standard_output(raw: &[u8]) -> Result<CompileResult, GatewayError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|error| GatewayError::Malformed(error.to_string()))?;

    let diagnostics: Vec<Diagnostic> = value
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| errors.iter().map(diagnostic_from).collect())
        .unwrap_or_default();

    if diagnostics
        .iter()
        .any(|diagnostic| diagnostic.severity == Severity::Error)
    {
        return Ok(CompileResult::Failure { diagnostics });
    }
    if !diagnostics.is_empty() {
        log!("solc"; "compiled with {} warning(s)", diagnostics.len());
    }

    let contracts = value
        .get("contracts")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    Ok(CompileResult::Success { contracts })
}

fn diagnostic_from(error: &Value) -> Diagnostic {
    let message = error
        .get("formattedMessage")
        .or_else(|| error.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("unknown compiler error")
        .to_string();

    let severity = match error.get("severity").and_then(Value::as_str) {
        Some("warning") => Severity::Warning,
        Some("info") => Severity::Info,
        _ => Severity::Error,
    };

    let location = error.get("sourceLocation").and_then(|location| {
        Some(SourceLocation {
            file: location.get("file")?.as_str()?.to_string(),
            start: location.get("start").and_then(Value::as_i64).unwrap_or(-1),
            end: location.get("end").and_then(Value::as_i64).unwrap_or(-1),
        })
    });

    let mut diagnostic = Diagnostic::new(message, severity);
    if let Some(location) = location {
        diagnostic = diagnostic.with_location(location);
    }
    diagnostic
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_json_input_shape() {
        let mut sources = SourceMap::single("A.sol", "contract A {}");
        sources.insert("B.sol", "contract B {}");

        let input = standard_json_input(&sources);
        assert_eq!(input["language"], "Solidity");
        assert_eq!(input["sources"]["A.sol"]["content"], "contract A {}");
        assert_eq!(
            input["settings"]["outputSelection"]["*"]["*"],
            json!(["abi", "evm.bytecode"])
        );
    }

    #[test]
    fn test_parse_success_output() {
        let raw = json!({
            "contracts": {
                "A.sol": {
                    "A": {
                        "abi": [],
                        "evm": { "bytecode": { "object": "6080" } }
                    }
                }
            }
        });
        let result = parse_standard_output(raw.to_string().as_bytes()).unwrap();
        let CompileResult::Success { contracts } = result else {
            panic!("expected success");
        };
        assert!(contracts.contains_key("A.sol"));
    }

    #[test]
    fn test_parse_error_output_is_failure() {
        let raw = json!({
            "errors": [
                {
                    "message": "Expected ';'",
                    "formattedMessage": "A.sol:2: Expected ';'",
                    "severity": "error",
                    "sourceLocation": { "file": "A.sol", "start": 30, "end": 31 }
                },
                {
                    "message": "unused variable",
                    "severity": "warning"
                }
            ],
            "contracts": {}
        });
        let result = parse_standard_output(raw.to_string().as_bytes()).unwrap();
        let CompileResult::Failure { diagnostics } = result else {
            panic!("expected failure");
        };
        // The full ordered diagnostic list is carried, warnings included.
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].message, "A.sol:2: Expected ';'");
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(
            diagnostics[0].location.as_ref().unwrap().file,
            "A.sol"
        );
        assert_eq!(diagnostics[1].severity, Severity::Warning);
    }

    #[test]
    fn test_parse_warnings_only_is_success() {
        let raw = json!({
            "errors": [
                { "message": "unused variable", "severity": "warning" }
            ],
            "contracts": { "A.sol": { "A": { "abi": [] } } }
        });
        let result = parse_standard_output(raw.to_string().as_bytes()).unwrap();
        assert!(result.is_success());
    }

    #[test]
    fn test_parse_malformed_output() {
        let err = parse_standard_output(b"not json").unwrap_err();
        assert!(matches!(err, GatewayError::Malformed(_)));
    }
}
