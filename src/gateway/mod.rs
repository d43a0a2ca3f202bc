//! Compiler gateway boundary.
//!
//! A [`CompilerGateway`] turns a completed source map into a tagged
//! [`CompileResult`](crate::store::CompileResult) and answers the current
//! network gas ceiling. Both operations may fail with a transport error;
//! neither is allowed to panic across the pipeline boundary.

mod solc;

pub use solc::SolcGateway;

use crate::chain::ProviderError;
use crate::store::{CompileResult, SourceMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("compiler executable not found: {0}")]
    CompilerMissing(String),

    #[error("compiler invocation failed: {0}")]
    Invocation(String),

    #[error("malformed compiler output: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(#[from] ProviderError),
}

/// External compiler plus chain-query capability.
pub trait CompilerGateway: Send + Sync + 'static {
    /// Compile a completed source map.
    fn compile(&self, sources: &SourceMap) -> Result<CompileResult, GatewayError>;

    /// Current network gas ceiling.
    fn gas_limit(&self) -> Result<u64, GatewayError>;
}
