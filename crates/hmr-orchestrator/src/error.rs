// SPDX-License-Identifier: Apache-2.0
//! Orchestrator error type (`spec.md` §7 "Error taxonomy").

use hmr_core::ReturnCode;

/// Errors the orchestrator's public operations can return.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// No samples have been recorded for the requested agent.
    #[error("no samples recorded for agent {0}")]
    UnknownAgent(String),
    /// A baseline has not been configured for regression gating.
    #[error("no baseline configured")]
    NoBaseline,
}

impl OrchestratorError {
    /// Map this error to the uniform [`ReturnCode`] space (`spec.md` §6).
    #[must_use]
    pub const fn code(&self) -> ReturnCode {
        match self {
            Self::UnknownAgent(_) | Self::NoBaseline => ReturnCode::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps_to_a_return_code() {
        assert_eq!(
            OrchestratorError::UnknownAgent("sim".into()).code() as i32,
            ReturnCode::NotFound as i32
        );
        assert_eq!(OrchestratorError::NoBaseline.code() as i32, ReturnCode::NotFound as i32);
    }
}
