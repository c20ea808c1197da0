// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2026 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! The typed error/outcome pair surfaced at the broker's public boundary.

use thiserror::Error;

/// The partitioned error taxonomy a broker-facing call may return.
///
/// Internal plumbing is free to use [`anyhow::Result`] as the reference crates do;
/// call sites that face the public API convert into one of these variants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// A required field was missing, malformed, or a caller passed an empty/invalid string.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The broker (or a component of it) is not in the lifecycle state the call requires.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A lookup (factory, target, token) failed; usually downgraded to a warning, not an error.
    #[error("not found: {0}")]
    NotFound(String),

    /// The adapter does not support the requested capability (e.g. subscription on a sink-only protocol).
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// An operation exceeded its allotted time (reserved for adapters; the broker itself has no timeouts).
    #[error("timeout: {0}")]
    Timeout(String),

    /// Any other failure, typically a wrapped transport/adapter error.
    #[error("{0}")]
    GenericFail(String),
}

impl BrokerError {
    /// Returns the opaque error-code string named in the external-interfaces section.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid-argument",
            Self::InvalidState(_) => "invalid-state",
            Self::NotFound(_) => "not-found",
            Self::NotImplemented(_) => "not-implemented",
            Self::Timeout(_) => "timeout",
            Self::GenericFail(_) => "generic-fail",
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    pub fn generic_fail(msg: impl Into<String>) -> Self {
        Self::GenericFail(msg.into())
    }
}

impl From<anyhow::Error> for BrokerError {
    fn from(e: anyhow::Error) -> Self {
        Self::GenericFail(e.to_string())
    }
}

/// The two success codes named alongside the error taxonomy.
///
/// Kept distinct from `Result::Ok(())` so callers can distinguish "did the work"
/// from "there was nothing to do" (e.g. `Initialize` called twice, `unsubscribe`
/// of an unknown token).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerOutcome {
    /// The call performed the requested work.
    Ok,
    /// The call was a no-op: the precondition for doing work was already satisfied,
    /// or the target of the call did not exist.
    OkNoop,
}

impl BrokerOutcome {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::OkNoop => "ok-noop",
        }
    }

    #[must_use]
    pub fn is_noop(self) -> bool {
        matches!(self, Self::OkNoop)
    }
}

/// Convenience alias for broker-facing results.
pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(BrokerError::invalid_argument("x"), "invalid-argument")]
    #[case(BrokerError::invalid_state("x"), "invalid-state")]
    #[case(BrokerError::not_found("x"), "not-found")]
    #[case(BrokerError::not_implemented("x"), "not-implemented")]
    #[case(BrokerError::generic_fail("x"), "generic-fail")]
    fn test_error_code_partition(#[case] err: BrokerError, #[case] expected: &str) {
        assert_eq!(err.code(), expected);
    }

    #[rstest]
    fn test_outcome_codes() {
        assert_eq!(BrokerOutcome::Ok.code(), "ok");
        assert_eq!(BrokerOutcome::OkNoop.code(), "ok-noop");
        assert!(BrokerOutcome::OkNoop.is_noop());
        assert!(!BrokerOutcome::Ok.is_noop());
    }

    #[rstest]
    fn test_from_anyhow() {
        let e: anyhow::Error = anyhow::anyhow!("boom");
        let broker_err: BrokerError = e.into();
        assert_eq!(broker_err.code(), "generic-fail");
    }
}
