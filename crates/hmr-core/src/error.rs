// SPDX-License-Identifier: Apache-2.0
//! Uniform return-code space and the core error enum.
//!
//! `spec.md` §6 describes "a uniform integer code space... used by all
//! operations" without pinning down a type. [`ReturnCode`] is that type;
//! every crate's error enum can produce one via [`HmrError::code`] so a host
//! that wants a C-ABI-style integer never has to re-derive the mapping.

use std::path::PathBuf;

use thiserror::Error;

/// The uniform return-code space named in `spec.md` §6.
///
/// `0` is success; every other value names a distinct failure class. The
/// discriminants are stable across releases — hosts may persist them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ReturnCode {
    /// The operation completed successfully.
    Ok = 0,
    /// An argument failed validation (e.g. an empty identifier).
    InvalidArgument = -1,
    /// The referenced entity does not exist.
    NotFound = -2,
    /// The caller is not permitted to perform this operation.
    PermissionDenied = -3,
    /// The requested edge/mutation would introduce a dependency cycle.
    CycleDetected = -4,
    /// Two versions are incompatible per the compatibility relation.
    VersionMismatch = -5,
    /// The operation exceeded its deadline.
    Timeout = -6,
    /// A frame or phase exceeded its configured time budget.
    BudgetExceeded = -7,
    /// Two proposed changes conflict and could not be auto-resolved.
    Conflict = -8,
    /// The target is not currently attached/registered.
    NotAttached = -9,
    /// A resource limit (memory, fds, threads) was exhausted.
    ResourceExhausted = -10,
    /// The entity already exists and may not be re-created.
    AlreadyExists = -11,
}

/// Top-level error type for `hmr-core`'s own operations (artifact decoding,
/// version parsing, config loading).
#[derive(Debug, Error)]
pub enum HmrError {
    /// An argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A lookup failed to find the requested entity.
    #[error("not found: {0}")]
    NotFound(String),
    /// Adding an edge would have introduced a cycle.
    #[error("would create cycle: {from} -> {to}")]
    WouldCreateCycle {
        /// Edge source vertex identifier.
        from: String,
        /// Edge destination vertex identifier.
        to: String,
    },
    /// An artifact header failed magic/version validation.
    #[error("invalid artifact header: {0}")]
    InvalidArtifactHeader(String),
    /// I/O failure reading or writing a file under the cache/state roots.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path the I/O operation targeted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Config (de)serialization failure.
    #[error("config error: {0}")]
    Config(String),
}

impl HmrError {
    /// Map this error to the uniform [`ReturnCode`] space.
    #[must_use]
    pub const fn code(&self) -> ReturnCode {
        match self {
            Self::InvalidArgument(_) => ReturnCode::InvalidArgument,
            Self::NotFound(_) => ReturnCode::NotFound,
            Self::WouldCreateCycle { .. } => ReturnCode::CycleDetected,
            Self::InvalidArtifactHeader(_) | Self::Config(_) | Self::Io { .. } => {
                ReturnCode::InvalidArgument
            }
        }
    }
}
