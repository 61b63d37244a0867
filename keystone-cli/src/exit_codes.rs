//! Exit codes following sysexits.h conventions.
//!
//! These codes let deployment scripts tell a bad invocation from schema drift or an
//! unreachable database.

use keystone_core::{KeystoneError, StoreError};

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (missing database URL, bad table override).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Deployed tables do not match the entity indexes.
/// Maps to EX_DATAERR from sysexits.h.
pub const SCHEMA_DRIFT: i32 = 65;

/// Database unreachable.
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const STORE_UNAVAILABLE: i32 = 69;

/// Marker error for a command that found drift and already reported it.
#[derive(Debug)]
pub struct DriftDetected(pub usize);

impl std::fmt::Display for DriftDetected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "schema drift detected ({} mismatch(es))", self.0)
    }
}

impl std::error::Error for DriftDetected {}

/// Marker error for an invalid invocation.
#[derive(Debug)]
pub struct UsageError(pub String);

impl std::fmt::Display for UsageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UsageError {}

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let code = err
            .chain()
            .find_map(classify)
            .unwrap_or(GENERAL_ERROR);

        Self {
            code,
            message: Some(format!("{err:#}")),
        }
    }
}

fn classify(err: &(dyn std::error::Error + 'static)) -> Option<i32> {
    if err.is::<DriftDetected>() {
        return Some(SCHEMA_DRIFT);
    }
    if err.is::<UsageError>() {
        return Some(USAGE_ERROR);
    }
    if let Some(err) = err.downcast_ref::<StoreError>() {
        return match err {
            StoreError::Connection(_) | StoreError::Throttled(_) => Some(STORE_UNAVAILABLE),
            StoreError::Unresolved(_) | StoreError::Validation(_) => Some(USAGE_ERROR),
            _ => None,
        };
    }
    match err.downcast_ref::<KeystoneError>()? {
        KeystoneError::Transient(_) => Some(STORE_UNAVAILABLE),
        KeystoneError::Unresolved(_) => Some(USAGE_ERROR),
        _ => None,
    }
}
