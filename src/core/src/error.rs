//! Error handling for Gatekeeper Core.
//!
//! Administrative operations (role registration, composition, policy
//! mutation) return [`Error`] values that must be handled at setup time.
//! Authorization itself never surfaces store errors to the caller: the
//! enforcer converts them into a fail-closed deny and logs them here.
//!
//! # Usage
//!
//! ```rust,ignore
//! use gatekeeper_core::error::{Error, Result};
//!
//! fn configure(registry: &RoleRegistry) -> Result<()> {
//!     let editor = registry.register("editor")?;
//!     let viewer = registry.register("viewer")?;
//!     registry.add_members(&editor, &[viewer])?;
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, Error>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by embedding applications for
/// programmatic error handling and audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Policy Errors (1000-1099)
    PolicyAlreadyExists,
    PolicyNotFound,

    // Role Errors (1100-1199)
    RoleNotFound,
    RoleCycleDetected,
    InvalidRoleComposition,

    // Storage Errors (2000-2099)
    StoreUnavailable,

    // Serialization Errors (2200-2299)
    SerializationError,

    // Authorization (4000-4099)
    Forbidden,

    // Configuration Errors (5000-5099)
    ConfigurationError,

    // Internal Errors (9000-9099)
    IoError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::PolicyAlreadyExists => 1000,
            Self::PolicyNotFound => 1001,

            Self::RoleNotFound => 1100,
            Self::RoleCycleDetected => 1101,
            Self::InvalidRoleComposition => 1102,

            Self::StoreUnavailable => 2000,

            Self::SerializationError => 2200,

            Self::Forbidden => 4001,

            Self::ConfigurationError => 5000,

            Self::IoError => 9000,
        }
    }

    /// Whether an operation failing with this code may succeed if repeated.
    ///
    /// Only the store backend retries; decisions are never retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable)
    }

    /// Severity used when the error is logged.
    pub const fn severity(&self) -> ErrorSeverity {
        match self {
            Self::PolicyAlreadyExists | Self::PolicyNotFound | Self::Forbidden => {
                ErrorSeverity::Low
            }
            Self::RoleNotFound | Self::SerializationError => ErrorSeverity::Medium,
            Self::StoreUnavailable | Self::IoError => ErrorSeverity::High,
            Self::RoleCycleDetected
            | Self::InvalidRoleComposition
            | Self::ConfigurationError => ErrorSeverity::Critical,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Error severity levels for logging and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected during normal administration (duplicate rule, missing rule).
    Low,
    /// Caller mistakes worth surfacing.
    Medium,
    /// Infrastructure problems.
    High,
    /// Malformed role graph; the process should not continue serving.
    Critical,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors produced by the authorization core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Policy already exists: role={role}, permission={permission}")]
    AlreadyExists { role: String, permission: String },

    #[error("Policy not found: role={role}, permission={permission}")]
    NotFound { role: String, permission: String },

    #[error("Role not found: {0}")]
    RoleNotFound(String),

    #[error("Role composition would create a cycle: {0}")]
    CycleDetected(String),

    #[error("Invalid role composition: {0}")]
    InvalidComposition(String),

    #[error("Policy store unavailable: {0}")]
    StoreUnavailable(String),

    /// Generic denial surfaced to callers. Never carries the deny reason.
    #[error("Access denied")]
    Forbidden,

    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn already_exists(role: impl fmt::Display, permission: impl fmt::Display) -> Self {
        Self::AlreadyExists {
            role: role.to_string(),
            permission: permission.to_string(),
        }
    }

    pub fn not_found(role: impl fmt::Display, permission: impl fmt::Display) -> Self {
        Self::NotFound {
            role: role.to_string(),
            permission: permission.to_string(),
        }
    }

    pub fn role_not_found(role: impl fmt::Display) -> Self {
        Self::RoleNotFound(role.to_string())
    }

    pub fn cycle_detected(details: impl Into<String>) -> Self {
        Self::CycleDetected(details.into())
    }

    pub fn invalid_composition(details: impl Into<String>) -> Self {
        Self::InvalidComposition(details.into())
    }

    /// Build a store failure from any backend error.
    pub fn store_unavailable(source: impl fmt::Display) -> Self {
        Self::StoreUnavailable(source.to_string())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AlreadyExists { .. } => ErrorCode::PolicyAlreadyExists,
            Self::NotFound { .. } => ErrorCode::PolicyNotFound,
            Self::RoleNotFound(_) => ErrorCode::RoleNotFound,
            Self::CycleDetected(_) => ErrorCode::RoleCycleDetected,
            Self::InvalidComposition(_) => ErrorCode::InvalidRoleComposition,
            Self::StoreUnavailable(_) => ErrorCode::StoreUnavailable,
            Self::Forbidden => ErrorCode::Forbidden,
            Self::Configuration(_) => ErrorCode::ConfigurationError,
            Self::Serialization(_) => ErrorCode::SerializationError,
            Self::Io(_) => ErrorCode::IoError,
        }
    }

    /// True for errors that indicate a malformed role graph or setup.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::RoleNotFound(_)
                | Self::CycleDetected(_)
                | Self::InvalidComposition(_)
                | Self::Configuration(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.code().severity()
    }

    /// Log this error at a level matching its severity.
    pub fn log(&self) {
        let code = self.code();
        match self.severity() {
            ErrorSeverity::Low | ErrorSeverity::Medium => warn!(
                error_code = %code,
                numeric_code = code.numeric_code(),
                "{}", self
            ),
            ErrorSeverity::High | ErrorSeverity::Critical => error!(
                error_code = %code,
                numeric_code = code.numeric_code(),
                retryable = code.is_retryable(),
                "{}", self
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
