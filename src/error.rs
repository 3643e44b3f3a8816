//! Error types used by the instrumentation layer and the host.
//!
//! This module defines two main error enums:
//!
//! - [`InstrumentError`] — errors raised while installing the instrumentation.
//! - [`HostError`] — errors flowing through the host's own error channel.
//!
//! Both types provide `as_label` helpers for logging/metrics. Failures inside
//! wrapped user callbacks are reported as [`HostError::Callback`] *after* the
//! tracking layer has released the callback's task handle; tracking never
//! swallows or reorders the host's error reporting.

use thiserror::Error;

/// # Errors produced while installing the instrumentation.
///
/// These surface from [`install`](crate::install) before any entry point is
/// wrapped; a failed install leaves the host untouched.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InstrumentError {
    /// The host is already instrumented; a second session must wait for
    /// `restore()` of the first.
    #[error("host is already instrumented")]
    AlreadyInstalled,

    /// A blacklist URL pattern failed to compile.
    #[error("invalid blacklist pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The pattern as written in the configuration.
        pattern: String,
        /// The underlying regex error.
        source: regex::Error,
    },
}

impl InstrumentError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use quiesce::InstrumentError;
    ///
    /// assert_eq!(InstrumentError::AlreadyInstalled.as_label(), "already_installed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            InstrumentError::AlreadyInstalled => "already_installed",
            InstrumentError::InvalidPattern { .. } => "invalid_pattern",
        }
    }
}

/// # Errors reported through the host error channel.
///
/// These represent failures of the host program itself — a user callback
/// returning an error, a resource that failed to load, a network request that
/// failed. The host retains them for inspection via
/// [`Host::take_errors`](crate::host::Host::take_errors).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HostError {
    /// A scheduled user callback returned an error.
    #[error("callback failed: {message}")]
    Callback {
        /// The underlying error message.
        message: String,
    },

    /// An injected script/style resource failed to load.
    #[error("resource failed to load: {url}")]
    ResourceFailed {
        /// The resource URL.
        url: String,
    },

    /// A network request failed.
    #[error("network request failed: {url}")]
    Network {
        /// The request URL.
        url: String,
    },

    /// An optional host capability was invoked but is not available.
    #[error("{name} is not supported by this host")]
    Unsupported {
        /// Name of the missing capability.
        name: &'static str,
    },
}

impl HostError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HostError::Callback { .. } => "callback_failed",
            HostError::ResourceFailed { .. } => "resource_failed",
            HostError::Network { .. } => "network_failed",
            HostError::Unsupported { .. } => "unsupported",
        }
    }

    /// Builds a callback error from any displayable value.
    pub fn callback(message: impl Into<String>) -> Self {
        HostError::Callback {
            message: message.into(),
        }
    }
}
