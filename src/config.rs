//! # Instrumentation configuration.
//!
//! [`Config`] controls what counts as pending work: the timer-delay threshold
//! above which deferred callbacks are considered background polling, the
//! network blacklist, and verbose tracing.
//!
//! The configuration is consumed once by [`install`](crate::install) and is
//! immutable for the lifetime of the instrumentation session. Blacklist URL
//! patterns are compiled to regexes at install time; a pattern that fails to
//! compile aborts the install with
//! [`InstrumentError::InvalidPattern`](crate::InstrumentError::InvalidPattern).
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use quiesce::{BlacklistRule, Config, Method};
//!
//! let mut cfg = Config::default();
//! cfg.max_timeout = Duration::from_secs(10);
//! cfg.blacklist.push(BlacklistRule::new("^https?://metrics\\."));
//! cfg.blacklist.push(BlacklistRule::new("/heartbeat$").with_method(Method::Post));
//!
//! assert_eq!(cfg.max_timeout, Duration::from_secs(10));
//! ```

use std::time::Duration;

use regex::Regex;

use crate::error::InstrumentError;
use crate::host::Method;

/// Excludes matching network operations from tracking.
///
/// A rule matches when its `url_pattern` matches the request URL and, if
/// `method` is set, the request method equals it. Rules with no method match
/// any method.
#[derive(Clone, Debug)]
pub struct BlacklistRule {
    /// Regex pattern applied to the request URL (unanchored).
    pub url_pattern: String,
    /// Optional method discriminator.
    pub method: Option<Method>,
}

impl BlacklistRule {
    /// Creates a rule matching every method.
    pub fn new(url_pattern: impl Into<String>) -> Self {
        Self {
            url_pattern: url_pattern.into(),
            method: None,
        }
    }

    /// Restricts the rule to one method.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }
}

/// Instrumentation configuration.
///
/// Read-only after [`install`](crate::install); there is no way to reconfigure
/// a running session.
#[derive(Clone, Debug)]
pub struct Config {
    /// Deferred timers scheduled with a delay at or above this threshold are
    /// treated as background work and never tracked. This is a classification
    /// threshold, not an enforcement timeout.
    pub max_timeout: Duration,
    /// Network operations matching any rule are excluded from tracking.
    pub blacklist: Vec<BlacklistRule>,
    /// Emit start/end trace lines for every tracked unit of work.
    /// No behavioral effect.
    pub verbose: bool,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `max_timeout = 5s`
    /// - `blacklist = []`
    /// - `verbose = false`
    fn default() -> Self {
        Self {
            max_timeout: Duration::from_secs(5),
            blacklist: Vec::new(),
            verbose: false,
        }
    }
}

impl Config {
    /// Compiles the blacklist and freezes the configuration for a session.
    pub(crate) fn compile(self) -> Result<CompiledConfig, InstrumentError> {
        let mut rules = Vec::with_capacity(self.blacklist.len());
        for rule in &self.blacklist {
            let pattern =
                Regex::new(&rule.url_pattern).map_err(|source| InstrumentError::InvalidPattern {
                    pattern: rule.url_pattern.clone(),
                    source,
                })?;
            rules.push(CompiledRule {
                pattern,
                method: rule.method,
            });
        }
        Ok(CompiledConfig {
            max_timeout: self.max_timeout,
            verbose: self.verbose,
            rules,
        })
    }
}

/// Compiled rule: regex plus optional method discriminator.
struct CompiledRule {
    pattern: Regex,
    method: Option<Method>,
}

impl CompiledRule {
    fn matches(&self, url: &str, method: Method) -> bool {
        if let Some(m) = self.method {
            if m != method {
                return false;
            }
        }
        self.pattern.is_match(url)
    }
}

/// Session-frozen configuration shared by every tracker.
pub(crate) struct CompiledConfig {
    pub(crate) max_timeout: Duration,
    pub(crate) verbose: bool,
    rules: Vec<CompiledRule>,
}

impl CompiledConfig {
    /// Returns true when a network operation must bypass tracking.
    pub(crate) fn is_blacklisted(&self, url: &str, method: Method) -> bool {
        self.rules.iter().any(|r| r.matches(url, method))
    }
}
