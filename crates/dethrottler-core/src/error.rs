// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Error type for loading and validating the dethrottler configuration
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file '{path}': {message}")]
    #[diagnostic(
        code(dethrottler::config::unreadable),
        help("Check that the file exists and is readable. Pass a different path with --config")
    )]
    Unreadable {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
    },

    /// Config path is not a usable YAML file
    #[error("Invalid config path '{path}': {reason}")]
    #[diagnostic(
        code(dethrottler::config::invalid_path),
        help("The config must be a regular file with a .yaml or .yml extension")
    )]
    InvalidPath {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        reason: String,
    },

    /// YAML could not be parsed
    #[error("Failed to parse config file '{path}': {message}")]
    #[diagnostic(
        code(dethrottler::config::parse_error),
        help("Check the YAML syntax. Durations are strings like \"10s\" or \"5m\"; thresholds are plain numbers")
    )]
    ParseError {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
    },

    /// Duration string could not be parsed
    #[error("Invalid duration '{input}': {reason}")]
    #[diagnostic(
        code(dethrottler::config::invalid_duration),
        help("Use a number followed by a unit: ms, s, m or h (e.g. \"500ms\", \"10s\", \"1m30s\")")
    )]
    InvalidDuration {
        #[allow(unused)]
        input: String,
        #[allow(unused)]
        reason: String,
    },

    /// Taint effect is not one of the supported values
    #[error("Invalid taint effect: {value}")]
    #[diagnostic(
        code(dethrottler::config::invalid_taint_effect),
        help("Must be one of: NoSchedule, PreferNoSchedule, NoExecute")
    )]
    InvalidTaintEffect {
        #[allow(unused)]
        value: String,
    },

    /// Kubeconfig could not be read or does not describe a usable connection
    #[error("Invalid kubeconfig '{path}': {message}")]
    #[diagnostic(
        code(dethrottler::config::invalid_kubeconfig),
        help("Check current-context and its cluster and user entries, or set apiServer.url instead of kubeconfigPath")
    )]
    InvalidKubeconfig {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
    },

    /// Validation failed
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(dethrottler::config::validation_failed), help("{suggestion}"))]
    ValidationFailed {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    pub fn unreadable(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreadable {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn parse_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_duration(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_taint_effect(value: impl Into<String>) -> Self {
        Self::InvalidTaintEffect {
            value: value.into(),
        }
    }

    pub fn invalid_kubeconfig(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidKubeconfig {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn validation_failed(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }
}
