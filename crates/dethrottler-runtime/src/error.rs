use miette::Diagnostic;
use thiserror::Error;

/// Runtime error type for load sampling and node taint operations
#[derive(Error, Debug, Diagnostic)]
pub enum RuntimeError {
    /// Load-average source could not be read
    #[error("Failed to read load averages from {path}: {message}")]
    #[diagnostic(
        code(dethrottler::runtime::load_source_unreadable),
        help("Check that {path} exists and is readable. On Linux this is normally /proc/loadavg; override it with loadAvgPath")
    )]
    LoadSourceUnreadable {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
    },

    /// Load-average source content was malformed
    #[error("Invalid load average format: {message}")]
    #[diagnostic(
        code(dethrottler::runtime::load_parse_failed),
        help("Expected at least three whitespace-separated numbers, e.g. \"0.52 0.58 0.59 1/467 12345\"")
    )]
    LoadParseFailed {
        #[allow(unused)]
        message: String,
    },

    /// HTTP request to the API server failed
    #[error("API request failed: {message}")]
    #[diagnostic(
        code(dethrottler::runtime::api_request_failed),
        help("Verify the API server is reachable and the service account may get and update nodes")
    )]
    ApiRequestFailed {
        #[allow(unused)]
        message: String,
    },

    /// Node does not exist in the API server
    #[error("Node not found: {node_name}")]
    #[diagnostic(
        code(dethrottler::runtime::node_not_found),
        help("Check that nodeName (or $NODE_NAME) matches `kubectl get nodes`")
    )]
    NodeNotFound {
        #[allow(unused)]
        node_name: String,
    },

    /// Node was modified concurrently between read and write
    #[error("Conflict updating node {node_name}: {message}")]
    #[diagnostic(
        code(dethrottler::runtime::conflict),
        help("Another actor changed the node since it was read. The operation is retried on the next poll")
    )]
    Conflict {
        #[allow(unused)]
        node_name: String,
        #[allow(unused)]
        message: String,
    },

    /// No node name could be resolved
    #[error("Node name is not configured")]
    #[diagnostic(
        code(dethrottler::runtime::missing_node_name),
        help("Set nodeName in the config file, pass --node-name, or expose NODE_NAME via the Downward API (spec.nodeName)")
    )]
    MissingNodeName,

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(dethrottler::runtime::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Configuration error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] dethrottler_core::ConfigError),

    /// Internal error
    #[error("Internal runtime error: {message}")]
    #[diagnostic(
        code(dethrottler::runtime::internal_error),
        help("This is likely a bug in dethrottler-runtime. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    pub fn load_source_unreadable(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LoadSourceUnreadable {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn load_parse_failed(message: impl Into<String>) -> Self {
        Self::LoadParseFailed {
            message: message.into(),
        }
    }

    pub fn api_request_failed(message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            message: message.into(),
        }
    }

    pub fn node_not_found(node_name: impl Into<String>) -> Self {
        Self::NodeNotFound {
            node_name: node_name.into(),
        }
    }

    pub fn conflict(node_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            node_name: node_name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether the next poll tick may succeed where this attempt failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LoadSourceUnreadable { .. }
                | Self::LoadParseFailed { .. }
                | Self::ApiRequestFailed { .. }
                | Self::NodeNotFound { .. }
                | Self::Conflict { .. }
        )
    }
}
