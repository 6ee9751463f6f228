use serde::{Deserialize, Serialize};
use std::fmt;

/// Result code carried by every [`Error`](super::Error).
///
/// Negative wire values are produced by the client itself, non-negative values
/// are reported by the server. Server codes the client does not know about are
/// forwarded untouched through [`ResultCode::Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Ok,
    ParameterError,
    Timeout,
    NetworkError,
    InvalidNode,
    InvalidNamespace,
    InvalidClusterPartitionMap,
    ConnectionPoolEmpty,
    ConnectionPoolExhausted,
    TooManyConnectionsForNode,
    TooManyOpeningConnections,
    SerializeError,
    ServerNotAvailable,
    MaxRetriesExceeded,
    ParseError,
    CommonError,
    ServerError,
    KeyNotFound,
    /// Server-reported code without a dedicated variant.
    Server(i32),
}

impl ResultCode {
    /// Numeric wire value of the code.
    pub fn code(&self) -> i32 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::ServerError => 1,
            ResultCode::KeyNotFound => 2,
            ResultCode::ParameterError => 4,
            ResultCode::Timeout => 9,
            ResultCode::InvalidNamespace => 20,
            ResultCode::CommonError => -1,
            ResultCode::ParseError => -2,
            ResultCode::InvalidNode => -3,
            ResultCode::ConnectionPoolEmpty
            | ResultCode::ConnectionPoolExhausted
            | ResultCode::TooManyConnectionsForNode
            | ResultCode::TooManyOpeningConnections => -7,
            ResultCode::ServerNotAvailable => -8,
            ResultCode::SerializeError => -10,
            ResultCode::MaxRetriesExceeded => -11,
            ResultCode::NetworkError => -18,
            ResultCode::InvalidClusterPartitionMap => -19,
            ResultCode::Server(code) => *code,
        }
    }

    /// Maps a server-reported wire value back to a code.
    ///
    /// Unknown values are kept as [`ResultCode::Server`]. The shared pool value
    /// `-7` maps to [`ResultCode::ConnectionPoolExhausted`].
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ResultCode::Ok,
            1 => ResultCode::ServerError,
            2 => ResultCode::KeyNotFound,
            4 => ResultCode::ParameterError,
            9 => ResultCode::Timeout,
            20 => ResultCode::InvalidNamespace,
            -1 => ResultCode::CommonError,
            -2 => ResultCode::ParseError,
            -3 => ResultCode::InvalidNode,
            -7 => ResultCode::ConnectionPoolExhausted,
            -8 => ResultCode::ServerNotAvailable,
            -10 => ResultCode::SerializeError,
            -11 => ResultCode::MaxRetriesExceeded,
            -18 => ResultCode::NetworkError,
            -19 => ResultCode::InvalidClusterPartitionMap,
            other => ResultCode::Server(other),
        }
    }

    /// Equality that also resolves [`ResultCode::Server`] against the named
    /// code with the same wire value, so `Server(9)` is the same as `Timeout`.
    /// Named codes sharing a wire value stay distinct.
    pub fn same_as(&self, other: &ResultCode) -> bool {
        match (self, other) {
            (ResultCode::Server(code), other) | (other, ResultCode::Server(code)) => {
                other.code() == *code
            }
            (a, b) => a == b,
        }
    }

    /// True for the connection pool family of failures.
    pub fn is_connection_pool_error(&self) -> bool {
        matches!(
            self,
            ResultCode::ConnectionPoolEmpty
                | ResultCode::ConnectionPoolExhausted
                | ResultCode::TooManyConnectionsForNode
                | ResultCode::TooManyOpeningConnections
        )
    }

    /// True when the code was produced by the client rather than the server.
    pub fn is_client_error(&self) -> bool {
        self.code() < 0 || matches!(self, ResultCode::Timeout | ResultCode::ParameterError)
    }

    /// Default message used when an error is built without one.
    pub fn default_message(&self) -> &'static str {
        match self {
            ResultCode::Ok => "ok",
            ResultCode::ParameterError => "parameter error",
            ResultCode::Timeout => "timeout",
            ResultCode::NetworkError => "network error",
            ResultCode::InvalidNode => "invalid node",
            ResultCode::InvalidNamespace => "namespace not found in partition map",
            ResultCode::InvalidClusterPartitionMap => "invalid cluster partition map",
            ResultCode::ConnectionPoolEmpty => "connection pool is empty",
            ResultCode::ConnectionPoolExhausted => "connection pool is exhausted",
            ResultCode::TooManyConnectionsForNode => "connection limit reached for node",
            ResultCode::TooManyOpeningConnections => "too many connections are opening",
            ResultCode::SerializeError => "serialization error",
            ResultCode::ServerNotAvailable => "server is not accepting requests",
            ResultCode::MaxRetriesExceeded => "max retries exceeded",
            ResultCode::ParseError => "parse error",
            ResultCode::CommonError => "client error",
            ResultCode::ServerError => "server error",
            ResultCode::KeyNotFound => "key not found",
            ResultCode::Server(_) => "server reported error",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultCode::Server(code) => return write!(f, "SERVER_CODE({})", code),
            ResultCode::Ok => "OK",
            ResultCode::ParameterError => "PARAMETER_ERROR",
            ResultCode::Timeout => "TIMEOUT",
            ResultCode::NetworkError => "NETWORK_ERROR",
            ResultCode::InvalidNode => "INVALID_NODE_ERROR",
            ResultCode::InvalidNamespace => "INVALID_NAMESPACE",
            ResultCode::InvalidClusterPartitionMap => "INVALID_CLUSTER_PARTITION_MAP",
            ResultCode::ConnectionPoolEmpty => "CONNECTION_POOL_EMPTY",
            ResultCode::ConnectionPoolExhausted => "CONNECTION_POOL_EXHAUSTED",
            ResultCode::TooManyConnectionsForNode => "TOO_MANY_CONNECTIONS_FOR_NODE",
            ResultCode::TooManyOpeningConnections => "TOO_MANY_OPENING_CONNECTIONS",
            ResultCode::SerializeError => "SERIALIZE_ERROR",
            ResultCode::ServerNotAvailable => "SERVER_NOT_AVAILABLE",
            ResultCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ResultCode::ParseError => "PARSE_ERROR",
            ResultCode::CommonError => "COMMON_ERROR",
            ResultCode::ServerError => "SERVER_ERROR",
            ResultCode::KeyNotFound => "KEY_NOT_FOUND_ERROR",
        };
        f.write_str(name)
    }
}
