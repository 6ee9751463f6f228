use super::operation::CommandKind;
use super::result_code::ResultCode;
use lazy_static::lazy_static;
use regex::Regex;
use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Boxed cause kept inside an [`Error`] wrap chain.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Error returned by every routing, pooling and command operation.
///
/// The value is immutable from the caller's point of view. Context such as the
/// attributed node, the retry iteration or the in-doubt flag is attached by the
/// crate while the error is still privately owned, so shared sentinels
/// ([`ConstError`]) are never touched.
///
/// ```
/// use routecore::{Error, ResultCode, ERR_TIMEOUT};
///
/// fn check(err: &Error) {
///     if err.matches(&[ResultCode::Timeout, ResultCode::NetworkError]) {
///         // retry-safe transport failure
///     }
///     if err.is(&ERR_TIMEOUT) {
///         // client-side deadline
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Error {
    code: ResultCode,
    message: String,
    wrapped: Option<Cause>,
    node: Option<String>,
    iteration: u32,
    in_doubt: bool,
    origin: &'static Location<'static>,
    sentinel: Option<&'static ConstError>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds an error with an explicit message.
    #[track_caller]
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            wrapped: None,
            node: None,
            iteration: 0,
            in_doubt: false,
            origin: Location::caller(),
            sentinel: None,
        }
    }

    /// Builds an error using the code's default message.
    #[track_caller]
    pub fn from_code(code: ResultCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Builds an error from a result code reported by the server.
    #[track_caller]
    pub fn from_server_code(code: i32) -> Self {
        Self::from_code(ResultCode::from_code(code))
    }

    pub fn code(&self) -> ResultCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Name of the node the error was attributed to, if any.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// Zero-based retry iteration on which the error occurred.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// The write may have been applied by the server even though the client
    /// could not confirm it.
    pub fn is_in_doubt(&self) -> bool {
        self.in_doubt
    }

    /// True if this error or any client error down the wrap chain carries one
    /// of `codes`. Always false for an empty code list.
    pub fn matches(&self, codes: &[ResultCode]) -> bool {
        if codes.is_empty() {
            return false;
        }
        let mut current = Some(self);
        while let Some(err) = current {
            if codes.iter().any(|code| err.code.same_as(code)) {
                return true;
            }
            current = err.inner();
        }
        false
    }

    /// True if this error, or any client error down the chain, was produced
    /// from the given sentinel.
    pub fn is(&self, sentinel: &'static ConstError) -> bool {
        let mut current = Some(self);
        while let Some(err) = current {
            if err.sentinel.is_some_and(|s| std::ptr::eq(s, sentinel)) {
                return true;
            }
            current = err.inner();
        }
        false
    }

    /// The wrapped cause, if any.
    pub fn wrapped(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.wrapped.as_deref()
    }

    /// The nearest client error down the cause chain, looking through
    /// foreign wrappers via `source()`.
    pub fn inner(&self) -> Option<&Error> {
        let mut cause: Option<&(dyn StdError + 'static)> = self
            .wrapped
            .as_deref()
            .map(|err| err as &(dyn StdError + 'static));
        while let Some(err) = cause {
            if let Some(inner) = err.downcast_ref::<Error>() {
                return Some(inner);
            }
            cause = err.source();
        }
        None
    }

    /// Origin locations of this error and of every embedded client error.
    pub fn trace(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{}:{}:{}\n",
            self.origin.file(),
            self.origin.line(),
            self.origin.column()
        ));
        if let Some(inner) = self.inner() {
            out.push_str("Embedded:\n");
            out.push_str(&inner.trace());
        }
        out
    }

    pub(crate) fn wrap(self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.wrap_cause(Arc::new(cause))
    }

    pub(crate) fn wrap_cause(mut self, cause: Cause) -> Self {
        self.wrapped = Some(cause);
        self
    }

    pub(crate) fn in_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub(crate) fn at_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    /// Applies the in-doubt rule: only a write whose bytes were confirmed sent.
    pub(crate) fn with_in_doubt(mut self, kind: CommandKind, command_sent: bool) -> Self {
        self.in_doubt = kind.is_write() && command_sent;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ResultCode: {}, Iteration: {}, InDoubt: {}, Node: {}: {}",
            self.code,
            self.iteration,
            self.in_doubt,
            self.node.as_deref().unwrap_or("<none>"),
            self.message
        )?;
        if let Some(wrapped) = &self.wrapped {
            write!(f, "\n  {}", wrapped)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.wrapped
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ERR_NET_TIMEOUT.err().wrap(err),
            _ => ERR_NETWORK.err().wrap(err),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    #[track_caller]
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ERR_TIMEOUT.err()
    }
}

/// Immutable, shareable error template.
///
/// Call [`ConstError::err`] to get an owned [`Error`] that remembers which
/// sentinel it came from, so [`Error::is`] keeps working after context is
/// attached.
#[derive(Debug)]
pub struct ConstError {
    code: ResultCode,
    message: &'static str,
}

impl ConstError {
    pub const fn new(code: ResultCode, message: &'static str) -> Self {
        Self { code, message }
    }

    pub fn code(&self) -> ResultCode {
        self.code
    }

    pub fn message(&self) -> &'static str {
        self.message
    }

    /// Fresh owned copy of the sentinel.
    #[track_caller]
    pub fn err(&'static self) -> Error {
        let mut err = Error::new(self.code, self.message);
        err.sentinel = Some(self);
        err
    }
}

impl fmt::Display for ConstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultCode: {}: {}", self.code, self.message)
    }
}

pub static ERR_SERVER_NOT_AVAILABLE: ConstError = ConstError::new(
    ResultCode::ServerNotAvailable,
    "server is not accepting requests",
);
pub static ERR_INVALID_PARTITION_MAP: ConstError = ConstError::new(
    ResultCode::InvalidClusterPartitionMap,
    "Partition map errors normally occur when the cluster has partitioned due to network anomaly or node crash, or is not configured properly.",
);
pub static ERR_CONNECTION_POOL_EMPTY: ConstError = ConstError::new(
    ResultCode::ConnectionPoolEmpty,
    "connection pool is empty. This happens when no idle connections were available and opening on demand is disabled",
);
pub static ERR_CONNECTION_POOL_EXHAUSTED: ConstError = ConstError::new(
    ResultCode::ConnectionPoolExhausted,
    "connection pool is exhausted. All connections are in use and none was returned before the acquire timeout",
);
pub static ERR_TOO_MANY_CONNECTIONS_FOR_NODE: ConstError = ConstError::new(
    ResultCode::TooManyConnectionsForNode,
    "connection limit reached for this node. This value is controlled via PoolConfig::max_connections",
);
pub static ERR_TOO_MANY_OPENING_CONNECTIONS: ConstError = ConstError::new(
    ResultCode::TooManyOpeningConnections,
    "too many connections are trying to open at once. This value is controlled via PoolConfig::max_opening_connections",
);
pub static ERR_TIMEOUT: ConstError = ConstError::new(
    ResultCode::Timeout,
    "command execution timed out on client: see CommandPolicy::total_timeout",
);
pub static ERR_NET_TIMEOUT: ConstError = ConstError::new(ResultCode::Timeout, "network timeout");
pub static ERR_NETWORK: ConstError = ConstError::new(ResultCode::NetworkError, "network error");
pub static ERR_CLUSTER_IS_EMPTY: ConstError =
    ConstError::new(ResultCode::InvalidNode, "cluster is empty");
pub static ERR_CLUSTER_CLOSED: ConstError =
    ConstError::new(ResultCode::ServerNotAvailable, "cluster has been closed");
pub static ERR_INVALID_PARAM: ConstError =
    ConstError::new(ResultCode::ParameterError, "parameter error");
pub static ERR_MAX_RETRIES_EXCEEDED: ConstError = ConstError::new(
    ResultCode::MaxRetriesExceeded,
    "command execution failed: retry policy stopped after repeated failures",
);

/// Nil-safe form of [`Error::matches`].
pub fn matches(err: Option<&Error>, codes: &[ResultCode]) -> bool {
    err.is_some_and(|e| e.matches(codes))
}

/// Wraps `inner` inside `outer`.
///
/// A missing side returns the other one unchanged. When both are present the
/// outer error's own cause is replaced by `inner`.
pub fn chain_errors(outer: Option<Error>, inner: Option<Error>) -> Option<Error> {
    match (outer, inner) {
        (None, None) => None,
        (Some(outer), None) => Some(outer),
        (None, Some(inner)) => Some(inner),
        (Some(outer), Some(inner)) => Some(outer.wrap(inner)),
    }
}

lazy_static! {
    static ref INFO_ERROR_PATTERN: Regex =
        Regex::new(r"(?i)(fail|error)((:|=)(?P<code>[0-9]+))?((:|=)(?P<msg>.+))?")
            .expect("info error pattern is valid");
}

/// Parses an error string returned by an info query, such as
/// `ERROR:4:namespace not found` or `FAIL:22`.
///
/// Without a numeric code the error is reported as [`ResultCode::ServerError`].
#[track_caller]
pub fn parse_info_error(response: &str) -> Error {
    let mut code = ResultCode::ServerError;
    let mut message = response.to_string();

    if let Some(caps) = INFO_ERROR_PATTERN.captures(response) {
        if let Some(parsed) = caps.name("code").and_then(|m| m.as_str().parse::<i32>().ok()) {
            code = ResultCode::from_code(parsed);
            message = code.default_message().to_string();
        }
        if let Some(msg) = caps.name("msg") {
            message = msg.as_str().to_string();
        }
    }

    Error::new(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_walks_wrap_chain() {
        let inner = Error::from_code(ResultCode::Timeout);
        let outer = Error::from_code(ResultCode::InvalidNode).wrap(inner);

        assert!(outer.matches(&[ResultCode::InvalidNode]));
        assert!(outer.matches(&[ResultCode::Timeout]));
        assert!(outer.matches(&[ResultCode::KeyNotFound, ResultCode::Timeout]));
        assert!(!outer.matches(&[ResultCode::NetworkError]));
        assert!(!outer.matches(&[]));
    }

    #[test]
    fn test_matches_on_missing_error_is_false() {
        assert!(!matches(None, &[ResultCode::Timeout]));
        let err = ERR_TIMEOUT.err();
        assert!(matches(Some(&err), &[ResultCode::Timeout]));
    }

    #[test]
    fn test_chain_errors_with_one_side_missing() {
        let err = Error::new(ResultCode::ParameterError, "bad input");
        let chained = chain_errors(None, Some(err.clone())).unwrap();
        assert_eq!(chained.code(), ResultCode::ParameterError);
        assert_eq!(chained.message(), "bad input");
        assert!(chained.wrapped().is_none());

        let chained = chain_errors(Some(err), None).unwrap();
        assert_eq!(chained.message(), "bad input");
        assert!(chain_errors(None, None).is_none());
    }

    #[test]
    fn test_chain_errors_unwraps_to_inner() {
        let outer = Error::new(ResultCode::InvalidClusterPartitionMap, "outer");
        let inner = Error::new(ResultCode::CommonError, "inner");
        let chained = chain_errors(Some(outer), Some(inner)).unwrap();

        let unwrapped = chained.inner().unwrap();
        assert_eq!(unwrapped.message(), "inner");
        assert!(chained.matches(&[ResultCode::InvalidClusterPartitionMap]));
        assert!(chained.matches(&[ResultCode::CommonError]));
        assert!(chained.to_string().contains("inner"));
    }

    #[test]
    fn test_sentinel_copies_keep_identity_and_do_not_leak_context() {
        let attributed = ERR_NETWORK.err().in_node("BB9").at_iteration(2);
        assert!(attributed.is(&ERR_NETWORK));
        assert!(!attributed.is(&ERR_TIMEOUT));
        assert_eq!(attributed.node(), Some("BB9"));

        let fresh = ERR_NETWORK.err();
        assert_eq!(fresh.node(), None);
        assert_eq!(fresh.iteration(), 0);
        assert_eq!(ERR_NETWORK.message(), "network error");
    }

    #[test]
    fn test_pool_sentinels_are_distinguishable() {
        let empty = ERR_CONNECTION_POOL_EMPTY.err();
        assert!(empty.is(&ERR_CONNECTION_POOL_EMPTY));
        assert!(!empty.is(&ERR_CONNECTION_POOL_EXHAUSTED));
        assert!(!empty.is(&ERR_TOO_MANY_OPENING_CONNECTIONS));
        assert!(ERR_TIMEOUT.err().wrap(ERR_NETWORK.err()).is(&ERR_NETWORK));
    }

    #[test]
    fn test_in_doubt_only_for_sent_writes() {
        let base = ERR_NET_TIMEOUT.err();
        assert!(base.clone().with_in_doubt(CommandKind::Write, true).is_in_doubt());
        assert!(!base.clone().with_in_doubt(CommandKind::Write, false).is_in_doubt());
        assert!(!base.clone().with_in_doubt(CommandKind::Read, true).is_in_doubt());
        assert!(!base.with_in_doubt(CommandKind::Read, false).is_in_doubt());
    }

    #[test]
    fn test_io_errors_are_classified() {
        let timeout: Error = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        assert_eq!(timeout.code(), ResultCode::Timeout);
        assert!(timeout.is(&ERR_NET_TIMEOUT));

        let reset: Error =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert_eq!(reset.code(), ResultCode::NetworkError);
        assert!(reset.wrapped().is_some());
        assert!(reset.inner().is_none());
    }

    #[test]
    fn test_trace_includes_embedded_errors() {
        let inner = Error::from_code(ResultCode::Timeout);
        let outer = Error::from_code(ResultCode::InvalidNode).wrap(inner);
        let trace = outer.trace();
        assert!(trace.contains("error.rs"));
        assert!(trace.contains("Embedded:"));
    }

    #[test]
    fn test_server_code_matches_named_code() {
        let err = Error::new(ResultCode::Server(9), "timed out on server");
        assert!(err.matches(&[ResultCode::Timeout]));
        assert!(!err.matches(&[ResultCode::NetworkError]));

        let wrapped = ERR_NETWORK.err().wrap(Error::new(ResultCode::Server(20), "ns"));
        assert!(wrapped.matches(&[ResultCode::InvalidNamespace]));
        assert!(Error::from_code(ResultCode::Timeout).matches(&[ResultCode::Server(9)]));

        let empty = ERR_CONNECTION_POOL_EMPTY.err();
        assert!(!empty.matches(&[ResultCode::ConnectionPoolExhausted]));
        assert!(empty.matches(&[ResultCode::ConnectionPoolEmpty]));
    }

    /// Foreign error type that keeps a client error as its source.
    #[derive(Debug)]
    struct Envelope(Error);

    impl fmt::Display for Envelope {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "envelope")
        }
    }

    impl StdError for Envelope {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_chain_is_followed_through_foreign_wrappers() {
        let outer = Error::from_code(ResultCode::CommonError).wrap(Envelope(ERR_NETWORK.err()));

        assert_eq!(outer.inner().map(Error::code), Some(ResultCode::NetworkError));
        assert!(outer.matches(&[ResultCode::NetworkError]));
        assert!(outer.is(&ERR_NETWORK));
        assert!(outer.trace().contains("Embedded:"));
    }

    #[test]
    fn test_parse_info_error() {
        let err = parse_info_error("ERROR:4:namespace not found");
        assert_eq!(err.code(), ResultCode::ParameterError);
        assert_eq!(err.message(), "namespace not found");

        let err = parse_info_error("FAIL:77");
        assert_eq!(err.code(), ResultCode::Server(77));

        let err = parse_info_error("error=bad things");
        assert_eq!(err.code(), ResultCode::ServerError);
        assert_eq!(err.message(), "bad things");

        let err = parse_info_error("garbage");
        assert_eq!(err.code(), ResultCode::ServerError);
        assert_eq!(err.message(), "garbage");
    }
}
