pub mod error;
pub mod operation;
pub mod result_code;

pub use error::{
    Cause, ConstError, ERR_CLUSTER_CLOSED, ERR_CLUSTER_IS_EMPTY, ERR_CONNECTION_POOL_EMPTY,
    ERR_CONNECTION_POOL_EXHAUSTED, ERR_INVALID_PARAM, ERR_INVALID_PARTITION_MAP,
    ERR_MAX_RETRIES_EXCEEDED, ERR_NET_TIMEOUT, ERR_NETWORK, ERR_SERVER_NOT_AVAILABLE,
    ERR_TIMEOUT, ERR_TOO_MANY_CONNECTIONS_FOR_NODE, ERR_TOO_MANY_OPENING_CONNECTIONS, Error,
    Result, chain_errors, matches, parse_info_error,
};
pub use operation::{CommandKind, OperationType};
pub use result_code::ResultCode;
