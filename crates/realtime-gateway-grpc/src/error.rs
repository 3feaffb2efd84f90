//! RPC status translation

use realtime_gateway::Error;
use tonic::{Code, Status};

/// Map a backend RPC status into the gateway's error taxonomy
pub fn from_rpc_status(status: &Status) -> Error {
    let message = status.message().to_string();
    match status.code() {
        Code::NotFound => Error::NotFound(message),
        Code::PermissionDenied => Error::Forbidden(message),
        Code::Unauthenticated => Error::Unauthenticated(message),
        Code::InvalidArgument | Code::OutOfRange | Code::Cancelled => {
            Error::InvalidArgument(message)
        }
        Code::DeadlineExceeded => Error::Timeout(message),
        Code::Unavailable => Error::Unavailable(message),
        _ => Error::Internal(message),
    }
}
