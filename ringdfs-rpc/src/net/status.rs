use std::fmt::Display;

use rkyv::{Archive, Deserialize, Serialize};

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, PartialEq, Eq, Clone, Debug, thiserror::Error)]
#[archive(compare(PartialEq), check_bytes)]
#[archive_attr(derive(PartialEq, Eq, Debug))]
#[error("{code:?}: {message}")]
/// Why a request failed before the handler could produce a reply.
///
/// Failures of the operation itself are part of the reply of a message,
/// a status only covers routing, decoding and transport problems.
pub struct Status {
    pub code: ErrorCode,
    pub message: String,
}

impl Status {
    fn new(code: ErrorCode, message: impl Display) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }

    /// No service or handler is registered for the request path.
    pub fn unavailable(msg: impl Display) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, msg)
    }

    /// The handler failed.
    pub fn internal(msg: impl Display) -> Self {
        Self::new(ErrorCode::InternalError, msg)
    }

    /// The payload could not be validated as the expected message.
    pub fn invalid() -> Self {
        Self::new(ErrorCode::InvalidPayload, "Payload failed validation")
    }

    /// The peer could not be reached or dropped the connection.
    pub fn connection(msg: impl Display) -> Self {
        Self::new(ErrorCode::ConnectionError, msg)
    }

    pub fn timeout() -> Self {
        Self::new(ErrorCode::Timeout, "No reply within the request timeout")
    }

    /// Returns if the request never reached a live handler.
    ///
    /// Callers which tolerate dead peers use this to tell an unreachable
    /// node apart from a node which rejected the request.
    pub fn is_unreachable(&self) -> bool {
        matches!(self.code, ErrorCode::ConnectionError | ErrorCode::Timeout)
    }
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, PartialEq, Eq, Debug, Clone, Copy)]
#[archive(compare(PartialEq), check_bytes)]
#[archive_attr(derive(Debug, PartialEq, Eq))]
pub enum ErrorCode {
    ServiceUnavailable,
    InternalError,
    InvalidPayload,
    /// Set by the client, never sent by a server.
    ConnectionError,
    /// Set by the client, never sent by a server.
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_survives_the_wire() {
        let statuses = [
            Status::invalid(),
            Status::unavailable("ringdfs_files/Ls"),
            Status::internal("handler panicked"),
        ];

        for status in statuses {
            let bytes = rkyv::to_bytes::<_, 1024>(&status).expect("Serialize OK");
            let archived =
                rkyv::check_archived_root::<'_, Status>(&bytes).expect("Archive OK");
            assert_eq!(archived, &status);

            let copy: Status = rkyv::from_bytes(&bytes).expect("Deserialize OK");
            assert_eq!(copy, status);
        }
    }

    #[test]
    fn test_display() {
        let status = Status::unavailable("ringdfs_files/Ls");
        assert_eq!(status.to_string(), "ServiceUnavailable: ringdfs_files/Ls");
    }

    #[test]
    fn test_unreachable() {
        assert!(Status::connection("refused").is_unreachable());
        assert!(Status::timeout().is_unreachable());
        assert!(!Status::internal("boom").is_unreachable());
        assert!(!Status::unavailable("no service").is_unreachable());
        assert!(!Status::invalid().is_unreachable());
    }
}
