use std::io;
use std::net;

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Tri-valued outcome of every socket operation. `Wait` is transient and
/// handled by retrying on a later tick, `Closed` removes the connection,
/// `Fatal` removes the connection and is fatal for the listener.
#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Closed,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    AddrParse,
    InvalidSocket,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => NetworkError::Closed,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

impl From<net::AddrParseError> for NetworkError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        NetworkError::Fatal(ErrorType::AddrParse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_would_block_maps_to_wait() {
        let error: NetworkError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert_eq!(error, NetworkError::Wait);
    }

    #[test]
    fn test_peer_reset_maps_to_closed() {
        let error: NetworkError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert_eq!(error, NetworkError::Closed);

        let error: NetworkError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert_eq!(error, NetworkError::Closed);
    }

    #[test]
    fn test_other_io_errors_are_fatal() {
        let error: NetworkError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert_eq!(
            error,
            NetworkError::Fatal(ErrorType::Io(io::ErrorKind::PermissionDenied))
        );
    }
}
