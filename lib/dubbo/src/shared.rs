use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

pub type NetworkResult<T> = Result<T, NetworkError>;

#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    /// More socket readiness is needed before the operation can make
    /// progress. Never a failure.
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    BadMagic,
    BadBodySize,
    UnsupportedSerialization,
    RequestPacket,
    BadTag,
    BadJson,
    StringTooLong,
    Utf8,
    Disconnected,
    Resolve,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(NetworkError::Wait) => false,
            _ => true,
        }
    }
}

/// Resolves `host:port` to the first usable socket address.
pub fn resolve_addr(host: &str, port: u16) -> NetworkResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|_| NetworkError::Fatal(ErrorType::Resolve))?
        .next()
        .ok_or(NetworkError::Fatal(ErrorType::Resolve))
}
