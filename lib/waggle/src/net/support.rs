use std::io;

/// Identity of an accepted connection. Allocated monotonically at accept
/// time; the registry compares it for identity only and never performs I/O
/// through it.
pub type ConnId = u64;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorType {
    /// Read or write failure on the socket.
    Io,
    /// Clean end of stream.
    Closed,
    /// Malformed frame length, truncated payload or unknown request tag.
    BadFrame,
    /// Digest mismatch or unexpected handshake tag.
    BadHandshake,
    /// The registry service is no longer consuming requests.
    RegistryGone,
    /// The upstream consumer of distribution events is gone.
    UpstreamGone,
}

/// Link-level result plumbing. `Wait` is not a failure: it signals that the
/// current frame is incomplete and more bytes must be read first.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NetError {
    Wait,
    Fatal(ErrorType),
}

pub type NetResult<T> = Result<T, NetError>;

impl From<io::Error> for NetError {
    #[inline]
    fn from(err: io::Error) -> NetError {
        match err.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset => {
                NetError::Fatal(ErrorType::Closed)
            }
            _ => NetError::Fatal(ErrorType::Io),
        }
    }
}
