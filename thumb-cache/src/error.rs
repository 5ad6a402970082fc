use std::fmt;

/// The error taxonomy shared by the cache tier and the thumbnailer tier built on top of it.
///
/// Kinds owned purely by the thumbnailer tier (`Timeout`, `TemporaryError`, `HardError`,
/// `Cancelled`) live here too so that both tiers can propagate one `Error` type without an
/// intermediate conversion step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Empty key, negative size, expiry set under an LRU-only policy, bad requested dimensions.
    InvalidArg,
    /// A cache was re-opened with settings (size, policy) that differ from what's
    /// persisted on disk. Use `resize` instead of re-opening with a new size.
    LogicError,
    /// Source does not exist: local path missing, remote reports no such artwork.
    NotFound,
    /// On-disk store inconsistent. Recovered internally at the `CacheHelper` boundary.
    Corrupt,
    /// External helper or download exceeded its deadline.
    Timeout,
    /// Transient remote or network issue. Drives backoff.
    TemporaryError,
    /// Permanent rejection: unsupported format, non-regular/empty source, bad input.
    HardError,
    /// `FileLock::lock` called twice by the same owner without an intervening `unlock`.
    AlreadyLocked,
    /// `FileLock::unlock` called without a matching `lock`.
    AlreadyUnlocked,
    /// Request aborted by its caller.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArg => "invalid argument",
            ErrorKind::LogicError => "logic error",
            ErrorKind::NotFound => "not found",
            ErrorKind::Corrupt => "cache corrupt",
            ErrorKind::Timeout => "timed out",
            ErrorKind::TemporaryError => "temporary error",
            ErrorKind::HardError => "hard error",
            ErrorKind::AlreadyLocked => "already locked",
            ErrorKind::AlreadyUnlocked => "already unlocked",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// An error carrying a [`ErrorKind`] and a human-readable message.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Corrupt, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
