//! Closed error taxonomy shared by every component (spec §7).
//!
//! Every fallible public operation in this crate returns [`MgmResult`].
//! Background engines never let an [`MgmError`] escape to a caller that
//! did not ask for one directly - they log it and continue (§7 Policy).

use std::fmt;

/// Convenience alias used throughout the crate.
pub type MgmResult<T> = Result<T, MgmError>;

/// The closed taxonomy of spec §7, one variant per table row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Path or id not found.
    MissingEntry,
    /// Create collides with an existing entry.
    ExistingEntry,
    /// ACL or mode rejects the operation.
    PermissionDenied,
    /// Operation required a directory but found a plain file.
    NotADirectory,
    /// Operation required a plain file but found a directory.
    IsADirectory,
    /// Placement could not satisfy quota or capacity.
    NoSpace,
    /// All replicas unreachable.
    NoNetwork,
    /// Location list is empty.
    NoEntry,
    /// Replication commit's size did not match the current meta.
    BadSize,
    /// Replication commit's checksum did not match the current meta.
    BadChecksum,
    /// Commit referenced a file that has been removed.
    Gone,
    /// Malformed request.
    Invalid,
    /// Capability presented past its validity window.
    TokenExpired,
    /// A stall rule matched; client should retry later.
    ServiceBusy,
}

impl ErrorKind {
    /// Maps the kind to the POSIX errno the client observes (spec §7 table).
    ///
    /// `ServiceBusy` has no errno: it never reaches a POSIX translation
    /// layer, it is carried as a *stall* response instead (spec §6).
    pub fn as_errno(self) -> Option<i32> {
        use ErrorKind::*;
        match self {
            MissingEntry => Some(libc_enoent()),
            ExistingEntry => Some(libc_eexist()),
            PermissionDenied => Some(libc_eacces()),
            NotADirectory => Some(libc_enotdir()),
            IsADirectory => Some(libc_eisdir()),
            NoSpace => Some(libc_enospc()),
            NoNetwork => Some(libc_enonet()),
            NoEntry => Some(libc_enodev()),
            BadSize => Some(libc_ebade()),
            BadChecksum => Some(libc_ebadr()),
            Gone => Some(libc_eidrm()),
            Invalid => Some(libc_einval()),
            TokenExpired => Some(libc_eperm()),
            ServiceBusy => None,
        }
    }
}

// Numeric errno values, spelled out rather than pulled in via a `libc`
// dependency: the core never makes a syscall that needs the crate, and
// these constants are architecture-independent on every POSIX target
// EOS ships on (x86_64/aarch64 Linux).
fn libc_enoent() -> i32 { 2 }
fn libc_eacces() -> i32 { 13 }
fn libc_eexist() -> i32 { 17 }
fn libc_enotdir() -> i32 { 20 }
fn libc_eisdir() -> i32 { 21 }
fn libc_einval() -> i32 { 22 }
fn libc_enospc() -> i32 { 28 }
fn libc_eperm() -> i32 { 1 }
fn libc_enodev() -> i32 { 19 }
fn libc_enonet() -> i32 { 64 }
fn libc_eidrm() -> i32 { 43 }
fn libc_ebade() -> i32 { 52 }
fn libc_ebadr() -> i32 { 53 }

/// An error carrying both the closed [`ErrorKind`] and a human message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MgmError {
    kind: ErrorKind,
    message: String,
}

impl MgmError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn as_errno(&self) -> Option<i32> {
        self.kind.as_errno()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn missing_entry(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingEntry, message)
    }

    pub fn existing_entry(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExistingEntry, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn not_a_directory(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotADirectory, message)
    }

    pub fn is_a_directory(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IsADirectory, message)
    }

    pub fn no_space(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoSpace, message)
    }

    pub fn no_network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoNetwork, message)
    }

    pub fn no_entry(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoEntry, message)
    }

    pub fn bad_size(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadSize, message)
    }

    pub fn bad_checksum(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadChecksum, message)
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Gone, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    pub fn token_expired(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TokenExpired, message)
    }

    pub fn service_busy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceBusy, message)
    }
}

impl fmt::Display for MgmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for MgmError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_busy_has_no_errno() {
        assert_eq!(MgmError::service_busy("banned").as_errno(), None);
    }

    #[test]
    fn missing_entry_maps_to_enoent() {
        assert_eq!(MgmError::missing_entry("no such file").as_errno(), Some(2));
    }
}
