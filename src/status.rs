//! Errno-to-status mapping and the version clamp.
//!
//! A handler reports failure as a raw OS error (an `io::Error` wrapping an
//! errno, or the sentinel [`Errno::Unspecified`] when no errno applies).
//! This module turns that into the [`StatusCode`] that actually goes on
//! the wire, clamped so a v3 client is never handed a code it was never
//! taught to parse.

use std::io;

use crate::protocol::{Descriptor, StatusCode};

/// The raw failure an operation reported, before version clamping.
#[derive(Debug, Clone, Copy)]
pub enum Errno {
    /// A specific OS errno, as returned by `io::Error::raw_os_error`.
    Os(i32),
    /// End of file / no more directory entries. Not an OS errno; handlers
    /// return this explicitly to distinguish it from a real failure.
    Eof,
    /// A failure with no specific errno to consult (maps to `Failure`).
    Unspecified,
}

/// Map an [`io::Error`] to the [`Errno`] the status mapper expects.
impl From<&io::Error> for Errno {
    fn from(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Errno::Os(code),
            None => Errno::Unspecified,
        }
    }
}

/// Map a raw failure to the status code it represents, before any
/// version clamp is applied.
fn unclamped(errno: Errno) -> StatusCode {
    let code = match errno {
        Errno::Eof => return StatusCode::Eof,
        Errno::Unspecified => return StatusCode::Failure,
        Errno::Os(code) => code,
    };

    if code == libc::EPERM || code == libc::EACCES {
        StatusCode::PermissionDenied
    } else if code == libc::ENOENT {
        StatusCode::NoSuchFile
    } else if code == libc::ENOSPC {
        StatusCode::NoSpaceOnFilesystem
    } else if code == libc::ELOOP {
        StatusCode::LinkLoop
    } else if code == libc::EDQUOT {
        StatusCode::QuotaExceeded
    } else if code == libc::ENAMETOOLONG {
        StatusCode::InvalidFilename
    } else if code == libc::ENOTEMPTY {
        StatusCode::DirNotEmpty
    } else if code == libc::EIO {
        StatusCode::FileCorrupt
    } else if code == libc::ENOTDIR {
        StatusCode::NotADirectory
    } else if code == libc::EISDIR {
        StatusCode::FileIsADirectory
    } else if code == libc::EEXIST {
        StatusCode::FileAlreadyExists
    } else if code == libc::EROFS {
        StatusCode::WriteProtect
    } else {
        StatusCode::Failure
    }
}

/// Map a raw failure to the status code a client of `descriptor`'s
/// version is entitled to see: codes above `max_status` are clamped down
/// to `Failure` so older clients never have to parse a code their draft
/// doesn't define.
pub fn to_status(errno: Errno, descriptor: &Descriptor) -> StatusCode {
    let code = unclamped(errno);
    if u32::from(code) > descriptor.max_status {
        StatusCode::Failure
    } else {
        code
    }
}

/// Map an [`io::Error`] to its unclamped status code. Handlers don't see
/// the active descriptor, so they report unclamped and let the
/// dispatcher's `encode_status`/`emit_outcome` apply the version ceiling
/// before the response reaches the wire.
pub fn from_io_error(err: &io::Error) -> StatusCode {
    unclamped(Errno::from(err))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolVersion;

    #[test]
    fn enoent_maps_to_no_such_file() {
        let status = unclamped(Errno::Os(libc::ENOENT));
        assert_eq!(status, StatusCode::NoSuchFile);
    }

    #[test]
    fn eacces_and_eperm_map_to_permission_denied() {
        assert_eq!(
            unclamped(Errno::Os(libc::EACCES)),
            StatusCode::PermissionDenied
        );
        assert_eq!(
            unclamped(Errno::Os(libc::EPERM)),
            StatusCode::PermissionDenied
        );
    }

    #[test]
    fn unknown_errno_maps_to_failure() {
        assert_eq!(unclamped(Errno::Os(i32::MAX)), StatusCode::Failure);
    }

    #[test]
    fn v3_clamps_lock_conflict_down_to_failure() {
        let descriptor = Descriptor::for_version(ProtocolVersion::V3);
        // ENOTEMPTY -> DirNotEmpty (18), above v3's max_status of 4.
        let status = to_status(Errno::Os(libc::ENOTEMPTY), descriptor);
        assert_eq!(status, StatusCode::Failure);
    }

    #[test]
    fn v6_passes_dir_not_empty_through_unclamped() {
        let descriptor = Descriptor::for_version(ProtocolVersion::V6);
        let status = to_status(Errno::Os(libc::ENOTEMPTY), descriptor);
        assert_eq!(status, StatusCode::DirNotEmpty);
    }

    #[test]
    fn eof_is_never_clamped() {
        let descriptor = Descriptor::for_version(ProtocolVersion::V3);
        assert_eq!(to_status(Errno::Eof, descriptor), StatusCode::Eof);
    }
}
