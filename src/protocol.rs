//! Protocol descriptor: per-version command tables, capability bits,
//! and status-code ceilings.
//!
//! Five compile-time tables exist: [`Descriptor::pre_init`], and one each
//! for v3 through v6. The dispatcher holds a pointer to exactly one of
//! them at a time, starting at `pre_init` and swapping to the chosen
//! version's table the moment `INIT` is handled (see [`crate::session`]).

/// SFTP request/response message type tags, as they appear in byte zero
/// of every packet body.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Negotiate protocol version. No request id follows.
    Init = 1,
    /// Response to `Init`.
    Version = 2,
    /// Open (or create) a file, returning a handle.
    Open = 3,
    /// Close a handle.
    Close = 4,
    /// Read from a file handle.
    Read = 5,
    /// Write to a file handle.
    Write = 6,
    /// Get attributes by path, not following a trailing symlink.
    Lstat = 7,
    /// Get attributes by handle.
    Fstat = 8,
    /// Set attributes by path.
    Setstat = 9,
    /// Set attributes by handle.
    Fsetstat = 10,
    /// Open a directory handle.
    Opendir = 11,
    /// Read the next batch of directory entries.
    Readdir = 12,
    /// Remove a file.
    Remove = 13,
    /// Create a directory.
    Mkdir = 14,
    /// Remove a directory.
    Rmdir = 15,
    /// Canonicalize a path.
    Realpath = 16,
    /// Get attributes by path, following a trailing symlink.
    Stat = 17,
    /// Rename (or move) a file or directory.
    Rename = 18,
    /// Read the target of a symbolic link.
    Readlink = 19,
    /// Create a symbolic link.
    Symlink = 20,
    /// Status response.
    Status = 101,
    /// Handle response.
    Handle = 102,
    /// Data response.
    Data = 103,
    /// Name-list response (realpath, readdir, readlink).
    Name = 104,
    /// Attributes response.
    Attrs = 105,
    /// Vendor extension request.
    Extended = 200,
    /// Vendor extension response.
    ExtendedReply = 201,
}

impl TryFrom<u8> for MessageType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => MessageType::Init,
            2 => MessageType::Version,
            3 => MessageType::Open,
            4 => MessageType::Close,
            5 => MessageType::Read,
            6 => MessageType::Write,
            7 => MessageType::Lstat,
            8 => MessageType::Fstat,
            9 => MessageType::Setstat,
            10 => MessageType::Fsetstat,
            11 => MessageType::Opendir,
            12 => MessageType::Readdir,
            13 => MessageType::Remove,
            14 => MessageType::Mkdir,
            15 => MessageType::Rmdir,
            16 => MessageType::Realpath,
            17 => MessageType::Stat,
            18 => MessageType::Rename,
            19 => MessageType::Readlink,
            20 => MessageType::Symlink,
            101 => MessageType::Status,
            102 => MessageType::Handle,
            103 => MessageType::Data,
            104 => MessageType::Name,
            105 => MessageType::Attrs,
            200 => MessageType::Extended,
            201 => MessageType::ExtendedReply,
            other => {
                return Err(crate::Error::protocol(format!(
                    "unknown message type: {other}"
                )))
            }
        })
    }
}

/// A negotiated protocol version, or the pre-negotiation sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// No `INIT` has been processed yet; only `INIT` itself dispatches.
    PreInit,
    /// Protocol version 3 ([draft-ietf-secsh-filexfer-02]).
    V3,
    /// Protocol version 4.
    V4,
    /// Protocol version 5.
    V5,
    /// Protocol version 6 ([draft-ietf-secsh-filexfer-13]).
    V6,
}

impl ProtocolVersion {
    /// The wire number advertised in the `VERSION` response, or `None`
    /// for the pre-init sentinel (which never sends one).
    pub fn wire_number(self) -> Option<u32> {
        match self {
            ProtocolVersion::PreInit => None,
            ProtocolVersion::V3 => Some(3),
            ProtocolVersion::V4 => Some(4),
            ProtocolVersion::V5 => Some(5),
            ProtocolVersion::V6 => Some(6),
        }
    }

    /// Choose the descriptor a client advertising wire version `v` gets.
    /// Versions 0-2 are rejected (caller sends `OP_UNSUPPORTED` and stays
    /// pre-init); we never negotiate downward from 6 or above.
    pub fn select(v: u32) -> Option<ProtocolVersion> {
        match v {
            0..=2 => None,
            3 => Some(ProtocolVersion::V3),
            4 => Some(ProtocolVersion::V4),
            5 => Some(ProtocolVersion::V5),
            _ => Some(ProtocolVersion::V6),
        }
    }
}

/// One dispatchable SFTP operation, independent of wire version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Handled specially by the dispatcher, never by an external handler.
    Init,
    /// `SSH_FXP_OPEN`.
    Open,
    /// `SSH_FXP_CLOSE`.
    Close,
    /// `SSH_FXP_READ`.
    Read,
    /// `SSH_FXP_WRITE`.
    Write,
    /// `SSH_FXP_LSTAT`.
    Lstat,
    /// `SSH_FXP_FSTAT`.
    Fstat,
    /// `SSH_FXP_SETSTAT`.
    Setstat,
    /// `SSH_FXP_FSETSTAT`.
    Fsetstat,
    /// `SSH_FXP_OPENDIR`.
    Opendir,
    /// `SSH_FXP_READDIR`.
    Readdir,
    /// `SSH_FXP_REMOVE`.
    Remove,
    /// `SSH_FXP_MKDIR`.
    Mkdir,
    /// `SSH_FXP_RMDIR`.
    Rmdir,
    /// `SSH_FXP_REALPATH`.
    Realpath,
    /// `SSH_FXP_STAT`.
    Stat,
    /// `SSH_FXP_RENAME`.
    Rename,
    /// `SSH_FXP_READLINK`.
    Readlink,
    /// `SSH_FXP_SYMLINK`.
    Symlink,
}

/// Status codes, numbered so that each protocol version's `max_status`
/// clamps exactly the set of codes that version's draft defines. v3 only
/// ever emits 0-4; v4 adds five more (5-9); v5 adds six more (10-15); v6
/// adds the rest.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Success.
    Ok = 0,
    /// End of file / end of directory listing.
    Eof = 1,
    /// No such file or directory.
    NoSuchFile = 2,
    /// Permission denied.
    PermissionDenied = 3,
    /// Generic failure; also the clamp target for out-of-range codes.
    Failure = 4,
    /// Malformed or unparseable request.
    BadMessage = 5,
    /// No connection to the server.
    NoConnection = 6,
    /// The connection was lost.
    ConnectionLost = 7,
    /// The request type is not supported by this descriptor.
    OpUnsupported = 8,
    /// The handle supplied does not refer to an open file or directory.
    InvalidHandle = 9,
    /// No such path (directory component missing).
    NoSuchPath = 10,
    /// The target of a create-exclusive open or link already exists.
    FileAlreadyExists = 11,
    /// The filesystem is write-protected.
    WriteProtect = 12,
    /// No medium present in the drive.
    NoMedia = 13,
    /// The filesystem is full.
    NoSpaceOnFilesystem = 14,
    /// The user's disk quota has been exceeded.
    QuotaExceeded = 15,
    /// An owner or group name could not be resolved.
    UnknownPrincipal = 16,
    /// A byte-range or whole-file lock could not be granted.
    LockConflict = 17,
    /// `RMDIR` on a non-empty directory.
    DirNotEmpty = 18,
    /// An operation requiring a directory was given a non-directory.
    NotADirectory = 19,
    /// A filename was rejected (too long, or host-reserved characters).
    InvalidFilename = 20,
    /// A symbolic link loop was detected while resolving a path.
    LinkLoop = 21,
    /// Cannot delete the given target.
    CannotDelete = 22,
    /// A request's parameters were invalid.
    InvalidParameter = 23,
    /// An operation requiring a file was given a directory.
    FileIsADirectory = 24,
    /// A byte-range lock conflicted with an existing lock.
    ByteRangeLockConflict = 25,
    /// A byte-range lock request was refused.
    ByteRangeLockRefused = 26,
    /// The target is pending deletion.
    DeletePending = 27,
    /// The underlying storage reported corruption.
    FileCorrupt = 28,
    /// Owner/group attributes are not supported on this filesystem.
    OwnerGroupUnsupported = 29,
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> u32 {
        code as u32
    }
}

/// File open flags as carried in `SSH_FXP_OPEN`'s `pflags` field (v3
/// encoding; the reference handler only targets v3-style open flags).
#[derive(Debug, Clone, Copy)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// Open for reading.
    pub const READ: u32 = 0x0000_0001;
    /// Open for writing.
    pub const WRITE: u32 = 0x0000_0002;
    /// Writes go to the end of the file.
    pub const APPEND: u32 = 0x0000_0004;
    /// Create the file if it does not exist.
    pub const CREAT: u32 = 0x0000_0008;
    /// Truncate an existing file to zero length.
    pub const TRUNC: u32 = 0x0000_0010;
    /// Fail if the file already exists (only meaningful with `CREAT`).
    pub const EXCL: u32 = 0x0000_0020;
    /// `NOFOLLOW`, advertised from v6 onward.
    pub const NOFOLLOW: u32 = 0x0100_0000;
    /// `DELETE_ON_CLOSE`, advertised from v6 onward.
    pub const DELETE_ON_CLOSE: u32 = 0x0200_0000;

    /// Does this request read access?
    pub fn has_read(&self) -> bool {
        self.0 & Self::READ != 0
    }
    /// Does this request write access?
    pub fn has_write(&self) -> bool {
        self.0 & Self::WRITE != 0
    }
    /// Does this request append-mode writes?
    pub fn has_append(&self) -> bool {
        self.0 & Self::APPEND != 0
    }
    /// Does this request file creation?
    pub fn has_creat(&self) -> bool {
        self.0 & Self::CREAT != 0
    }
    /// Does this request truncation?
    pub fn has_trunc(&self) -> bool {
        self.0 & Self::TRUNC != 0
    }
    /// Does this request exclusive creation?
    pub fn has_excl(&self) -> bool {
        self.0 & Self::EXCL != 0
    }
    /// Does this open mutate the namespace (create/truncate/excl), and
    /// therefore need a serialization key on its path?
    pub fn is_namespace_mutating(&self) -> bool {
        self.has_creat() || self.has_trunc() || self.has_excl()
    }
}

/// Attribute bitmask advertised in v3's attribute flags field.
pub const ATTR_SIZE: u32 = 0x0000_0001;
/// Attribute bitmask: uid/gid present.
pub const ATTR_UIDGID: u32 = 0x0000_0002;
/// Attribute bitmask: permissions present.
pub const ATTR_PERMISSIONS: u32 = 0x0000_0004;
/// Attribute bitmask: access/modify time present.
pub const ATTR_ACMODTIME: u32 = 0x0000_0008;

/// v3-style file attributes (`ATTRS`): a flags word followed by whichever
/// fields it set. Every field is independently optional on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAttrs {
    /// File size in bytes.
    pub size: Option<u64>,
    /// Owning user id.
    pub uid: Option<u32>,
    /// Owning group id.
    pub gid: Option<u32>,
    /// Unix permission bits.
    pub permissions: Option<u32>,
    /// Last access time, seconds since epoch.
    pub atime: Option<u32>,
    /// Last modification time, seconds since epoch.
    pub mtime: Option<u32>,
}

impl FileAttrs {
    /// Encode into `out`, writing only the flags bit and fields present.
    pub fn encode(&self, out: &mut bytes::BytesMut) {
        use bytes::BufMut;

        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= ATTR_SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= ATTR_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= ATTR_PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= ATTR_ACMODTIME;
        }
        out.put_u32(flags);

        if let Some(size) = self.size {
            out.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            out.put_u32(uid);
            out.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            out.put_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            out.put_u32(atime);
            out.put_u32(mtime);
        }
    }

    /// Decode from the front of `buf`, consuming only the fields the
    /// flags word declares present.
    ///
    /// # Errors
    /// Returns [`crate::Error::Protocol`] if `buf` is shorter than a
    /// field the flags word claims is present.
    pub fn decode(buf: &mut &[u8]) -> crate::error::Result<Self> {
        let flags = crate::codec::get_u32(buf)?;
        let mut attrs = FileAttrs::default();

        if flags & ATTR_SIZE != 0 {
            attrs.size = Some(crate::codec::get_u64(buf)?);
        }
        if flags & ATTR_UIDGID != 0 {
            attrs.uid = Some(crate::codec::get_u32(buf)?);
            attrs.gid = Some(crate::codec::get_u32(buf)?);
        }
        if flags & ATTR_PERMISSIONS != 0 {
            attrs.permissions = Some(crate::codec::get_u32(buf)?);
        }
        if flags & ATTR_ACMODTIME != 0 {
            attrs.atime = Some(crate::codec::get_u32(buf)?);
            attrs.mtime = Some(crate::codec::get_u32(buf)?);
        }

        Ok(attrs)
    }
}

/// One entry in a version's command table: the wire type byte and the
/// operation it dispatches to.
pub type CommandEntry = (u8, Operation);

/// An immutable per-version capability and dispatch table.
pub struct Descriptor {
    /// The version this descriptor advertises (or the pre-init sentinel).
    pub version: ProtocolVersion,
    /// Command entries, sorted ascending by type byte so dispatch can
    /// binary-search them.
    pub commands: &'static [CommandEntry],
    /// The largest status code this version's clients understand; a
    /// handler result exceeding this is clamped to `Failure`.
    pub max_status: u32,
    /// Extension names advertised in `VERSION` (beyond the fixed
    /// `vendor-id`/`symlink-order@…`/`link-order@…` extensions, which
    /// every version sends unconditionally).
    pub extensions: &'static [&'static str],
    /// Attribute bits this version's `supported`/`supported2` block
    /// advertises as settable.
    pub attr_mask: u32,
    /// Open-flag bits advertised as supported.
    pub open_flag_mask: u32,
}

const PRE_INIT_COMMANDS: &[CommandEntry] = &[(MessageType::Init as u8, Operation::Init)];

macro_rules! version_commands {
    () => {
        &[
            (MessageType::Init as u8, Operation::Init),
            (MessageType::Open as u8, Operation::Open),
            (MessageType::Close as u8, Operation::Close),
            (MessageType::Read as u8, Operation::Read),
            (MessageType::Write as u8, Operation::Write),
            (MessageType::Lstat as u8, Operation::Lstat),
            (MessageType::Fstat as u8, Operation::Fstat),
            (MessageType::Setstat as u8, Operation::Setstat),
            (MessageType::Fsetstat as u8, Operation::Fsetstat),
            (MessageType::Opendir as u8, Operation::Opendir),
            (MessageType::Readdir as u8, Operation::Readdir),
            (MessageType::Remove as u8, Operation::Remove),
            (MessageType::Mkdir as u8, Operation::Mkdir),
            (MessageType::Rmdir as u8, Operation::Rmdir),
            (MessageType::Realpath as u8, Operation::Realpath),
            (MessageType::Stat as u8, Operation::Stat),
            (MessageType::Rename as u8, Operation::Rename),
            (MessageType::Readlink as u8, Operation::Readlink),
            (MessageType::Symlink as u8, Operation::Symlink),
        ]
    };
}

const V3_COMMANDS: &[CommandEntry] = version_commands!();
const V4_COMMANDS: &[CommandEntry] = version_commands!();
const V5_COMMANDS: &[CommandEntry] = version_commands!();
const V6_COMMANDS: &[CommandEntry] = version_commands!();

const V5_EXTENSIONS: &[&str] = &["version-select"];
const V6_EXTENSIONS: &[&str] = &["version-select"];

impl Descriptor {
    /// The sentinel descriptor in effect before `INIT` completes: only
    /// `INIT` binary-searches successfully against it.
    pub fn pre_init() -> &'static Descriptor {
        &PRE_INIT
    }

    /// Look up the descriptor for a negotiated version.
    pub fn for_version(version: ProtocolVersion) -> &'static Descriptor {
        match version {
            ProtocolVersion::PreInit => Self::pre_init(),
            ProtocolVersion::V3 => &V3,
            ProtocolVersion::V4 => &V4,
            ProtocolVersion::V5 => &V5,
            ProtocolVersion::V6 => &V6,
        }
    }

    /// Binary-search this descriptor's command table by wire type byte.
    pub fn lookup(&self, type_byte: u8) -> Option<Operation> {
        self.commands
            .binary_search_by_key(&type_byte, |(t, _)| *t)
            .ok()
            .map(|idx| self.commands[idx].1)
    }
}

const PRE_INIT: Descriptor = Descriptor {
    version: ProtocolVersion::PreInit,
    commands: PRE_INIT_COMMANDS,
    max_status: StatusCode::OpUnsupported as u32,
    extensions: &[],
    attr_mask: 0,
    open_flag_mask: 0,
};

const V3: Descriptor = Descriptor {
    version: ProtocolVersion::V3,
    commands: V3_COMMANDS,
    max_status: StatusCode::Failure as u32,
    extensions: &[],
    attr_mask: ATTR_SIZE | ATTR_UIDGID | ATTR_PERMISSIONS | ATTR_ACMODTIME,
    open_flag_mask: OpenFlags::READ
        | OpenFlags::WRITE
        | OpenFlags::APPEND
        | OpenFlags::CREAT
        | OpenFlags::TRUNC
        | OpenFlags::EXCL,
};

const V4: Descriptor = Descriptor {
    version: ProtocolVersion::V4,
    commands: V4_COMMANDS,
    max_status: StatusCode::InvalidHandle as u32,
    extensions: &[],
    attr_mask: ATTR_SIZE | ATTR_UIDGID | ATTR_PERMISSIONS | ATTR_ACMODTIME,
    open_flag_mask: OpenFlags::READ
        | OpenFlags::WRITE
        | OpenFlags::APPEND
        | OpenFlags::CREAT
        | OpenFlags::TRUNC
        | OpenFlags::EXCL,
};

const V5: Descriptor = Descriptor {
    version: ProtocolVersion::V5,
    commands: V5_COMMANDS,
    max_status: StatusCode::QuotaExceeded as u32,
    extensions: V5_EXTENSIONS,
    attr_mask: ATTR_SIZE | ATTR_UIDGID | ATTR_PERMISSIONS | ATTR_ACMODTIME,
    open_flag_mask: OpenFlags::READ
        | OpenFlags::WRITE
        | OpenFlags::APPEND
        | OpenFlags::CREAT
        | OpenFlags::TRUNC
        | OpenFlags::EXCL,
};

const V6: Descriptor = Descriptor {
    version: ProtocolVersion::V6,
    commands: V6_COMMANDS,
    max_status: StatusCode::OwnerGroupUnsupported as u32,
    extensions: V6_EXTENSIONS,
    attr_mask: ATTR_SIZE | ATTR_UIDGID | ATTR_PERMISSIONS | ATTR_ACMODTIME,
    open_flag_mask: OpenFlags::READ
        | OpenFlags::WRITE
        | OpenFlags::APPEND
        | OpenFlags::CREAT
        | OpenFlags::TRUNC
        | OpenFlags::EXCL
        | OpenFlags::NOFOLLOW
        | OpenFlags::DELETE_ON_CLOSE,
};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_known_values() {
        assert_eq!(MessageType::try_from(1).unwrap(), MessageType::Init);
        assert_eq!(MessageType::try_from(20).unwrap(), MessageType::Symlink);
        assert_eq!(MessageType::try_from(101).unwrap(), MessageType::Status);
        assert!(MessageType::try_from(0).is_err());
        assert!(MessageType::try_from(250).is_err());
    }

    #[test]
    fn version_selection_matches_spec_rules() {
        assert_eq!(ProtocolVersion::select(0), None);
        assert_eq!(ProtocolVersion::select(2), None);
        assert_eq!(ProtocolVersion::select(3), Some(ProtocolVersion::V3));
        assert_eq!(ProtocolVersion::select(4), Some(ProtocolVersion::V4));
        assert_eq!(ProtocolVersion::select(5), Some(ProtocolVersion::V5));
        assert_eq!(ProtocolVersion::select(6), Some(ProtocolVersion::V6));
        assert_eq!(ProtocolVersion::select(9000), Some(ProtocolVersion::V6));
    }

    #[test]
    fn file_attrs_round_trip_partial_fields() {
        let attrs = FileAttrs {
            size: Some(4096),
            permissions: Some(0o644),
            ..Default::default()
        };
        let mut out = bytes::BytesMut::new();
        attrs.encode(&mut out);
        let frozen = out.freeze();
        let mut slice: &[u8] = &frozen;
        let decoded = FileAttrs::decode(&mut slice).unwrap();
        assert_eq!(decoded, attrs);
        assert!(slice.is_empty());
    }

    #[test]
    fn file_attrs_uidgid_requires_both_fields_present() {
        let attrs = FileAttrs {
            uid: Some(1000),
            gid: Some(1000),
            ..Default::default()
        };
        let mut out = bytes::BytesMut::new();
        attrs.encode(&mut out);
        let frozen = out.freeze();
        let mut slice: &[u8] = &frozen;
        let decoded = FileAttrs::decode(&mut slice).unwrap();
        assert_eq!(decoded.uid, Some(1000));
        assert_eq!(decoded.gid, Some(1000));
    }

    #[test]
    fn pre_init_descriptor_only_dispatches_init() {
        let d = Descriptor::pre_init();
        assert_eq!(d.lookup(MessageType::Init as u8), Some(Operation::Init));
        assert_eq!(d.lookup(MessageType::Open as u8), None);
    }

    #[test]
    fn command_tables_are_sorted_for_binary_search() {
        for version in [
            ProtocolVersion::V3,
            ProtocolVersion::V4,
            ProtocolVersion::V5,
            ProtocolVersion::V6,
        ] {
            let d = Descriptor::for_version(version);
            let mut prev = None;
            for (t, _) in d.commands {
                if let Some(p) = prev {
                    assert!(p < *t, "command table not sorted ascending");
                }
                prev = Some(*t);
            }
        }
    }

    #[test]
    fn max_status_clamp_boundary_matches_lock_conflict_scenario() {
        // SSH_FX_LOCK_CONFLICT is 17; v3's max_status (4) must be below it
        // so it gets clamped, while v6's max_status (29) must admit it.
        assert!(V3.max_status < StatusCode::LockConflict as u32);
        assert!(V6.max_status >= StatusCode::LockConflict as u32);
    }

    #[test]
    fn open_flags_decode_individual_bits() {
        let flags = OpenFlags(OpenFlags::READ | OpenFlags::CREAT);
        assert!(flags.has_read());
        assert!(flags.has_creat());
        assert!(!flags.has_write());
        assert!(flags.is_namespace_mutating());

        let ro = OpenFlags(OpenFlags::READ);
        assert!(!ro.is_namespace_mutating());
    }
}
