//! One in-flight request and the serialization keys it contends on.

use crate::protocol::{MessageType, OpenFlags, Operation};

/// An opaque resource token a job may contend on. Handle keys and path
/// keys are tagged so a handle's bytes can never collide with a path's,
/// even if they happen to coincide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerializationKey(Vec<u8>);

impl SerializationKey {
    /// A key derived from the raw bytes of a handle argument.
    pub fn handle(bytes: &[u8]) -> Self {
        let mut key = Vec::with_capacity(bytes.len() + 1);
        key.push(b'h');
        key.extend_from_slice(bytes);
        SerializationKey(key)
    }

    /// A key derived from the wire-literal bytes of a path argument. Not
    /// canonicalized: canonicalizing would require a filesystem round
    /// trip the core does not perform.
    pub fn path(bytes: &[u8]) -> Self {
        let mut key = Vec::with_capacity(bytes.len() + 1);
        key.push(b'p');
        key.extend_from_slice(bytes);
        SerializationKey(key)
    }
}

/// A single in-flight request: its operation, request id, body bytes
/// (everything after the type byte and request id), and the
/// serialization keys it was derived to hold. `seq` is assigned by
/// [`crate::serializer::Serializer::queue_serializable`] and establishes
/// the total registration order used to resolve key conflicts.
pub struct Job {
    /// The operation this job dispatches to. `None` only for requests
    /// whose type byte did not resolve against the active descriptor.
    pub operation: Operation,
    /// The request id carried on the wire (absent only for `INIT`).
    pub request_id: Option<u32>,
    /// Body bytes following the type byte and request id.
    pub body: Vec<u8>,
    /// Resources this job contends on; see [`derive_keys`].
    pub keys: Vec<SerializationKey>,
    /// Registration sequence number, assigned at `queue_serializable` time.
    pub seq: u64,
}

impl Job {
    /// Construct a job with its keys pre-derived; `seq` is filled in by
    /// the serializer at registration time.
    pub fn new(operation: Operation, request_id: Option<u32>, body: Vec<u8>) -> Self {
        let keys = derive_keys(operation, &body);
        Job {
            operation,
            request_id,
            body,
            keys,
            seq: 0,
        }
    }
}

/// Derive the serialization key set for a parsed-but-not-yet-dispatched
/// request, per the rule fixed for this implementation: handle-bearing
/// requests key on their handle, namespace-mutating path requests key on
/// each path argument, and read-only/handle-less requests key on
/// nothing.
pub fn derive_keys(operation: Operation, body: &[u8]) -> Vec<SerializationKey> {
    let mut cursor: &[u8] = body;

    match operation {
        Operation::Close | Operation::Read | Operation::Write | Operation::Fstat
        | Operation::Fsetstat | Operation::Readdir => {
            read_handle_key(&mut cursor).into_iter().collect()
        }
        Operation::Open => {
            // string filename, u32 pflags, ATTRS...
            let Some(_filename) = read_string(&mut cursor) else {
                return Vec::new();
            };
            let Some(pflags) = read_u32(&mut cursor) else {
                return Vec::new();
            };
            if OpenFlags(pflags).is_namespace_mutating() {
                cursor = body;
                read_path_key(&mut cursor, 0).into_iter().collect()
            } else {
                Vec::new()
            }
        }
        Operation::Remove | Operation::Mkdir | Operation::Rmdir => {
            read_path_key(&mut cursor, 0).into_iter().collect()
        }
        Operation::Rename => {
            let mut keys = Vec::new();
            if let Some(k) = read_path_key(&mut cursor, 0) {
                keys.push(k);
            }
            if let Some(k) = read_path_key(&mut cursor, 0) {
                keys.push(k);
            }
            keys
        }
        Operation::Symlink => {
            let mut keys = Vec::new();
            if let Some(k) = read_path_key(&mut cursor, 0) {
                keys.push(k);
            }
            if let Some(k) = read_path_key(&mut cursor, 0) {
                keys.push(k);
            }
            keys
        }
        Operation::Stat
        | Operation::Lstat
        | Operation::Opendir
        | Operation::Readlink
        | Operation::Realpath
        | Operation::Setstat
        | Operation::Init => Vec::new(),
    }
}

fn read_u32(cursor: &mut &[u8]) -> Option<u32> {
    crate::codec::get_u32(cursor).ok()
}

fn read_string(cursor: &mut &[u8]) -> Option<Vec<u8>> {
    crate::codec::get_string(cursor).ok()
}

fn read_handle_key(cursor: &mut &[u8]) -> Option<SerializationKey> {
    read_string(cursor).map(|h| SerializationKey::handle(&h))
}

fn read_path_key(cursor: &mut &[u8], skip_strings_before: usize) -> Option<SerializationKey> {
    for _ in 0..skip_strings_before {
        read_string(cursor)?;
    }
    read_string(cursor).map(|p| SerializationKey::path(&p))
}

/// True if `type_byte` identifies the `INIT` request, which never
/// carries a request id.
pub fn is_init(type_byte: u8) -> bool {
    type_byte == MessageType::Init as u8
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encode_string(out: &mut BytesMut, s: &str) {
        crate::codec::put_str(out, s);
    }

    #[test]
    fn close_derives_single_handle_key() {
        let mut body = BytesMut::new();
        encode_string(&mut body, "handle-bytes");
        let keys = derive_keys(Operation::Close, &body);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0], SerializationKey::handle(b"handle-bytes"));
    }

    #[test]
    fn readonly_open_derives_no_keys() {
        let mut body = BytesMut::new();
        encode_string(&mut body, "/tmp/file");
        crate::codec::put_u32(&mut body, OpenFlags::READ);
        let keys = derive_keys(Operation::Open, &body);
        assert!(keys.is_empty());
    }

    #[test]
    fn creating_open_derives_path_key() {
        let mut body = BytesMut::new();
        encode_string(&mut body, "/tmp/file");
        crate::codec::put_u32(&mut body, OpenFlags::READ | OpenFlags::CREAT);
        let keys = derive_keys(Operation::Open, &body);
        assert_eq!(keys, vec![SerializationKey::path(b"/tmp/file")]);
    }

    #[test]
    fn rename_derives_both_path_keys() {
        let mut body = BytesMut::new();
        encode_string(&mut body, "/a");
        encode_string(&mut body, "/b");
        let keys = derive_keys(Operation::Rename, &body);
        assert_eq!(
            keys,
            vec![SerializationKey::path(b"/a"), SerializationKey::path(b"/b")]
        );
    }

    #[test]
    fn stat_derives_no_keys() {
        let mut body = BytesMut::new();
        encode_string(&mut body, "/a");
        assert!(derive_keys(Operation::Stat, &body).is_empty());
    }

    #[test]
    fn handle_and_path_keys_never_collide() {
        assert_ne!(
            SerializationKey::handle(b"same"),
            SerializationKey::path(b"same")
        );
    }
}
