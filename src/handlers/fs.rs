//! Reference `RequestHandler`: a `tokio::fs`-backed backend rooted
//! at [`Config::root_dir`].
//!
//! Same defensive path-containment idiom and handle-table shape as a
//! typical SFTP file-op layer, and the same "apply what attributes we
//! can, log what we can't" posture for `SETSTAT`. Ownership changes
//! (`chown`) are dropped entirely rather than implemented through
//! `unsafe` libc calls, which this crate's lints deny outright.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::codec;
use crate::config::Config;
use crate::protocol::{Descriptor, FileAttrs, MessageType, OpenFlags, Operation, ProtocolVersion};
use crate::protocol::StatusCode;
use crate::session::{HandlerOutcome, RequestHandler};
use crate::status;

const READDIR_BATCH: usize = 128;

enum Entry {
    File(Arc<Mutex<fs::File>>, PathBuf),
    Dir(Arc<Mutex<DirState>>),
}

struct DirState {
    entries: Vec<fs::DirEntry>,
    next: usize,
}

/// A `tokio::fs`-backed [`RequestHandler`], chrooted (lexically, not via
/// the OS) at `root_dir`.
pub struct FsHandler {
    root: PathBuf,
    readonly: bool,
    handles: Mutex<HashMap<Vec<u8>, Entry>>,
    next_handle_id: AtomicU32,
}

impl FsHandler {
    /// Build a handler rooted at `config.root_dir`, honoring `config.readonly`.
    pub fn new(config: &Config) -> Self {
        FsHandler {
            root: config.root_dir.clone(),
            readonly: config.readonly,
            handles: Mutex::new(HashMap::new()),
            next_handle_id: AtomicU32::new(0),
        }
    }

    fn allocate_handle_id(&self) -> Vec<u8> {
        let id = self.next_handle_id.fetch_add(1, Ordering::SeqCst);
        id.to_be_bytes().to_vec()
    }

    fn resolve(&self, raw: &[u8]) -> Result<PathBuf, StatusCode> {
        resolve_path(&self.root, raw)
    }

    fn virtualize(&self, resolved: &Path) -> String {
        let relative = resolved.strip_prefix(&self.root).unwrap_or(resolved);
        let mut virtual_path = String::from("/");
        virtual_path.push_str(&relative.to_string_lossy());
        virtual_path
    }

    async fn get_file(&self, handle: &[u8]) -> Result<(Arc<Mutex<fs::File>>, PathBuf), StatusCode> {
        let handles = self.handles.lock().await;
        match handles.get(handle) {
            Some(Entry::File(file, path)) => Ok((file.clone(), path.clone())),
            Some(Entry::Dir(_)) => Err(StatusCode::InvalidHandle),
            None => Err(StatusCode::InvalidHandle),
        }
    }

    async fn get_dir(&self, handle: &[u8]) -> Result<Arc<Mutex<DirState>>, StatusCode> {
        let handles = self.handles.lock().await;
        match handles.get(handle) {
            Some(Entry::Dir(dir)) => Ok(dir.clone()),
            Some(Entry::File(..)) => Err(StatusCode::InvalidHandle),
            None => Err(StatusCode::InvalidHandle),
        }
    }

    fn check_writable(&self) -> Result<(), StatusCode> {
        if self.readonly {
            Err(StatusCode::PermissionDenied)
        } else {
            Ok(())
        }
    }

    async fn apply_attrs(&self, path: &Path, attrs: &FileAttrs) {
        if let Some(permissions) = attrs.permissions {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(permissions);
                if let Err(err) = fs::set_permissions(path, perms).await {
                    warn!(?path, %err, "failed to set permissions");
                }
            }
        }
        if let Some(size) = attrs.size {
            match fs::OpenOptions::new().write(true).open(path).await {
                Ok(file) => {
                    if let Err(err) = file.set_len(size).await {
                        warn!(?path, %err, "failed to truncate to requested size");
                    }
                }
                Err(err) => warn!(?path, %err, "failed to open for truncation"),
            }
        }
        if attrs.uid.is_some() || attrs.gid.is_some() {
            debug!(?path, "ownership changes are not supported by this handler");
        }
        if attrs.atime.is_some() || attrs.mtime.is_some() {
            debug!(?path, "timestamp changes are not supported by this handler");
        }
    }

    async fn open(
        &self,
        body: &[u8],
        request_id: u32,
        out: &mut BytesMut,
    ) -> HandlerOutcome {
        let mut cursor = body;
        let Ok(filename) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let Ok(pflags) = codec::get_u32(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let attrs = FileAttrs::decode(&mut cursor).unwrap_or_default();
        let flags = OpenFlags(pflags);

        if flags.has_write() || flags.is_namespace_mutating() {
            if let Err(status) = self.check_writable() {
                return HandlerOutcome::Status(status);
            }
        }

        let path = match self.resolve(&filename) {
            Ok(p) => p,
            Err(status) => return HandlerOutcome::Status(status),
        };

        let mut options = fs::OpenOptions::new();
        options.read(flags.has_read() || !flags.has_write());
        if flags.has_write() {
            options.write(true);
        }
        if flags.has_append() {
            options.append(true);
        }
        if flags.has_creat() {
            options.create(true);
        }
        if flags.has_trunc() {
            options.truncate(true);
        }
        if flags.has_excl() {
            options.create_new(true);
        }

        let file = match options.open(&path).await {
            Ok(f) => f,
            Err(err) => return io_status(&err),
        };

        if attrs.permissions.is_some() {
            self.apply_attrs(&path, &attrs).await;
        }

        let handle_id = self.allocate_handle_id();
        self.handles
            .lock()
            .await
            .insert(handle_id.clone(), Entry::File(Arc::new(Mutex::new(file)), path));

        codec::put_u8(out, MessageType::Handle as u8);
        codec::put_u32(out, request_id);
        codec::put_string(out, &handle_id);
        HandlerOutcome::Responded
    }

    async fn close(&self, body: &[u8]) -> HandlerOutcome {
        let mut cursor = body;
        let Ok(handle) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let removed = self.handles.lock().await.remove(&handle);
        match removed {
            Some(_) => HandlerOutcome::Status(StatusCode::Ok),
            None => HandlerOutcome::Status(StatusCode::InvalidHandle),
        }
    }

    async fn read(&self, body: &[u8], request_id: u32, out: &mut BytesMut) -> HandlerOutcome {
        let mut cursor = body;
        let (Ok(handle), Ok(offset), Ok(len)) = (
            codec::get_string(&mut cursor),
            codec::get_u64(&mut cursor),
            codec::get_u32(&mut cursor),
        ) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };

        let (file, _path) = match self.get_file(&handle).await {
            Ok(f) => f,
            Err(status) => return HandlerOutcome::Status(status),
        };

        let mut file = file.lock().await;
        if let Err(err) = file.seek(io::SeekFrom::Start(offset)).await {
            return io_status(&err);
        }

        let mut buf = vec![0u8; len as usize];
        let n = match file.read(&mut buf).await {
            Ok(n) => n,
            Err(err) => return io_status(&err),
        };
        if n == 0 {
            return HandlerOutcome::Status(StatusCode::Eof);
        }
        buf.truncate(n);

        codec::put_u8(out, MessageType::Data as u8);
        codec::put_u32(out, request_id);
        codec::put_string(out, &buf);
        HandlerOutcome::Responded
    }

    async fn write(&self, body: &[u8]) -> HandlerOutcome {
        let mut cursor = body;
        let Ok(handle) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let Ok(offset) = codec::get_u64(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let Ok(data) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };

        let (file, _path) = match self.get_file(&handle).await {
            Ok(f) => f,
            Err(status) => return HandlerOutcome::Status(status),
        };

        let mut file = file.lock().await;
        if let Err(err) = file.seek(io::SeekFrom::Start(offset)).await {
            return io_status(&err);
        }
        if let Err(err) = file.write_all(&data).await {
            return io_status(&err);
        }
        HandlerOutcome::Status(StatusCode::Ok)
    }

    async fn stat_by_path(
        &self,
        body: &[u8],
        request_id: u32,
        out: &mut BytesMut,
        follow_symlink: bool,
    ) -> HandlerOutcome {
        let mut cursor = body;
        let Ok(path_bytes) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let path = match self.resolve(&path_bytes) {
            Ok(p) => p,
            Err(status) => return HandlerOutcome::Status(status),
        };

        let meta = if follow_symlink {
            fs::metadata(&path).await
        } else {
            fs::symlink_metadata(&path).await
        };
        let meta = match meta {
            Ok(m) => m,
            Err(err) => return io_status(&err),
        };

        let attrs = attrs_from_metadata(&meta);
        codec::put_u8(out, MessageType::Attrs as u8);
        codec::put_u32(out, request_id);
        attrs.encode(out);
        HandlerOutcome::Responded
    }

    async fn fstat(&self, body: &[u8], request_id: u32, out: &mut BytesMut) -> HandlerOutcome {
        let mut cursor = body;
        let Ok(handle) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };

        let path = {
            let handles = self.handles.lock().await;
            match handles.get(&handle) {
                Some(Entry::File(_, path)) => path.clone(),
                Some(Entry::Dir(_)) => {
                    return HandlerOutcome::Status(StatusCode::InvalidHandle)
                }
                None => return HandlerOutcome::Status(StatusCode::InvalidHandle),
            }
        };

        let meta = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(err) => return io_status(&err),
        };
        let attrs = attrs_from_metadata(&meta);
        codec::put_u8(out, MessageType::Attrs as u8);
        codec::put_u32(out, request_id);
        attrs.encode(out);
        HandlerOutcome::Responded
    }

    async fn setstat(&self, body: &[u8]) -> HandlerOutcome {
        if let Err(status) = self.check_writable() {
            return HandlerOutcome::Status(status);
        }
        let mut cursor = body;
        let Ok(path_bytes) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let Ok(attrs) = FileAttrs::decode(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let path = match self.resolve(&path_bytes) {
            Ok(p) => p,
            Err(status) => return HandlerOutcome::Status(status),
        };
        self.apply_attrs(&path, &attrs).await;
        HandlerOutcome::Status(StatusCode::Ok)
    }

    async fn fsetstat(&self, body: &[u8]) -> HandlerOutcome {
        if let Err(status) = self.check_writable() {
            return HandlerOutcome::Status(status);
        }
        let mut cursor = body;
        let Ok(handle) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let Ok(attrs) = FileAttrs::decode(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let path = match self.get_file(&handle).await {
            Ok((_, path)) => path,
            Err(status) => return HandlerOutcome::Status(status),
        };
        self.apply_attrs(&path, &attrs).await;
        HandlerOutcome::Status(StatusCode::Ok)
    }

    async fn opendir(&self, body: &[u8], request_id: u32, out: &mut BytesMut) -> HandlerOutcome {
        let mut cursor = body;
        let Ok(path_bytes) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let path = match self.resolve(&path_bytes) {
            Ok(p) => p,
            Err(status) => return HandlerOutcome::Status(status),
        };

        let mut read_dir = match fs::read_dir(&path).await {
            Ok(rd) => rd,
            Err(err) => return io_status(&err),
        };

        let mut entries = Vec::new();
        loop {
            match read_dir.next_entry().await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break,
                Err(err) => return io_status(&err),
            }
        }

        let handle_id = self.allocate_handle_id();
        self.handles.lock().await.insert(
            handle_id.clone(),
            Entry::Dir(Arc::new(Mutex::new(DirState { entries, next: 0 }))),
        );

        codec::put_u8(out, MessageType::Handle as u8);
        codec::put_u32(out, request_id);
        codec::put_string(out, &handle_id);
        HandlerOutcome::Responded
    }

    async fn readdir(&self, body: &[u8], request_id: u32, out: &mut BytesMut) -> HandlerOutcome {
        let mut cursor = body;
        let Ok(handle) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };

        let dir = match self.get_dir(&handle).await {
            Ok(d) => d,
            Err(status) => return HandlerOutcome::Status(status),
        };
        let mut state = dir.lock().await;
        if state.next >= state.entries.len() {
            return HandlerOutcome::Status(StatusCode::Eof);
        }

        let end = (state.next + READDIR_BATCH).min(state.entries.len());
        let mut names = Vec::new();
        for entry in &state.entries[state.next..end] {
            let filename = entry.file_name().to_string_lossy().into_owned();
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(err) => return io_status(&err),
            };
            let attrs = attrs_from_metadata(&meta);
            let longname = format_longname(&filename, &attrs);
            names.push((filename, longname, attrs));
        }
        state.next = end;
        drop(state);

        codec::put_u8(out, MessageType::Name as u8);
        codec::put_u32(out, request_id);
        codec::put_u32(out, names.len() as u32);
        for (filename, longname, attrs) in names {
            codec::put_str(out, &filename);
            codec::put_str(out, &longname);
            attrs.encode(out);
        }
        HandlerOutcome::Responded
    }

    async fn remove(&self, body: &[u8]) -> HandlerOutcome {
        if let Err(status) = self.check_writable() {
            return HandlerOutcome::Status(status);
        }
        let mut cursor = body;
        let Ok(path_bytes) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let path = match self.resolve(&path_bytes) {
            Ok(p) => p,
            Err(status) => return HandlerOutcome::Status(status),
        };
        match fs::remove_file(&path).await {
            Ok(()) => HandlerOutcome::Status(StatusCode::Ok),
            Err(err) => io_status(&err),
        }
    }

    async fn mkdir(&self, body: &[u8]) -> HandlerOutcome {
        if let Err(status) = self.check_writable() {
            return HandlerOutcome::Status(status);
        }
        let mut cursor = body;
        let Ok(path_bytes) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let attrs = FileAttrs::decode(&mut cursor).unwrap_or_default();
        let path = match self.resolve(&path_bytes) {
            Ok(p) => p,
            Err(status) => return HandlerOutcome::Status(status),
        };
        if let Err(err) = fs::create_dir(&path).await {
            return io_status(&err);
        }
        if attrs.permissions.is_some() {
            self.apply_attrs(&path, &attrs).await;
        }
        HandlerOutcome::Status(StatusCode::Ok)
    }

    async fn rmdir(&self, body: &[u8]) -> HandlerOutcome {
        if let Err(status) = self.check_writable() {
            return HandlerOutcome::Status(status);
        }
        let mut cursor = body;
        let Ok(path_bytes) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let path = match self.resolve(&path_bytes) {
            Ok(p) => p,
            Err(status) => return HandlerOutcome::Status(status),
        };
        match fs::remove_dir(&path).await {
            Ok(()) => HandlerOutcome::Status(StatusCode::Ok),
            Err(err) => io_status(&err),
        }
    }

    async fn realpath(&self, body: &[u8], request_id: u32, out: &mut BytesMut) -> HandlerOutcome {
        let mut cursor = body;
        let Ok(path_bytes) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let path = match self.resolve(&path_bytes) {
            Ok(p) => p,
            Err(status) => return HandlerOutcome::Status(status),
        };
        let virtual_path = self.virtualize(&path);

        codec::put_u8(out, MessageType::Name as u8);
        codec::put_u32(out, request_id);
        codec::put_u32(out, 1);
        codec::put_str(out, &virtual_path);
        codec::put_str(out, &virtual_path);
        FileAttrs::default().encode(out);
        HandlerOutcome::Responded
    }

    async fn rename(&self, body: &[u8]) -> HandlerOutcome {
        if let Err(status) = self.check_writable() {
            return HandlerOutcome::Status(status);
        }
        let mut cursor = body;
        let (Ok(old_bytes), Ok(new_bytes)) =
            (codec::get_string(&mut cursor), codec::get_string(&mut cursor))
        else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let old_path = match self.resolve(&old_bytes) {
            Ok(p) => p,
            Err(status) => return HandlerOutcome::Status(status),
        };
        let new_path = match self.resolve(&new_bytes) {
            Ok(p) => p,
            Err(status) => return HandlerOutcome::Status(status),
        };
        match fs::rename(&old_path, &new_path).await {
            Ok(()) => HandlerOutcome::Status(StatusCode::Ok),
            Err(err) => io_status(&err),
        }
    }

    async fn readlink(&self, body: &[u8], request_id: u32, out: &mut BytesMut) -> HandlerOutcome {
        let mut cursor = body;
        let Ok(path_bytes) = codec::get_string(&mut cursor) else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };
        let path = match self.resolve(&path_bytes) {
            Ok(p) => p,
            Err(status) => return HandlerOutcome::Status(status),
        };
        let target = match fs::read_link(&path).await {
            Ok(t) => t,
            Err(err) => return io_status(&err),
        };
        let target = target.to_string_lossy().into_owned();

        codec::put_u8(out, MessageType::Name as u8);
        codec::put_u32(out, request_id);
        codec::put_u32(out, 1);
        codec::put_str(out, &target);
        codec::put_str(out, &target);
        FileAttrs::default().encode(out);
        HandlerOutcome::Responded
    }

    async fn symlink(
        &self,
        body: &[u8],
        descriptor: &Descriptor,
        reverse_symlink: bool,
    ) -> HandlerOutcome {
        if let Err(status) = self.check_writable() {
            return HandlerOutcome::Status(status);
        }
        let mut cursor = body;
        let (Ok(first), Ok(second)) =
            (codec::get_string(&mut cursor), codec::get_string(&mut cursor))
        else {
            return HandlerOutcome::Status(StatusCode::BadMessage);
        };

        // See the symlink-order REDESIGN FLAG: only v3 ever swaps.
        let (link_bytes, target_bytes) =
            if matches!(descriptor.version, ProtocolVersion::V3) && reverse_symlink {
                (second, first)
            } else {
                (first, second)
            };

        let link_path = match self.resolve(&link_bytes) {
            Ok(p) => p,
            Err(status) => return HandlerOutcome::Status(status),
        };
        let target_path = match self.resolve(&target_bytes) {
            Ok(p) => p,
            Err(status) => return HandlerOutcome::Status(status),
        };

        #[cfg(unix)]
        let result = tokio::fs::symlink(&target_path, &link_path).await;
        #[cfg(not(unix))]
        let result: io::Result<()> = Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "symlinks are only supported on unix",
        ));

        match result {
            Ok(()) => HandlerOutcome::Status(StatusCode::Ok),
            Err(err) => io_status(&err),
        }
    }
}

#[async_trait]
impl RequestHandler for FsHandler {
    async fn handle(
        &self,
        operation: Operation,
        body: &[u8],
        request_id: u32,
        out: &mut BytesMut,
        descriptor: &'static Descriptor,
        reverse_symlink: bool,
    ) -> HandlerOutcome {
        match operation {
            Operation::Open => self.open(body, request_id, out).await,
            Operation::Close => self.close(body).await,
            Operation::Read => self.read(body, request_id, out).await,
            Operation::Write => self.write(body).await,
            Operation::Lstat => self.stat_by_path(body, request_id, out, false).await,
            Operation::Stat => self.stat_by_path(body, request_id, out, true).await,
            Operation::Fstat => self.fstat(body, request_id, out).await,
            Operation::Setstat => self.setstat(body).await,
            Operation::Fsetstat => self.fsetstat(body).await,
            Operation::Opendir => self.opendir(body, request_id, out).await,
            Operation::Readdir => self.readdir(body, request_id, out).await,
            Operation::Remove => self.remove(body).await,
            Operation::Mkdir => self.mkdir(body).await,
            Operation::Rmdir => self.rmdir(body).await,
            Operation::Realpath => self.realpath(body, request_id, out).await,
            Operation::Rename => self.rename(body).await,
            Operation::Readlink => self.readlink(body, request_id, out).await,
            Operation::Symlink => self.symlink(body, descriptor, reverse_symlink).await,
            Operation::Init => HandlerOutcome::Status(StatusCode::BadMessage),
        }
    }
}

fn io_status(err: &io::Error) -> HandlerOutcome {
    HandlerOutcome::Status(status::from_io_error(err))
}

fn resolve_path(root: &Path, raw: &[u8]) -> Result<PathBuf, StatusCode> {
    let path_str = std::str::from_utf8(raw).map_err(|_| StatusCode::InvalidFilename)?;
    if path_str.contains('\0') {
        return Err(StatusCode::InvalidFilename);
    }

    let relative = path_str.trim_start_matches('/');
    let mut resolved = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if resolved == root {
                    return Err(StatusCode::PermissionDenied);
                }
                resolved.pop();
                if !resolved.starts_with(root) {
                    return Err(StatusCode::PermissionDenied);
                }
            }
        }
    }
    Ok(resolved)
}

#[cfg(unix)]
fn attrs_from_metadata(meta: &std::fs::Metadata) -> FileAttrs {
    use std::os::unix::fs::MetadataExt;
    FileAttrs {
        size: Some(meta.len()),
        uid: Some(meta.uid()),
        gid: Some(meta.gid()),
        permissions: Some(meta.mode()),
        atime: Some(meta.atime() as u32),
        mtime: Some(meta.mtime() as u32),
    }
}

#[cfg(not(unix))]
fn attrs_from_metadata(meta: &std::fs::Metadata) -> FileAttrs {
    FileAttrs {
        size: Some(meta.len()),
        ..Default::default()
    }
}

fn format_longname(filename: &str, attrs: &FileAttrs) -> String {
    let mode = attrs.permissions.unwrap_or(0o644);
    let type_char = if mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32 {
        'd'
    } else if mode & libc::S_IFMT as u32 == libc::S_IFLNK as u32 {
        'l'
    } else {
        '-'
    };
    let perm_bits = [
        (libc::S_IRUSR, 'r'),
        (libc::S_IWUSR, 'w'),
        (libc::S_IXUSR, 'x'),
        (libc::S_IRGRP, 'r'),
        (libc::S_IWGRP, 'w'),
        (libc::S_IXGRP, 'x'),
        (libc::S_IROTH, 'r'),
        (libc::S_IWOTH, 'w'),
        (libc::S_IXOTH, 'x'),
    ];
    let perm_string: String = perm_bits
        .iter()
        .map(|(bit, ch)| if mode & (*bit as u32) != 0 { *ch } else { '-' })
        .collect();

    format!(
        "{type_char}{perm_string} 1 {} {} {:>10} {filename}",
        attrs.uid.unwrap_or(0),
        attrs.gid.unwrap_or(0),
        attrs.size.unwrap_or(0),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_rejects_escape_above_root() {
        let root = PathBuf::from("/srv/sftp");
        assert!(resolve_path(&root, b"../../etc/passwd").is_err());
    }

    #[test]
    fn resolve_path_joins_relative_path_under_root() {
        let root = PathBuf::from("/srv/sftp");
        let resolved = resolve_path(&root, b"/uploads/file.txt").unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/sftp/uploads/file.txt"));
    }

    #[test]
    fn resolve_path_allows_parent_dir_that_stays_inside_root() {
        let root = PathBuf::from("/srv/sftp");
        let resolved = resolve_path(&root, b"/a/../b").unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/sftp/b"));
    }

    #[tokio::test]
    async fn open_close_read_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            root_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let handler = FsHandler::new(&config);

        let mut open_body = BytesMut::new();
        codec::put_str(&mut open_body, "/greeting.txt");
        codec::put_u32(
            &mut open_body,
            OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC,
        );
        codec::put_u32(&mut open_body, 0); // no attrs

        let mut out = BytesMut::new();
        let outcome = handler.open(&open_body, 1, &mut out).await;
        assert!(matches!(outcome, HandlerOutcome::Responded));

        let mut reply: &[u8] = &out;
        assert_eq!(codec::get_u8(&mut reply).unwrap(), MessageType::Handle as u8);
        assert_eq!(codec::get_u32(&mut reply).unwrap(), 1);
        let handle = codec::get_string(&mut reply).unwrap();

        let mut write_body = BytesMut::new();
        codec::put_string(&mut write_body, &handle);
        codec::put_u64(&mut write_body, 0);
        codec::put_str(&mut write_body, "hello world");
        let outcome = handler.write(&write_body).await;
        assert!(matches!(outcome, HandlerOutcome::Status(StatusCode::Ok)));

        let mut close_body = BytesMut::new();
        codec::put_string(&mut close_body, &handle);
        let outcome = handler.close(&close_body).await;
        assert!(matches!(outcome, HandlerOutcome::Status(StatusCode::Ok)));

        let contents = std::fs::read_to_string(dir.path().join("greeting.txt")).unwrap();
        assert_eq!(contents, "hello world");
    }

    #[tokio::test]
    async fn readonly_config_rejects_mutating_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            root_dir: dir.path().to_path_buf(),
            readonly: true,
            ..Default::default()
        };
        let handler = FsHandler::new(&config);

        let mut open_body = BytesMut::new();
        codec::put_str(&mut open_body, "/new.txt");
        codec::put_u32(&mut open_body, OpenFlags::WRITE | OpenFlags::CREAT);
        codec::put_u32(&mut open_body, 0);

        let mut out = BytesMut::new();
        let outcome = handler.open(&open_body, 1, &mut out).await;
        assert!(matches!(
            outcome,
            HandlerOutcome::Status(StatusCode::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn close_unknown_handle_is_invalid_handle() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            root_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let handler = FsHandler::new(&config);

        let mut close_body = BytesMut::new();
        codec::put_str(&mut close_body, "bogus");
        let outcome = handler.close(&close_body).await;
        assert!(matches!(
            outcome,
            HandlerOutcome::Status(StatusCode::InvalidHandle)
        ));
    }
}
