//! Dispatcher / init FSM: the top-level per-connection loop.
//!
//! Owns the protocol descriptor for this connection (a pointer that
//! starts at [`Descriptor::pre_init`] and is swapped exactly once, by
//! the `INIT` handler, before any job can reach a worker — a
//! single-writer discipline enforced just by never mutating it again
//! once the pool exists). Everything after `INIT` either runs inline
//! on the reader task or is handed to the worker pool once it has been
//! instantiated.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::Config;
use crate::error::Result;
use crate::framing::{self, ReadOutcome};
use crate::job::Job;
use crate::pool::Pool;
use crate::protocol::{Descriptor, MessageType, Operation, ProtocolVersion, StatusCode};
use crate::serializer::Serializer;

/// What a handler did with a dispatched operation.
pub enum HandlerOutcome {
    /// The handler wrote its own response (`HANDLE`/`DATA`/`NAME`/`ATTRS`)
    /// directly into the output buffer it was given.
    Responded,
    /// The handler did not write a response; the dispatcher emits a
    /// `STATUS` response carrying this code.
    Status(StatusCode),
}

/// The contract every file-system backend implements. One instance is
/// shared (read-only data aside) across every job in a connection,
/// including jobs running concurrently on the worker pool — handlers are
/// therefore responsible for their own internal synchronization (see
/// [`crate::handlers::fs::FsHandler`]'s handle table).
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Execute one already-dispatched operation, writing any response
    /// payload (everything after `u32 id`) into `out`. `descriptor` is
    /// the connection's negotiated protocol descriptor at submit time;
    /// `reverse_symlink` mirrors the connection's configuration.
    async fn handle(
        &self,
        operation: Operation,
        body: &[u8],
        request_id: u32,
        out: &mut BytesMut,
        descriptor: &'static Descriptor,
        reverse_symlink: bool,
    ) -> HandlerOutcome;
}

/// One client connection: framed I/O over `R`/`W`, a handler, and the
/// mutable connection state (descriptor, serializer, deferred pool).
pub struct Session<R, W, H> {
    reader: R,
    writer: Arc<AsyncMutex<W>>,
    handler: Arc<H>,
    serializer: Arc<Serializer>,
    pool: Option<Arc<Pool>>,
    descriptor: &'static Descriptor,
    config: Config,
    awaiting_first_post_init_job: bool,
}

impl<R, W, H> Session<R, W, H>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    H: RequestHandler + 'static,
{
    /// Build a new, pre-init session over `reader`/`writer`.
    pub fn new(reader: R, writer: W, handler: H, config: Config) -> Self {
        Session {
            reader,
            writer: Arc::new(AsyncMutex::new(writer)),
            handler: Arc::new(handler),
            serializer: Arc::new(Serializer::new()),
            pool: None,
            descriptor: Descriptor::pre_init(),
            config,
            awaiting_first_post_init_job: false,
        }
    }

    /// Run the dispatcher loop until the peer disconnects cleanly or a
    /// framing error makes the stream unrecoverable.
    pub async fn run(mut self) -> Result<()> {
        loop {
            match framing::read_packet(&mut self.reader).await? {
                ReadOutcome::Eof => {
                    info!("peer closed connection");
                    return Ok(());
                }
                ReadOutcome::Frame(payload) => {
                    self.handle_frame(payload).await?;
                }
            }
        }
    }

    async fn handle_frame(&mut self, payload: Vec<u8>) -> Result<()> {
        let mut cursor: &[u8] = &payload;

        let type_byte = match codec::get_u8(&mut cursor) {
            Ok(b) => b,
            Err(_) => {
                self.send_status_no_id(StatusCode::BadMessage, "empty frame")
                    .await?;
                return Ok(());
            }
        };

        if type_byte == MessageType::Init as u8 {
            return self.handle_init(cursor).await;
        }

        let request_id = match codec::get_u32(&mut cursor) {
            Ok(id) => id,
            Err(_) => {
                self.send_status_no_id(StatusCode::BadMessage, "missing request id")
                    .await?;
                return Ok(());
            }
        };

        let descriptor = self.descriptor;
        let operation = match descriptor.lookup(type_byte) {
            Some(op) => op,
            None => {
                self.send_status(request_id, StatusCode::OpUnsupported, "unsupported command")
                    .await?;
                return Ok(());
            }
        };

        let mut job = Job::new(operation, Some(request_id), cursor.to_vec());
        self.serializer.queue_serializable(&mut job);

        if let Some(pool) = self.pool.clone() {
            let handler = self.handler.clone();
            let serializer = self.serializer.clone();
            let writer = self.writer.clone();
            let reverse_symlink = self.config.reverse_symlink;
            let task: crate::pool::Task = Box::pin(async move {
                serializer.serialize(&job).await;
                let mut out = BytesMut::new();
                let outcome = handler
                    .handle(
                        job.operation,
                        &job.body,
                        request_id,
                        &mut out,
                        descriptor,
                        reverse_symlink,
                    )
                    .await;
                if let Err(err) = emit_outcome(&writer, descriptor, request_id, outcome, out).await {
                    warn!(error = %err, "failed writing pooled job response");
                }
                serializer.serialize_remove(&job);
            });
            pool.submit(task).await?;
        } else {
            self.serializer.serialize(&job).await;
            let mut out = BytesMut::new();
            let outcome = self
                .handler
                .handle(
                    job.operation,
                    &job.body,
                    request_id,
                    &mut out,
                    descriptor,
                    self.config.reverse_symlink,
                )
                .await;
            emit_outcome(&self.writer, descriptor, request_id, outcome, out).await?;
            self.serializer.serialize_remove(&job);
            self.maybe_activate_pool().await;
        }

        Ok(())
    }

    async fn handle_init(&mut self, mut cursor: &[u8]) -> Result<()> {
        if !matches!(self.descriptor.version, ProtocolVersion::PreInit) {
            self.send_status_no_id(StatusCode::Failure, "already initialized")
                .await?;
            return Ok(());
        }

        let advertised = match codec::get_u32(&mut cursor) {
            Ok(v) => v,
            Err(_) => {
                self.send_status_no_id(StatusCode::BadMessage, "malformed INIT")
                    .await?;
                return Ok(());
            }
        };

        let chosen = match ProtocolVersion::select(advertised) {
            Some(v) => v,
            None => {
                self.send_status_no_id(StatusCode::OpUnsupported, "unsupported protocol version")
                    .await?;
                return Ok(());
            }
        };

        self.descriptor = Descriptor::for_version(chosen);
        info!(version = ?chosen, "negotiated protocol version");
        self.write_version_response(chosen).await?;

        match chosen {
            ProtocolVersion::V6 => {
                self.awaiting_first_post_init_job = true;
            }
            _ => {
                self.activate_pool().await;
            }
        }

        Ok(())
    }

    async fn maybe_activate_pool(&mut self) {
        if self.awaiting_first_post_init_job && self.pool.is_none() {
            self.awaiting_first_post_init_job = false;
            self.activate_pool().await;
        }
    }

    async fn activate_pool(&mut self) {
        debug!(size = self.config.pool_size, "instantiating worker pool");
        self.pool = Some(Pool::start(self.config.pool_size, self.config.queue_capacity));
    }

    async fn write_version_response(&mut self, chosen: ProtocolVersion) -> Result<()> {
        let descriptor = Descriptor::for_version(chosen);
        let mut out = BytesMut::new();
        codec::put_u8(&mut out, MessageType::Version as u8);
        codec::put_u32(
            &mut out,
            chosen.wire_number().unwrap_or(0),
        );

        if matches!(chosen, ProtocolVersion::V4 | ProtocolVersion::V5 | ProtocolVersion::V6) {
            codec::put_str(&mut out, "newline");
            codec::put_str(&mut out, "\n");
        }

        if matches!(chosen, ProtocolVersion::V5) {
            codec::put_str(&mut out, "supported");
            let mut block = codec::SubBlock::begin(&mut out);
            codec::put_u32(block.buf(), descriptor.attr_mask);
            codec::put_u32(block.buf(), 0); // attribute-extension bits
            codec::put_u32(block.buf(), descriptor.open_flag_mask);
            codec::put_u32(block.buf(), 0xFFFF_FFFF); // access mask
            codec::put_u32(block.buf(), 0); // max-read-size: unbounded, no server-side cap
            for ext in descriptor.extensions {
                codec::put_str(block.buf(), ext);
            }
            block.end();
        }

        if matches!(chosen, ProtocolVersion::V6) {
            codec::put_str(&mut out, "supported2");
            let mut block = codec::SubBlock::begin(&mut out);
            codec::put_u32(block.buf(), descriptor.attr_mask);
            codec::put_u32(block.buf(), 0); // attribute-extension bits
            codec::put_u32(block.buf(), descriptor.open_flag_mask);
            codec::put_u32(block.buf(), 0xFFFF_FFFF); // access mask
            codec::put_u32(block.buf(), 0); // max-read-size
            codec::put_u16(block.buf(), 0); // supported-open-block-vector
            codec::put_u16(block.buf(), 0); // supported-block-vector
            codec::put_u32(block.buf(), 0); // attrib-extension-count
            codec::put_u32(block.buf(), descriptor.extensions.len() as u32);
            for ext in descriptor.extensions {
                codec::put_str(block.buf(), ext);
            }
            block.end();

            codec::put_str(&mut out, "versions");
            codec::put_str(&mut out, "3,4,5,6");
        }

        codec::put_str(&mut out, "vendor-id");
        {
            let mut block = codec::SubBlock::begin(&mut out);
            codec::put_str(block.buf(), "sftp-core");
            codec::put_str(block.buf(), "sftp-core");
            codec::put_str(block.buf(), env!("CARGO_PKG_VERSION"));
            codec::put_u64(block.buf(), 0);
            block.end();
        }

        codec::put_str(&mut out, "symlink-order@sftp-core.rs");
        codec::put_str(
            &mut out,
            if self.config.reverse_symlink {
                "targetpath-linkpath"
            } else {
                "linkpath-targetpath"
            },
        );

        if matches!(chosen, ProtocolVersion::V6) {
            codec::put_str(&mut out, "link-order@sftp-core.rs");
            codec::put_str(&mut out, "linkpath-targetpath");
        }

        self.write_frame(&out).await
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        framing::write_packet(&mut *writer, payload).await
    }

    /// Send a dispatcher-generated status (malformed frame, unsupported
    /// command, re-`INIT`). These travel at whatever code they're given,
    /// never clamped: the version ceiling only applies to statuses a
    /// handler reports from an errno, not to the dispatcher's own control
    /// plane.
    async fn send_status(&mut self, request_id: u32, code: StatusCode, message: &str) -> Result<()> {
        let payload = encode_status_unclamped(request_id, code, message);
        self.write_frame(&payload).await
    }

    async fn send_status_no_id(&mut self, code: StatusCode, message: &str) -> Result<()> {
        self.send_status(0, code, message).await
    }
}

async fn emit_outcome<W: AsyncWrite + Unpin>(
    writer: &Arc<AsyncMutex<W>>,
    descriptor: &'static Descriptor,
    request_id: u32,
    outcome: HandlerOutcome,
    out: BytesMut,
) -> Result<()> {
    match outcome {
        HandlerOutcome::Responded => {
            let mut writer = writer.lock().await;
            framing::write_packet(&mut *writer, &out).await
        }
        HandlerOutcome::Status(code) => {
            let message = status_message(code);
            let payload = encode_status(descriptor, request_id, code, message);
            let mut writer = writer.lock().await;
            framing::write_packet(&mut *writer, &payload).await
        }
    }
}

fn build_status_frame(request_id: u32, code: StatusCode, message: &str) -> Vec<u8> {
    let mut out = BytesMut::new();
    codec::put_u8(&mut out, MessageType::Status as u8);
    codec::put_u32(&mut out, request_id);
    codec::put_u32(&mut out, u32::from(code));
    codec::put_str(&mut out, message);
    codec::put_str(&mut out, "en");
    out.to_vec()
}

/// Build a complete `SSH_FXP_STATUS` response, clamping `code` to
/// `descriptor.max_status` so older clients never see a status code
/// their draft doesn't define. Only for statuses a handler derived from
/// an errno; dispatcher-generated statuses use [`encode_status_unclamped`].
pub fn encode_status(
    descriptor: &Descriptor,
    request_id: u32,
    code: StatusCode,
    message: &str,
) -> Vec<u8> {
    let code = if u32::from(code) > descriptor.max_status {
        StatusCode::Failure
    } else {
        code
    };
    build_status_frame(request_id, code, message)
}

/// Build a `SSH_FXP_STATUS` response with no version clamp, for statuses
/// the dispatcher itself generates (`BAD_MESSAGE` on a malformed frame,
/// `OP_UNSUPPORTED` for a command outside the negotiated descriptor, a
/// rejected re-`INIT`). These are part of the protocol's control plane at
/// every version, not a handler's errno mapping, so they are never
/// clamped down to `Failure`.
pub fn encode_status_unclamped(request_id: u32, code: StatusCode, message: &str) -> Vec<u8> {
    build_status_frame(request_id, code, message)
}

fn status_message(code: StatusCode) -> &'static str {
    match code {
        StatusCode::Ok => "OK",
        StatusCode::Eof => "EOF",
        StatusCode::NoSuchFile => "No such file",
        StatusCode::PermissionDenied => "Permission denied",
        StatusCode::Failure => "Failure",
        StatusCode::BadMessage => "Malformed request",
        StatusCode::NoConnection => "No connection",
        StatusCode::ConnectionLost => "Connection lost",
        StatusCode::OpUnsupported => "Operation unsupported",
        StatusCode::InvalidHandle => "Invalid handle",
        StatusCode::NoSuchPath => "No such path",
        StatusCode::FileAlreadyExists => "File already exists",
        StatusCode::WriteProtect => "Write protected filesystem",
        StatusCode::NoMedia => "No media",
        StatusCode::NoSpaceOnFilesystem => "No space on filesystem",
        StatusCode::QuotaExceeded => "Quota exceeded",
        StatusCode::UnknownPrincipal => "Unknown principal",
        StatusCode::LockConflict => "Lock conflict",
        StatusCode::DirNotEmpty => "Directory not empty",
        StatusCode::NotADirectory => "Not a directory",
        StatusCode::InvalidFilename => "Invalid filename",
        StatusCode::LinkLoop => "Link loop detected",
        StatusCode::CannotDelete => "Cannot delete",
        StatusCode::InvalidParameter => "Invalid parameter",
        StatusCode::FileIsADirectory => "File is a directory",
        StatusCode::ByteRangeLockConflict => "Byte range lock conflict",
        StatusCode::ByteRangeLockRefused => "Byte range lock refused",
        StatusCode::DeletePending => "Delete pending",
        StatusCode::FileCorrupt => "File corrupt",
        StatusCode::OwnerGroupUnsupported => "Owner/group unsupported",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolVersion;

    #[test]
    fn status_is_clamped_to_descriptor_max() {
        let descriptor = Descriptor::for_version(ProtocolVersion::V3);
        let payload = encode_status(descriptor, 42, StatusCode::LockConflict, "x");
        let mut cursor: &[u8] = &payload;
        assert_eq!(codec::get_u8(&mut cursor).unwrap(), MessageType::Status as u8);
        assert_eq!(codec::get_u32(&mut cursor).unwrap(), 42);
        assert_eq!(codec::get_u32(&mut cursor).unwrap(), StatusCode::Failure as u32);
    }

    #[test]
    fn status_within_range_passes_through() {
        let descriptor = Descriptor::for_version(ProtocolVersion::V6);
        let payload = encode_status(descriptor, 7, StatusCode::LockConflict, "x");
        let mut cursor: &[u8] = &payload;
        codec::get_u8(&mut cursor).unwrap();
        codec::get_u32(&mut cursor).unwrap();
        assert_eq!(codec::get_u32(&mut cursor).unwrap(), StatusCode::LockConflict as u32);
    }

    #[test]
    fn unclamped_status_ignores_descriptor_ceiling() {
        // OP_UNSUPPORTED (8) is a dispatcher-generated status, not an
        // errno mapping, so it must reach the client even under v3
        // (max_status 4).
        let payload = encode_status_unclamped(9, StatusCode::OpUnsupported, "x");
        let mut cursor: &[u8] = &payload;
        codec::get_u8(&mut cursor).unwrap();
        codec::get_u32(&mut cursor).unwrap();
        assert_eq!(codec::get_u32(&mut cursor).unwrap(), StatusCode::OpUnsupported as u32);
    }
}
