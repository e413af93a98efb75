//! End-to-end version negotiation over an in-memory duplex stream.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use bytes::{Buf, BufMut, BytesMut};
use sftp_core::handlers::fs::FsHandler;
use sftp_core::{Config, Session};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn test_config() -> (Config, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        root_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    (config, dir)
}

async fn send_frame(client: &mut tokio::io::DuplexStream, body: &[u8]) {
    client
        .write_all(&(body.len() as u32).to_be_bytes())
        .await
        .unwrap();
    client.write_all(body).await.unwrap();
}

async fn read_frame(client: &mut tokio::io::DuplexStream) -> BytesMut {
    let mut len_buf = [0u8; 4];
    client.read_exact(&mut len_buf).await.unwrap();
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    client.read_exact(&mut body).await.unwrap();
    BytesMut::from(&body[..])
}

fn init_frame(version: u32) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u8(1); // SSH_FXP_INIT
    body.extend_from_slice(&version.to_be_bytes());
    body.to_vec()
}

#[tokio::test]
async fn init_v3_omits_newline_and_supported_blocks() {
    let (config, _dir) = test_config();
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(server);
    let handler = FsHandler::new(&config);
    let session = Session::new(reader, writer, handler, config);
    tokio::spawn(session.run());

    send_frame(&mut client, &init_frame(3)).await;
    let mut reply = read_frame(&mut client).await;

    assert_eq!(reply.get_u8(), 2); // SSH_FXP_VERSION
    assert_eq!(reply.get_u32(), 3);

    // "vendor-id" must be present; "newline"/"supported" must not.
    let remaining = reply.freeze();
    let text = String::from_utf8_lossy(&remaining);
    assert!(text.contains("vendor-id"));
    assert!(!text.contains("newline"));
    assert!(!text.contains("supported"));
}

#[tokio::test]
async fn init_v4_advertises_newline_but_not_supported() {
    let (config, _dir) = test_config();
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(server);
    let handler = FsHandler::new(&config);
    let session = Session::new(reader, writer, handler, config);
    tokio::spawn(session.run());

    send_frame(&mut client, &init_frame(4)).await;
    let mut reply = read_frame(&mut client).await;

    assert_eq!(reply.get_u8(), 2);
    assert_eq!(reply.get_u32(), 4);

    let remaining = reply.freeze();
    let text = String::from_utf8_lossy(&remaining);
    assert!(text.contains("newline"));
    assert!(!text.contains("supported"));
}

#[tokio::test]
async fn re_init_is_rejected_with_failure() {
    let (config, _dir) = test_config();
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(server);
    let handler = FsHandler::new(&config);
    let session = Session::new(reader, writer, handler, config);
    tokio::spawn(session.run());

    send_frame(&mut client, &init_frame(3)).await;
    let _ = read_frame(&mut client).await;

    send_frame(&mut client, &init_frame(3)).await;
    let mut reply = read_frame(&mut client).await;

    assert_eq!(reply.get_u8(), 101); // SSH_FXP_STATUS
    reply.get_u32(); // request id (sentinel 0)
    assert_eq!(reply.get_u32(), 4); // SSH_FX_FAILURE
}
