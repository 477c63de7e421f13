use crate::router;
use crate::state::AppState;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use onboard_core::ipc::{OnboardRequest, OnboardResponse};
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Document uploads travel inside frames.
pub const MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .little_endian()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec()
}

pub async fn run_unix_server(
    socket_path: &str,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("IPC Server listening on {}", socket_path);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _) = res?;
                let state = state.clone();
                tokio::spawn(async move {
                    let (read, write) = stream.into_split();
                    // 4-byte little-endian length prefix + MessagePack payload
                    let mut framed_read = FramedRead::new(read, frame_codec());
                    let mut framed_write = FramedWrite::new(write, frame_codec());

                    while let Some(frame) = framed_read.next().await {
                        match frame {
                            Ok(bytes_mut) => {
                                let request: OnboardRequest = match rmp_serde::from_slice(&bytes_mut) {
                                    Ok(req) => req,
                                    Err(e) => {
                                        let resp = OnboardResponse::err(format!("Deserialization error: {}", e));
                                        match rmp_serde::to_vec_named(&resp) {
                                            Ok(resp_bytes) => { let _ = framed_write.send(Bytes::from(resp_bytes)).await; }
                                            Err(se) => tracing::error!("Failed to serialize error response: {}", se),
                                        }
                                        continue;
                                    }
                                };

                                let response = router::handle_request(request, &state).await;
                                match rmp_serde::to_vec_named(&response) {
                                    Ok(resp_bytes) => {
                                        if let Err(e) = framed_write.send(Bytes::from(resp_bytes)).await {
                                            tracing::error!("Failed to send response: {}", e);
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        tracing::error!("Failed to serialize response: {}", e);
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::error!("Frame error: {}", e);
                                break;
                            }
                        }
                    }
                });
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down IPC server...");
                break;
            }
        }
    }

    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::time::Duration;
    use tokio::net::UnixStream;

    async fn roundtrip(socket: &Path, request: &OnboardRequest) -> OnboardResponse {
        let stream = UnixStream::connect(socket).await.unwrap();
        let (read, write) = stream.into_split();
        let mut reader = FramedRead::new(read, frame_codec());
        let mut writer = FramedWrite::new(write, frame_codec());

        let bytes = rmp_serde::to_vec_named(request).unwrap();
        writer.send(Bytes::from(bytes)).await.unwrap();
        let frame = reader.next().await.unwrap().unwrap();
        rmp_serde::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_unix_server_answers_framed_requests() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("onboard.sock");
        let socket_str = socket.to_str().unwrap().to_string();
        let (tx, _) = broadcast::channel(1);

        let server = tokio::spawn({
            let rx = tx.subscribe();
            let state = testing::memory_state();
            async move { run_unix_server(&socket_str, state, rx).await }
        });

        for _ in 0..50 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let pong = roundtrip(&socket, &OnboardRequest::Ping).await;
        assert!(pong.is_ok());

        let user_id = uuid::Uuid::new_v4();
        let ingested = roundtrip(
            &socket,
            &OnboardRequest::Ingest {
                user_id,
                document_type: onboard_core::models::DocumentType::Passport,
                file_name: "passport.png".to_string(),
                content_type: "image/png".to_string(),
                content: Bytes::from_static(&[1, 2, 3]),
                process: false,
            },
        )
        .await;
        assert!(ingested.is_ok(), "{:?}", ingested.error);
        let data = ingested.data.unwrap();
        assert_eq!(data["document"]["state"], "uploaded");
        assert_eq!(data["queued"], false);

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(!socket.exists());
    }
}
