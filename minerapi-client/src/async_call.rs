use std::future::Future;
use std::time::Duration;

use bytes::BytesMut;
use minerapi_protocol::{ApiRequest, codec::ReplyCodec, codec::decode_json_reply};
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
};
use tokio_util::{
    codec::{Decoder, Encoder},
    sync::CancellationToken,
};

use crate::{ApiClient, ApiError, read_failure};

async fn with_timeout<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = Result<T, ApiError>>,
) -> Result<T, ApiError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ApiError::TimedOut)?,
        None => fut.await,
    }
}

impl ApiClient {
    /// Performs one exchange on the tokio runtime and decodes the JSON reply.
    ///
    /// The exchange is abandoned as soon as `cancel` fires; the socket is
    /// dropped, and with it closed, on every path.
    pub async fn call_async(
        &self,
        addr: impl ToSocketAddrs,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<Value, ApiError> {
        let raw = tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("API call '{}' cancelled", request);
                return Err(ApiError::Cancelled);
            }
            raw = self.exchange_async(addr, request) => raw?,
        };
        Ok(decode_json_reply(&raw)?)
    }

    async fn exchange_async(
        &self,
        addr: impl ToSocketAddrs,
        request: &ApiRequest,
    ) -> Result<Vec<u8>, ApiError> {
        let mut tcp = with_timeout(self.config.connect_timeout, async move {
            TcpStream::connect(addr).await.map_err(ApiError::Connection)
        })
        .await
        .inspect_err(|err| log::error!("Socket connect failed: {}", err))?;
        if let Ok(peer) = tcp.peer_addr() {
            log::info!("Sending '{}' to {}", request, peer);
        }

        let mut codec = ReplyCodec::new(self.config.encoding, self.config.drain);
        let mut buf = BytesMut::with_capacity(codec.read_hint());
        let drained = with_timeout(
            self.config.io_timeout,
            drive(&mut tcp, &mut codec, &mut buf, request),
        )
        .await;
        let result = match drained {
            // The daemon may answer in full and be slow to close
            Err(ApiError::TimedOut) if !buf.is_empty() => {
                log::warn!(
                    "Timed out waiting for the daemon, using the {} bytes received",
                    buf.len()
                );
                codec
                    .decode_eof(&mut buf)
                    .map(Option::unwrap_or_default)
                    .map_err(ApiError::Transport)
            }
            other => other,
        };

        if let Err(err) = tcp.shutdown().await {
            log::debug!("Shutting down API connection failed: {}", err);
        }
        result
    }
}

/// Sends `request` and reads the reply into `buf` until `codec` yields a frame.
async fn drive(
    tcp: &mut TcpStream,
    codec: &mut ReplyCodec,
    buf: &mut BytesMut,
    request: &ApiRequest,
) -> Result<Vec<u8>, ApiError> {
    let mut out = BytesMut::new();
    codec
        .encode(request, &mut out)
        .map_err(ApiError::Transport)?;
    tcp.write_all(&out).await.map_err(|err| {
        log::error!("Send failed: {}", err);
        ApiError::Transport(err)
    })?;

    loop {
        if let Some(frame) = codec.decode(buf).map_err(ApiError::Transport)? {
            return Ok(frame);
        }
        buf.reserve(codec.read_hint());
        let received = buf.len();
        let n = tcp.read_buf(buf).await.map_err(|err| {
            log::error!("Recv failed: {}", err);
            read_failure(received, err)
        })?;
        if n == 0 {
            let frame = codec
                .decode_eof(buf)
                .map_err(ApiError::Transport)?
                .unwrap_or_default();
            log::debug!("Received {} reply bytes", frame.len());
            return Ok(frame);
        }
    }
}
