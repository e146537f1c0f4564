//! Byte transports STOMP frames travel over: raw TCP or a WebSocket

use bytes::BytesMut;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use loadgen_core::{BrokerEndpoint, ConnectionError, TransportKind};

use super::frame::{self, Frame};

/// WebSocket subprotocols offered during the upgrade
pub const STOMP_SUBPROTOCOLS: &str = "v12.stomp, v11.stomp, v10.stomp";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const READ_CHUNK: usize = 8 * 1024;

/// Receiving half of a broker link
pub(crate) enum FrameReader {
    Tcp { half: OwnedReadHalf, buf: BytesMut },
    Ws { stream: SplitStream<WsStream>, buf: BytesMut },
}

/// Sending half of a broker link
pub(crate) enum FrameWriter {
    Tcp(OwnedWriteHalf),
    Ws(SplitSink<WsStream, WsMessage>),
}

/// Open the byte transport for `endpoint`
pub(crate) async fn open(
    endpoint: &BrokerEndpoint,
) -> Result<(FrameReader, FrameWriter), ConnectionError> {
    match endpoint.kind() {
        TransportKind::StompTcp => {
            let stream = TcpStream::connect((endpoint.host(), endpoint.port())).await?;
            stream.set_nodelay(true)?;
            let (read, write) = stream.into_split();
            Ok((
                FrameReader::Tcp {
                    half: read,
                    buf: BytesMut::with_capacity(READ_CHUNK),
                },
                FrameWriter::Tcp(write),
            ))
        }
        TransportKind::StompWebSocket => {
            let mut request = endpoint
                .websocket_url()
                .into_client_request()
                .map_err(|e| ConnectionError::Transport(e.to_string()))?;
            request.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_static(STOMP_SUBPROTOCOLS),
            );

            let (ws, response) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string()))?;
            tracing::trace!(
                status = %response.status(),
                protocol = ?response.headers().get("Sec-WebSocket-Protocol"),
                "WebSocket upgraded"
            );

            let (sink, stream) = ws.split();
            Ok((
                FrameReader::Ws {
                    stream,
                    buf: BytesMut::with_capacity(READ_CHUNK),
                },
                FrameWriter::Ws(sink),
            ))
        }
        other => Err(ConnectionError::Transport(format!(
            "{:?} endpoints are not served by the STOMP transport",
            other
        ))),
    }
}

impl FrameReader {
    /// Next complete frame; `None` once the peer closed the transport
    pub(crate) async fn next_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        match self {
            FrameReader::Tcp { half, buf } => loop {
                if let Some(frame) = decode(buf)? {
                    return Ok(Some(frame));
                }
                if half.read_buf(buf).await? == 0 {
                    return Ok(None);
                }
            },
            FrameReader::Ws { stream, buf } => loop {
                if let Some(frame) = decode(buf)? {
                    return Ok(Some(frame));
                }
                match stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => buf.extend_from_slice(text.as_bytes()),
                    Some(Ok(WsMessage::Binary(data))) => buf.extend_from_slice(&data),
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ConnectionError::Transport(e.to_string())),
                }
            },
        }
    }
}

fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, ConnectionError> {
    frame::decode(buf).map_err(|e| ConnectionError::Protocol(e.to_string()))
}

impl FrameWriter {
    /// Write one frame and flush it
    pub(crate) async fn write_frame(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let bytes = frame.to_bytes();
        match self {
            FrameWriter::Tcp(half) => {
                half.write_all(&bytes).await?;
                Ok(())
            }
            FrameWriter::Ws(sink) => {
                let message = match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => WsMessage::Text(text),
                    Err(e) => WsMessage::Binary(e.into_bytes()),
                };
                sink.send(message)
                    .await
                    .map_err(|e| ConnectionError::Transport(e.to_string()))
            }
        }
    }

    /// Close the transport. Best-effort.
    pub(crate) async fn shutdown(&mut self) {
        let result = match self {
            FrameWriter::Tcp(half) => half.shutdown().await.map_err(|e| e.to_string()),
            FrameWriter::Ws(sink) => sink.close().await.map_err(|e| e.to_string()),
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Transport shutdown failed");
        }
    }
}
