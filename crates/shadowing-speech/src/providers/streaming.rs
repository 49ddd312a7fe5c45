//! Streaming backend: one binary-framed WebSocket connection per sentence.
//!
//! The connection is opened with query-string credentials, receives exactly
//! one request frame, and then streams audio frames until the server closes
//! it or sends an error frame. A hard deadline bounds the whole call.

use crate::audio::concat_chunks;
use crate::config::{Credentials, StreamingConfig};
use crate::error::{SynthesisError, SynthesisResult};
use crate::provider::SpeechSynthesizer;
use crate::types::{AudioEncoding, AudioPayload, BackendKind, SynthesisRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use reqwest::Url;
use shadowing_protocol::{
    AudioParams, InboundFrame, StreamingReqParams, StreamingRequest, UserInfo, decode_frame,
    encode_request,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// One open binary message channel
#[async_trait]
pub trait FrameConnection: Send {
    async fn send_binary(&mut self, frame: Bytes) -> SynthesisResult<()>;

    /// Next binary message, or `None` once the peer has closed.
    async fn next_binary(&mut self) -> Option<SynthesisResult<Bytes>>;

    async fn close(&mut self);
}

/// Opens [`FrameConnection`]s
#[async_trait]
pub trait FrameConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> SynthesisResult<Box<dyn FrameConnection>>;
}

/// Default connector over tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WebSocketConnection {
    stream: WsStream,
}

#[async_trait]
impl FrameConnector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> SynthesisResult<Box<dyn FrameConnection>> {
        let (stream, _) = connect_async(url.as_str()).await.map_err(|e| {
            SynthesisError::unreachable(
                BackendKind::Streaming,
                &format!("{}://{}{}", url.scheme(), url.host_str().unwrap_or_default(), url.path()),
                e,
            )
        })?;
        Ok(Box::new(WebSocketConnection { stream }))
    }
}

#[async_trait]
impl FrameConnection for WebSocketConnection {
    async fn send_binary(&mut self, frame: Bytes) -> SynthesisResult<()> {
        self.stream
            .send(WsMessage::Binary(frame))
            .await
            .map_err(|e| SynthesisError::transport(BackendKind::Streaming, e.to_string()))
    }

    async fn next_binary(&mut self) -> Option<SynthesisResult<Bytes>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Binary(data)) => return Some(Ok(data)),
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return None;
                }
                Err(e) => {
                    return Some(Err(SynthesisError::transport(
                        BackendKind::Streaming,
                        e.to_string(),
                    )));
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Lifecycle of the connection owned by one synthesis call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    AwaitingFinal,
    Closed,
    Errored,
}

/// Per-call accumulator; resolved exactly once by [`StreamingSynthesizer::synthesize`].
struct StreamingSession {
    state: ConnectionState,
    connection: Option<Box<dyn FrameConnection>>,
    chunks: Vec<Bytes>,
}

impl StreamingSession {
    fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
            connection: None,
            chunks: Vec::new(),
        }
    }

    fn received_bytes(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    fn into_payload(self, sample_rate: u32) -> SynthesisResult<AudioPayload> {
        let data = concat_chunks(&self.chunks);
        if data.is_empty() {
            return Err(SynthesisError::protocol(
                "streaming connection closed without any audio",
            ));
        }
        Ok(AudioPayload::new(data, AudioEncoding::Pcm16 { sample_rate }))
    }

    async fn shutdown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if tokio::time::timeout(CLOSE_GRACE, connection.close()).await.is_err() {
                debug!("Streaming connection did not close within {:?}", CLOSE_GRACE);
            }
        }
        if self.state != ConnectionState::Errored {
            self.state = ConnectionState::Closed;
        }
    }
}

/// Cloud synthesizer over the binary streaming protocol
pub struct StreamingSynthesizer {
    connector: Arc<dyn FrameConnector>,
    credentials: Credentials,
    config: StreamingConfig,
}

impl StreamingSynthesizer {
    pub fn new(credentials: Credentials, config: StreamingConfig) -> Self {
        Self::with_connector(Arc::new(WebSocketConnector), credentials, config)
    }

    pub fn with_connector(
        connector: Arc<dyn FrameConnector>,
        credentials: Credentials,
        config: StreamingConfig,
    ) -> Self {
        Self {
            connector,
            credentials,
            config,
        }
    }

    /// Connection URI carrying the credentials as query parameters.
    pub fn connection_url(&self, app_id: &str, token: &str) -> SynthesisResult<Url> {
        Url::parse_with_params(
            &self.config.endpoint,
            &[
                ("appId", app_id),
                ("accessToken", token),
                ("resourceId", self.config.resource_id.as_str()),
            ],
        )
        .map_err(|e| {
            SynthesisError::Configuration(format!(
                "invalid streaming endpoint {}: {e}",
                self.config.endpoint
            ))
        })
    }

    fn request_frame(&self, request: &SynthesisRequest) -> SynthesisResult<Bytes> {
        let body = StreamingRequest {
            user: UserInfo {
                uid: self.config.uid.clone(),
            },
            req_params: StreamingReqParams {
                text: request.text.clone(),
                speaker: request.voice.clone(),
                audio_params: AudioParams::pcm(self.config.sample_rate, request.speed),
                reqid: uuid::Uuid::new_v4().to_string(),
            },
        };
        encode_request(&body).map_err(|e| SynthesisError::protocol(e.to_string()))
    }

    async fn drive(
        &self,
        url: &Url,
        frame: Bytes,
        session: &mut StreamingSession,
    ) -> SynthesisResult<()> {
        session.state = ConnectionState::Connecting;
        let connection = session
            .connection
            .insert(self.connector.connect(url).await?);
        session.state = ConnectionState::Open;

        connection.send_binary(frame).await?;
        session.state = ConnectionState::AwaitingFinal;

        while let Some(message) = connection.next_binary().await {
            match decode_frame(&message?) {
                InboundFrame::Audio(chunk) if chunk.is_empty() => {}
                InboundFrame::Audio(chunk) => {
                    debug!("Received {} audio bytes", chunk.len());
                    session.chunks.push(chunk);
                }
                InboundFrame::Error { code, message } => {
                    return Err(SynthesisError::Application {
                        backend: BackendKind::Streaming,
                        code: i64::from(code),
                        message,
                    });
                }
                InboundFrame::Unrecognized => debug!("Ignoring unrecognized frame"),
            }
        }

        session.state = ConnectionState::Closed;
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for StreamingSynthesizer {
    fn kind(&self) -> BackendKind {
        BackendKind::Streaming
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> SynthesisResult<AudioPayload> {
        let (app_id, token) = self.credentials.require(BackendKind::Streaming)?;
        let url = self.connection_url(app_id, token)?;
        let frame = self.request_frame(request)?;
        let deadline = self.config.timeout();

        let mut session = StreamingSession::new();
        let outcome = tokio::time::timeout(deadline, self.drive(&url, frame, &mut session)).await;

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                session.state = ConnectionState::Errored;
                Err(e)
            }
            Err(_) if !session.chunks.is_empty() => {
                warn!(
                    "Streaming synthesis timed out after {:?}; using {} partial bytes",
                    deadline,
                    session.received_bytes()
                );
                Ok(())
            }
            Err(_) => {
                session.state = ConnectionState::Errored;
                Err(SynthesisError::Timeout {
                    backend: BackendKind::Streaming,
                    after: deadline,
                })
            }
        };

        session.shutdown().await;
        result?;

        let payload = session.into_payload(self.config.sample_rate)?;
        info!("Streaming synthesis produced {} bytes", payload.len());
        Ok(payload)
    }
}
