//! Speech backend implementations
//!
//! - `on_device`: platform speech engine, renders directly, no bytes
//! - `one_shot`: single HTTP request per sentence
//! - `streaming`: binary-framed WebSocket connection per sentence

pub mod on_device;
pub mod one_shot;
pub mod streaming;

pub use on_device::{CommandUtteranceEngine, OnDeviceSpeaker, UtteranceEngine};
pub use one_shot::OneShotSynthesizer;
pub use streaming::{
    ConnectionState, FrameConnection, FrameConnector, StreamingSynthesizer, WebSocketConnector,
};
