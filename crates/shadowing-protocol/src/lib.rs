pub mod frame;
pub mod tts;

pub use frame::{
    FrameError, FrameHeader, InboundFrame, MessageType, decode_frame, encode_request,
};
pub use tts::{
    AudioParams, OneShotApp, OneShotAudio, OneShotRequest, OneShotRequestBody, OneShotResponse,
    ONE_SHOT_SUCCESS_CODE, StreamingReqParams, StreamingRequest, UserInfo,
};
