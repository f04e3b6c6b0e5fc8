//! 流式输出：事件类型、发射器、SSE 编解码

pub mod emitter;
pub mod events;
pub mod sse;

pub use emitter::EventEmitter;
pub use events::{EventEnvelope, StreamEvent};
pub use sse::{decode_all, encode_envelope, encode_frame, SseDecoder, SseFrame, DONE_FRAME};
