//! Streamed (SSE) responses : framing, decoding, and the coordinator loop
//! that turns a raw byte stream into callback invocations plus a final
//! normalized [`crate::catalog::LlmResponse`].

pub mod chunk;
pub mod coordinator;
pub mod recovery;
pub mod sse;

pub use chunk::{ ChunkDecoder, DecodeOutcome, StreamChunk };
pub use coordinator::{ Reconnect, StreamCallback, StreamCoordinator };
pub use recovery::{ RecoveryPolicy, RecoveryState };
pub use sse::{ SseEvent, SseFramer };
