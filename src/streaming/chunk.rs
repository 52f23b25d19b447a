//! The provider-agnostic shape a streamed SSE frame decodes into.

use serde_json::Value;

use crate::catalog::Usage;
use crate::error::Error;
use crate::request::ContentPart;
use crate::streaming::sse::SseEvent;

/// One decoded increment of a streamed response.
#[ derive( Debug, Clone, Default ) ]
pub struct StreamChunk
{
  /// Text appended by this chunk, if any.
  pub delta_content : Option< String >,
  /// A tool call (or tool-call argument fragment) emitted by this chunk.
  pub delta_tool_call : Option< ContentPart >,
  /// Set on the chunk that ends generation.
  pub finish_reason : Option< String >,
  /// Usage totals, when the provider reports them on the terminal chunk.
  pub usage : Option< Usage >,
  /// Whether this is (or synthesizes) the terminal chunk.
  pub done : bool,
  /// The untouched frame payload, for callers that need provider-specific
  /// fields this decoding doesn't surface.
  pub raw : Value,
}

/// What a [`ChunkDecoder`] made of one SSE frame.
#[ derive( Debug, Clone ) ]
pub enum DecodeOutcome
{
  /// A meaningful chunk to hand to the caller's callback.
  Chunk( StreamChunk ),
  /// A frame carrying no caller-visible content (a ping, a role-only delta).
  Ignore,
  /// The provider's own termination sentinel (e.g. `data: [DONE]`).
  Done,
  /// The frame could not be decoded as this provider's wire format.
  Error( Error ),
}

/// Per-provider translation from a raw SSE frame to a [`StreamChunk`].
pub trait ChunkDecoder : Send + Sync
{
  /// Decode one frame.
  fn decode( &self, event : &SseEvent ) -> DecodeOutcome;
}
