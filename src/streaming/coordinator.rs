//! Drives one streamed call to completion : reads raw bytes, frames them as
//! SSE, decodes frames into [`StreamChunk`]s, delivers them to the caller's
//! callback with backpressure, and reconnects on a dropped transport per
//! the configured [`RecoveryPolicy`].

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;

use crate::catalog::{ LlmResponse, Provider, ResponseMetadata, Usage };
use crate::error::Error;
use crate::request::{ Content, Role };
use crate::streaming::chunk::{ ChunkDecoder, DecodeOutcome, StreamChunk };
use crate::streaming::recovery::{ RecoveryPolicy, RecoveryState };
use crate::streaming::sse::SseFramer;
use crate::transport::ByteStream;

/// Invoked once per delivered chunk, synchronously : the coordinator does
/// not read the next frame off the wire until this returns, which is the
/// whole of the backpressure contract (no internal buffering past one
/// frame).
pub type StreamCallback = Arc< dyn Fn( &StreamChunk ) -> Result< (), Error > + Send + Sync >;

type ReconnectFuture = Pin< Box< dyn std::future::Future< Output = Result< ByteStream, Error > > + Send > >;

/// Re-opens the transport stream after a mid-stream drop. Takes the content
/// delivered so far, so a provider-aware closure could in principle resume
/// from that point; none of the three catalog providers support server-side
/// resume today, so every reconnect is a full restart and the coordinator
/// itself suppresses the replayed prefix against this same string before
/// forwarding chunks to the caller. Returns a fresh [`ByteStream`].
pub type Reconnect = Arc< dyn Fn( &str ) -> ReconnectFuture + Send + Sync >;

/// Iterates frames out of a transport stream and assembles the final
/// normalized response.
#[ derive( Debug, Default ) ]
pub struct StreamCoordinator;

impl StreamCoordinator
{
  /// Run the coordinator loop to completion.
  ///
  /// # Errors
  ///
  /// Returns `StreamInterrupted` if the stream ends or errors before a
  /// terminal chunk and `reconnect` is absent or recovery attempts are
  /// exhausted; returns `CallbackAborted` if `callback` returns an error;
  /// returns whatever [`ChunkDecoder::decode`] reports as a decode failure.
  pub async fn run(
    mut stream : ByteStream,
    decoder : Arc< dyn ChunkDecoder >,
    callback : StreamCallback,
    reconnect : Option< Reconnect >,
    recovery : RecoveryPolicy,
    provider : Provider,
    model : String,
  ) -> Result< LlmResponse, Error >
  {
    let mut framer = SseFramer::new();
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    let mut finish_reason = "stop".to_string();
    let mut usage = Usage::default();
    let mut delivered_terminal = false;
    let mut recovery_state = RecoveryState::new( recovery );
    let mut skip_remaining = 0_usize;

    'outer : loop
    {
      match stream.next().await
      {
        Some( Ok( bytes ) ) =>
        {
          for event in framer.feed( &bytes )
          {
            match decoder.decode( &event )
            {
              DecodeOutcome::Chunk( mut chunk ) =>
              {
                if skip_remaining > 0
                {
                  if let Some( text ) = chunk.delta_content.take()
                  {
                    let text_chars = text.chars().count();
                    if text_chars <= skip_remaining
                    {
                      skip_remaining -= text_chars;
                    }
                    else
                    {
                      let remainder : String = text.chars().skip( skip_remaining ).collect();
                      skip_remaining = 0;
                      chunk.delta_content = Some( remainder );
                    }
                  }
                }
                if let Some( text ) = &chunk.delta_content
                {
                  content.push_str( text );
                }
                if let Some( tool_call ) = chunk.delta_tool_call.clone()
                {
                  tool_calls.push( tool_call );
                }
                if let Some( reason ) = &chunk.finish_reason
                {
                  finish_reason = reason.clone();
                }
                if let Some( reported ) = chunk.usage
                {
                  usage = reported;
                }
                let is_done = chunk.done;
                callback( &chunk ).map_err( | e | Error::CallbackAborted( e.to_string() ) )?;
                if is_done
                {
                  delivered_terminal = true;
                  break 'outer;
                }
              }
              DecodeOutcome::Ignore => {}
              DecodeOutcome::Done =>
              {
                let terminal = StreamChunk
                {
                  finish_reason : Some( finish_reason.clone() ),
                  usage : Some( usage ),
                  done : true,
                  raw : Value::Null,
                  ..StreamChunk::default()
                };
                callback( &terminal ).map_err( | e | Error::CallbackAborted( e.to_string() ) )?;
                delivered_terminal = true;
                break 'outer;
              }
              DecodeOutcome::Error( err ) => return Err( err ),
            }
          }
        }
        Some( Err( _transport_err ) ) | None =>
        {
          if let Some( reconnect_fn ) = reconnect.as_ref()
          {
            match recovery_state.next_delay()
            {
              Some( delay ) =>
              {
                tokio::time::sleep( delay ).await;
                stream = reconnect_fn( &content ).await?;
                framer = SseFramer::new();
                skip_remaining = content.chars().count();
                continue 'outer;
              }
              None => return Err( Error::StreamInterrupted( "recovery attempts exhausted".to_string() ) ),
            }
          }
          break 'outer;
        }
      }
    }

    if !delivered_terminal
    {
      let terminal = StreamChunk
      {
        finish_reason : Some( finish_reason.clone() ),
        usage : Some( usage ),
        done : true,
        raw : Value::Null,
        ..StreamChunk::default()
      };
      callback( &terminal ).map_err( | e | Error::CallbackAborted( e.to_string() ) )?;
    }

    Ok( LlmResponse
    {
      content : Content::Text( content ),
      model,
      role : Role::Assistant,
      finish_reason,
      usage,
      tool_calls,
      refusal : None,
      cost : None,
      metadata : ResponseMetadata { provider, id : None, created : None, raw : None },
    } )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use bytes::Bytes;
  use std::sync::Mutex;

  struct EchoDecoder;

  impl ChunkDecoder for EchoDecoder
  {
    fn decode( &self, event : &crate::streaming::sse::SseEvent ) -> DecodeOutcome
    {
      if event.data == "[DONE]"
      {
        return DecodeOutcome::Done;
      }
      DecodeOutcome::Chunk( StreamChunk { delta_content : Some( event.data.clone() ), ..StreamChunk::default() } )
    }
  }

  fn byte_stream( frames : Vec< &'static str > ) -> ByteStream
  {
    Box::pin( futures_util::stream::iter( frames.into_iter().map( | f | Ok( Bytes::from( f ) ) ) ) )
  }

  #[ tokio::test ]
  async fn assembles_content_and_stops_on_done_sentinel()
  {
    let stream = byte_stream( vec![ "data: hello\n\n", "data: [DONE]\n\n" ] );
    let received = Arc::new( Mutex::new( Vec::new() ) );
    let received_clone = received.clone();
    let callback : StreamCallback = Arc::new( move | chunk |
    {
      received_clone.lock().unwrap().push( chunk.done );
      Ok( () )
    } );

    let response = StreamCoordinator::run(
      stream,
      Arc::new( EchoDecoder ),
      callback,
      None,
      RecoveryPolicy::disabled(),
      Provider::OpenAi,
      "gpt-test".to_string(),
    ).await.unwrap();

    assert_eq!( response.content, Content::Text( "hello".to_string() ) );
    assert_eq!( received.lock().unwrap().last(), Some( &true ) );
  }

  #[ tokio::test ]
  async fn reconnect_after_a_drop_suppresses_the_replayed_prefix()
  {
    let attempt = Arc::new( Mutex::new( 0_usize ) );
    let attempt_clone = attempt.clone();
    let stream = byte_stream( vec![ "data: hel\n\n" ] );
    let reconnect : Reconnect = Arc::new( move | _delivered |
    {
      let attempt = attempt_clone.clone();
      Box::pin( async move
      {
        *attempt.lock().unwrap() += 1;
        // A dropped provider connection restarts from scratch : it replays
        // everything sent before the drop, then continues past it.
        Ok( byte_stream( vec![ "data: hello world\n\n", "data: [DONE]\n\n" ] ) )
      } )
    } );

    let received = Arc::new( Mutex::new( Vec::new() ) );
    let received_clone = received.clone();
    let callback : StreamCallback = Arc::new( move | chunk |
    {
      if let Some( text ) = &chunk.delta_content
      {
        received_clone.lock().unwrap().push( text.clone() );
      }
      Ok( () )
    } );

    let response = StreamCoordinator::run(
      stream,
      Arc::new( EchoDecoder ),
      callback,
      Some( reconnect ),
      RecoveryPolicy::default(),
      Provider::OpenAi,
      "gpt-test".to_string(),
    ).await.unwrap();

    assert_eq!( *attempt.lock().unwrap(), 1 );
    assert_eq!( response.content, Content::Text( "hello world".to_string() ) );
    assert_eq!( received.lock().unwrap().join( "" ), "lo world" );
  }

  #[ tokio::test ]
  async fn synthesizes_terminal_chunk_when_stream_ends_silently()
  {
    let stream = byte_stream( vec![ "data: partial\n\n" ] );
    let done_count = Arc::new( Mutex::new( 0_usize ) );
    let done_count_clone = done_count.clone();
    let callback : StreamCallback = Arc::new( move | chunk |
    {
      if chunk.done
      {
        *done_count_clone.lock().unwrap() += 1;
      }
      Ok( () )
    } );

    let response = StreamCoordinator::run(
      stream,
      Arc::new( EchoDecoder ),
      callback,
      None,
      RecoveryPolicy::disabled(),
      Provider::OpenAi,
      "gpt-test".to_string(),
    ).await.unwrap();

    assert_eq!( response.content, Content::Text( "partial".to_string() ) );
    assert_eq!( *done_count.lock().unwrap(), 1 );
  }

  #[ tokio::test ]
  async fn callback_error_becomes_callback_aborted()
  {
    let stream = byte_stream( vec![ "data: hello\n\n" ] );
    let callback : StreamCallback = Arc::new( | _chunk | Err( Error::ParseFailed( "boom".to_string() ) ) );

    let result = StreamCoordinator::run(
      stream,
      Arc::new( EchoDecoder ),
      callback,
      None,
      RecoveryPolicy::disabled(),
      Provider::OpenAi,
      "gpt-test".to_string(),
    ).await;

    assert!( matches!( result, Err( Error::CallbackAborted( _ ) ) ) );
  }
}
