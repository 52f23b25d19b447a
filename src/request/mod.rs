//! The mutable-by-replacement record carrying all state for one call.
//!
//! A [`Request`] is the spine every plug in a pipeline threads through;
//! see [`crate::plug`] and [`crate::pipeline`].

mod message;
mod options;

pub use message::{ Content, ContentPart, Message, Role };
pub use options::{ CacheOption, Options, ResponseFormat, ToolChoice, ToolSchema };

use std::collections::HashMap;
use std::sync::atomic::{ AtomicU64, Ordering };
use serde::{ Deserialize, Serialize };
use serde_json::Value;

use crate::catalog::{ LlmResponse, Provider };
use crate::error::ErrorKind;

static NEXT_REQUEST_ID : AtomicU64 = AtomicU64::new( 1 );

/// Process-wide monotonically increasing identifier, used for log
/// correlation. Not unique across process restarts.
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord ) ]
pub struct RequestId( u64 );

impl RequestId
{
  fn next() -> Self
  {
    RequestId( NEXT_REQUEST_ID.fetch_add( 1, Ordering::Relaxed ) )
  }
}

impl std::fmt::Display for RequestId
{
  fn fmt( &self, f : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    write!( f, "req-{}", self.0 )
  }
}

/// Lifecycle state of a [`Request`]. Progresses only along legal edges :
/// `Pending -> Executing -> { Streaming | Completed | Error | Halted }`,
/// `Streaming -> { Completed | Error }`.
#[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
pub enum State
{
  /// Not yet handed to the runner.
  Pending,
  /// Currently being driven through a pipeline.
  Executing,
  /// Handed off to the streaming coordinator.
  Streaming,
  /// Finished successfully; `result` is populated.
  Completed,
  /// Finished with at least one error.
  Error,
  /// A plug halted the pipeline early.
  Halted,
}

impl State
{
  /// Whether this state is one a runner must stop advancing from.
  #[ must_use ]
  pub fn is_terminal( self ) -> bool
  {
    matches!( self, State::Completed | State::Error | State::Halted )
  }
}

/// One accumulated failure. `put_error` only ever appends; the first record
/// is what gets surfaced to the caller.
#[ derive( Debug, Clone ) ]
pub struct ErrorRecord
{
  /// Classification of the failure.
  pub kind : ErrorKind,
  /// Human-readable detail.
  pub detail : String,
  /// Name of the plug that raised this, when known.
  pub plug : Option< String >,
}

/// A namespaced `String -> Value` map used for inter-plug communication
/// (`assigns`) or runtime-private bookkeeping (`private`).
#[ derive( Debug, Clone, Default ) ]
pub struct Bag( HashMap< String, Value > );

impl Bag
{
  /// An empty bag.
  #[ must_use ]
  pub fn new() -> Self
  {
    Self::default()
  }

  /// Publish a value under `key`, overwriting anything already there.
  pub fn put( &mut self, key : impl Into< String >, value : impl Serialize )
  {
    let json = serde_json::to_value( value ).unwrap_or( Value::Null );
    self.0.insert( key.into(), json );
  }

  /// Fetch and deserialize the value at `key`, if present and well-formed.
  #[ must_use ]
  pub fn get< T : for< 'de > Deserialize< 'de > >( &self, key : &str ) -> Option< T >
  {
    self.0.get( key ).and_then( | v | serde_json::from_value( v.clone() ).ok() )
  }

  /// Fetch the raw JSON value at `key`.
  #[ must_use ]
  pub fn get_raw( &self, key : &str ) -> Option< &Value >
  {
    self.0.get( key )
  }

  /// Whether `key` has been published.
  #[ must_use ]
  pub fn contains( &self, key : &str ) -> bool
  {
    self.0.contains_key( key )
  }
}

/// The spine of every operation : carries provider, messages, options,
/// inter-plug state, accumulated errors, lifecycle state, and (once
/// complete) the result.
#[ derive( Debug, Clone ) ]
pub struct Request
{
  /// Process-wide correlation id.
  pub id : RequestId,
  /// Target provider.
  pub provider : Provider,
  /// Ordered conversation history.
  pub messages : Vec< Message >,
  /// Recognized call-time options.
  pub options : Options,
  /// Inter-plug published artifacts (resolved config, API key, the built
  /// HTTP request, the raw HTTP response, the parsed response, timings).
  pub assigns : Bag,
  /// Runtime-private bookkeeping (pipeline cursor, halt flag). Plugs should
  /// not read or write this directly; use [`Request::halt`].
  pub private : Bag,
  /// Accumulated failures, in the order they were recorded.
  pub errors : Vec< ErrorRecord >,
  /// Lifecycle state.
  pub state : State,
  /// The final typed response, once `state == Completed`.
  pub result : Option< LlmResponse >,
}

const HALTED_KEY : &str = "halted";

impl Request
{
  /// Construct a new request.
  ///
  /// # Errors
  ///
  /// Returns [`ErrorKind::InvalidMessages`] detail text if `messages` is
  /// empty or any message fails [`Message::is_well_formed`].
  pub fn create( provider : Provider, messages : Vec< Message >, options : Options ) -> Result< Self, String >
  {
    if messages.is_empty()
    {
      return Err( "messages must not be empty".to_string() );
    }
    for ( index, message ) in messages.iter().enumerate()
    {
      if !message.is_well_formed()
      {
        return Err( format!( "message at index {index} has empty content for role {:?}", message.role ) );
      }
    }
    options.validate()?;

    Ok( Self
    {
      id : RequestId::next(),
      provider,
      messages,
      options,
      assigns : Bag::new(),
      private : Bag::new(),
      errors : Vec::new(),
      state : State::Pending,
      result : None,
    } )
  }

  /// Publish an artifact for downstream plugs to read.
  pub fn assign( &mut self, key : impl Into< String >, value : impl Serialize )
  {
    self.assigns.put( key, value );
  }

  /// Publish a runtime-private value (pipeline internals only).
  pub fn put_private( &mut self, key : impl Into< String >, value : impl Serialize )
  {
    self.private.put( key, value );
  }

  /// Record a failure. Never overwrites a prior error; the first one
  /// recorded is what the entrypoints surface to the caller. Transitions
  /// `state` to [`State::Error`] unless already terminal.
  pub fn put_error( &mut self, kind : ErrorKind, detail : impl Into< String > )
  {
    self.errors.push( ErrorRecord { kind, detail : detail.into(), plug : None } );
    if !self.state.is_terminal()
    {
      self.state = State::Error;
    }
  }

  /// Record a failure attributed to a specific plug.
  pub fn put_error_from_plug( &mut self, kind : ErrorKind, detail : impl Into< String >, plug : impl Into< String > )
  {
    self.errors.push( ErrorRecord { kind, detail : detail.into(), plug : Some( plug.into() ) } );
    if !self.state.is_terminal()
    {
      self.state = State::Error;
    }
  }

  /// Idempotently halt the pipeline. If a result has already been assigned
  /// the request completes with it; otherwise it surfaces `Halted`.
  pub fn halt( &mut self )
  {
    if self.private.get::< bool >( HALTED_KEY ) == Some( true )
    {
      return;
    }
    self.put_private( HALTED_KEY, true );
    if self.state.is_terminal()
    {
      return;
    }
    if self.result.is_some()
    {
      self.state = State::Completed;
    }
    else
    {
      self.state = State::Halted;
    }
  }

  /// Whether a prior plug has called [`Request::halt`].
  #[ must_use ]
  pub fn is_halted( &self ) -> bool
  {
    self.private.get::< bool >( HALTED_KEY ) == Some( true )
  }

  /// Transition to `Streaming`. Only legal from `Pending`/`Executing`.
  pub fn mark_streaming( &mut self )
  {
    if !self.state.is_terminal()
    {
      self.state = State::Streaming;
    }
  }

  /// Transition to `Executing`. Only legal from `Pending`.
  pub fn mark_executing( &mut self )
  {
    if matches!( self.state, State::Pending )
    {
      self.state = State::Executing;
    }
  }

  /// Attach the final result and transition to `Completed`.
  pub fn complete( &mut self, result : LlmResponse )
  {
    self.result = Some( result );
    if !self.state.is_terminal()
    {
      self.state = State::Completed;
    }
  }

  /// Record a terminal failure in one step.
  pub fn fail( &mut self, kind : ErrorKind, detail : impl Into< String > )
  {
    self.put_error( kind, detail );
  }

  /// The first recorded error, i.e. the one reported to the caller.
  #[ must_use ]
  pub fn first_error( &self ) -> Option< &ErrorRecord >
  {
    self.errors.first()
  }
}
