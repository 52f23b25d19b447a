//! Error taxonomy for the pipeline runtime.
//!
//! One variant per error kind named in the reliability/error-handling design;
//! `From<reqwest::Error>` classifies transport failures the way a provider's
//! `ExecuteRequest` plug would, so plugs can bubble a transport error up with
//! `?` and still land on the right tagged variant.

use error_tools::dependency::thiserror;

/// Errors surfaced to the caller of `ChatBuilder::execute`/`stream`, and the
/// error kind recorded on a `Request` whenever a plug calls `put_error`.
#[ derive( Debug, Clone, thiserror::Error, PartialEq ) ]
pub enum Error
{
  /// The message list was empty or contained a malformed message.
  #[ error( "invalid messages : {0}" ) ]
  InvalidMessages( String ),

  /// The requested provider is not in the catalog.
  #[ error( "unknown provider : {0}" ) ]
  UnknownProvider( String ),

  /// The config provider had no entry for this provider.
  #[ error( "configuration missing : {0}" ) ]
  ConfigMissing( String ),

  /// The config provider resolved no API key.
  #[ error( "api key missing : {0}" ) ]
  ApiKeyMissing( String ),

  /// The named circuit is open; the call was rejected without attempting I/O.
  #[ error( "circuit open : {0}" ) ]
  CircuitOpen( String ),

  /// The provider responded 429.
  #[ error( "rate limited : {0}" ) ]
  RateLimited( String ),

  /// The provider rejected the API key.
  #[ error( "authentication error : {0}" ) ]
  AuthenticationError( String ),

  /// Any non-2xx response not matching a more specific variant.
  #[ error( "api error ({status}) : {body}" ) ]
  ApiError
  {
    /// HTTP status code.
    status : u16,
    /// Raw response body.
    body : String,
  },

  /// The overall deadline for the call elapsed.
  #[ error( "timeout : {0}" ) ]
  Timeout( String ),

  /// A transport-level failure (connection refused, DNS, reset, ...).
  #[ error( "network error : {0}" ) ]
  NetworkError( String ),

  /// The stream's transport failed mid-flight and recovery was disabled or
  /// exhausted.
  #[ error( "stream interrupted : {0}" ) ]
  StreamInterrupted( String ),

  /// A provider response or SSE frame could not be parsed.
  #[ error( "parse failed : {0}" ) ]
  ParseFailed( String ),

  /// A plug panicked or violated an internal invariant.
  #[ error( "plug exception in {plug} : {detail}" ) ]
  PlugException
  {
    /// Name of the plug that raised.
    plug : String,
    /// Panic payload or invariant description.
    detail : String,
  },

  /// The user-supplied streaming callback returned an error.
  #[ error( "callback aborted : {0}" ) ]
  CallbackAborted( String ),

  /// `ChatBuilder::execute` was called on a builder configured to stream.
  #[ error( "use the stream() method for a streaming builder" ) ]
  UseStreamMethodForStreaming,

  /// `ChatBuilder::stream` was called with an invalid callback.
  #[ error( "invalid streaming callback : {0}" ) ]
  InvalidCallback( String ),
}

impl Error
{
  /// Whether a caller may reasonably retry this error after some delay.
  ///
  /// Mirrors the retriable/non-retriable split: configuration and parsing
  /// errors are permanent for a given request, transport and throttling
  /// errors are transient.
  #[ must_use ]
  pub fn retriable( &self ) -> bool
  {
    matches!(
      self,
      Error::CircuitOpen( _ )
        | Error::RateLimited( _ )
        | Error::Timeout( _ )
        | Error::NetworkError( _ )
        | Error::StreamInterrupted( _ )
    )
  }

  /// The `ErrorKind` this error reports as, for classification without
  /// string matching.
  #[ must_use ]
  pub fn kind( &self ) -> ErrorKind
  {
    match self
    {
      Error::InvalidMessages( _ ) => ErrorKind::InvalidMessages,
      Error::UnknownProvider( _ ) => ErrorKind::UnknownProvider,
      Error::ConfigMissing( _ ) => ErrorKind::ConfigMissing,
      Error::ApiKeyMissing( _ ) => ErrorKind::ApiKeyMissing,
      Error::CircuitOpen( _ ) => ErrorKind::CircuitOpen,
      Error::RateLimited( _ ) => ErrorKind::RateLimited,
      Error::AuthenticationError( _ ) => ErrorKind::AuthenticationError,
      Error::ApiError { .. } => ErrorKind::ApiError,
      Error::Timeout( _ ) => ErrorKind::Timeout,
      Error::NetworkError( _ ) => ErrorKind::NetworkError,
      Error::StreamInterrupted( _ ) => ErrorKind::StreamInterrupted,
      Error::ParseFailed( _ ) => ErrorKind::ParseFailed,
      Error::PlugException { .. } => ErrorKind::PlugException,
      Error::CallbackAborted( _ ) => ErrorKind::CallbackAborted,
      Error::UseStreamMethodForStreaming | Error::InvalidCallback( _ ) =>
        ErrorKind::InvalidUsage,
    }
  }
}

impl From< reqwest::Error > for Error
{
  #[ inline ]
  fn from( err : reqwest::Error ) -> Self
  {
    if err.is_timeout()
    {
      Error::Timeout( format!( "request timeout : {err}" ) )
    }
    else if err.is_connect()
    {
      Error::NetworkError( format!( "connection error : {err}" ) )
    }
    else if err.status() == Some( reqwest::StatusCode::TOO_MANY_REQUESTS )
    {
      Error::RateLimited( format!( "rate limit exceeded : {err}" ) )
    }
    else if err.status() == Some( reqwest::StatusCode::UNAUTHORIZED )
      || err.status() == Some( reqwest::StatusCode::FORBIDDEN )
    {
      Error::AuthenticationError( format!( "rejected credentials : {err}" ) )
    }
    else
    {
      Error::NetworkError( err.to_string() )
    }
  }
}

/// Unit classification of `Error`, stored on `Request.errors` so a plug can
/// branch on error class without allocating a detail string.
#[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
pub enum ErrorKind
{
  /// See [`Error::InvalidMessages`].
  InvalidMessages,
  /// See [`Error::UnknownProvider`].
  UnknownProvider,
  /// See [`Error::ConfigMissing`].
  ConfigMissing,
  /// See [`Error::ApiKeyMissing`].
  ApiKeyMissing,
  /// See [`Error::CircuitOpen`].
  CircuitOpen,
  /// See [`Error::RateLimited`].
  RateLimited,
  /// See [`Error::AuthenticationError`].
  AuthenticationError,
  /// See [`Error::ApiError`].
  ApiError,
  /// See [`Error::Timeout`].
  Timeout,
  /// See [`Error::NetworkError`].
  NetworkError,
  /// See [`Error::StreamInterrupted`].
  StreamInterrupted,
  /// See [`Error::ParseFailed`].
  ParseFailed,
  /// See [`Error::PlugException`].
  PlugException,
  /// See [`Error::CallbackAborted`].
  CallbackAborted,
  /// Halted with no result.
  Halted,
  /// Builder misuse (wrong entrypoint, invalid callback, ...).
  InvalidUsage,
}
