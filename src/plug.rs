//! A uniform single-method stage that transforms a [`Request`].

use std::panic::{ catch_unwind, AssertUnwindSafe };
use std::sync::Arc;
use serde_json::Value;

use crate::error::ErrorKind;
use crate::request::Request;

/// Options passed to a plug's `call`, frozen at pipeline-compile time.
#[ derive( Debug, Clone, Default ) ]
pub struct PlugOpts( pub Value );

impl PlugOpts
{
  /// No options.
  #[ must_use ]
  pub fn none() -> Self
  {
    Self( Value::Null )
  }

  /// Deserialize the options into `T`, falling back to `T::default()` on
  /// absence or shape mismatch.
  #[ must_use ]
  pub fn parse< T : Default + serde::de::DeserializeOwned >( &self ) -> T
  {
    serde_json::from_value( self.0.clone() ).unwrap_or_default()
  }
}

/// A single named stage in a request pipeline.
///
/// `call` must return the same `Request` identity it was handed (no
/// swapping) and may only mutate it through `Request`'s own assignment
/// operations. A plug may panic; the runner catches this and records a
/// `PlugException` rather than unwinding past the pipeline boundary.
pub trait Plug : Send + Sync
{
  /// Run this stage.
  fn call( &self, request : Request, opts : &PlugOpts ) -> Request;

  /// Stable name used in pipeline specs, logs, and error records.
  fn name( &self ) -> &'static str;
}

/// Lets a bare `fn(Request, &PlugOpts) -> Request` act as a [`Plug`], the
/// way a provider module exposes its build/parse steps as free functions
/// rather than structs.
pub struct FnPlug
{
  name : &'static str,
  f : Arc< dyn Fn( Request, &PlugOpts ) -> Request + Send + Sync >,
}

impl FnPlug
{
  /// Wrap a function as a named plug.
  pub fn new( name : &'static str, f : impl Fn( Request, &PlugOpts ) -> Request + Send + Sync + 'static ) -> Self
  {
    Self { name, f : Arc::new( f ) }
  }
}

impl Plug for FnPlug
{
  fn call( &self, request : Request, opts : &PlugOpts ) -> Request
  {
    ( self.f )( request, opts )
  }

  fn name( &self ) -> &'static str
  {
    self.name
  }
}

impl std::fmt::Debug for FnPlug
{
  fn fmt( &self, f : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "FnPlug" ).field( "name", &self.name ).finish()
  }
}

/// Invoke `plug` against `request`, catching a panic and converting it to
/// a `PlugException` error on the request rather than propagating it.
///
/// A pre-call clone is kept so that, on panic, the returned `Request` is
/// the pre-call state plus the recorded error rather than lost entirely
/// (the value moved into the unwind-caught closure cannot otherwise be
/// recovered).
pub fn call_guarded( plug : &dyn Plug, request : Request, opts : &PlugOpts ) -> Request
{
  let name = plug.name();
  let fallback = request.clone();
  match catch_unwind( AssertUnwindSafe( || plug.call( request, opts ) ) )
  {
    Ok( req ) => req,
    Err( payload ) =>
    {
      let detail = payload.downcast_ref::< &str >().map( | s | s.to_string() )
        .or_else( || payload.downcast_ref::< String >().cloned() )
        .unwrap_or_else( || "plug panicked with a non-string payload".to_string() );
      let mut req = fallback;
      req.put_error_from_plug( exception_kind(), detail, name );
      req
    }
  }
}

/// The kind a plug exception gets recorded as.
#[ must_use ]
pub fn exception_kind() -> ErrorKind
{
  ErrorKind::PlugException
}
