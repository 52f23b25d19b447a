//! The HTTP transport seam : plugs never touch `reqwest` directly, they
//! build a [`HttpRequestSpec`] and hand it to whatever [`Transport`] the
//! builder was constructed with. Production code gets [`ReqwestTransport`];
//! tests get a scripted fake, so circuit-breaker/cache/streaming behavior
//! can be exercised without the network.

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use serde::{ Deserialize, Serialize };
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

use crate::error::Error;

/// A fully-built HTTP request, assembled by a provider's `build_request`
/// plug and published to `request.assigns["http_request"]`. Owned strings
/// throughout (rather than `&'static str`) so the spec round-trips through
/// `Request::assigns`, which serializes every published artifact.
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct HttpRequestSpec
{
  /// `GET`/`POST`/...
  pub method : String,
  /// Fully-qualified URL.
  pub url : String,
  /// Request headers, in insertion order.
  pub headers : Vec< ( String, String ) >,
  /// JSON body. `Value::Null` for a bodyless request.
  pub body : Value,
  /// Overall deadline for this call, in milliseconds. `None` leaves the
  /// transport's own default in effect.
  #[ serde( skip_serializing_if = "Option::is_none", default ) ]
  pub timeout_ms : Option< u64 >,
}

impl HttpRequestSpec
{
  /// A POST request with a JSON body.
  #[ must_use ]
  pub fn post_json( url : impl Into< String >, body : Value ) -> Self
  {
    Self { method : "POST".to_string(), url : url.into(), headers : Vec::new(), body, timeout_ms : None }
  }

  /// Append a header.
  #[ must_use ]
  pub fn with_header( mut self, key : impl Into< String >, value : impl Into< String > ) -> Self
  {
    self.headers.push( ( key.into(), value.into() ) );
    self
  }

  /// Set the per-call deadline forwarded to the transport.
  #[ must_use ]
  pub fn with_timeout_ms( mut self, timeout_ms : Option< u64 > ) -> Self
  {
    self.timeout_ms = timeout_ms;
    self
  }
}

/// A completed, buffered HTTP response.
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct HttpResponseSpec
{
  /// HTTP status code.
  pub status : u16,
  /// Response headers, in the order the server sent them.
  pub headers : Vec< ( String, String ) >,
  /// Body, parsed as JSON when the content type allows; `Value::Null`
  /// paired with a non-empty raw body when it doesn't parse.
  pub body : Value,
}

impl HttpResponseSpec
{
  /// Whether this response's status is in the success range.
  #[ must_use ]
  pub fn is_success( &self ) -> bool
  {
    ( 200..300 ).contains( &self.status )
  }
}

/// A boxed stream of raw response chunks, for the streaming entrypoint.
pub type ByteStream = Pin< Box< dyn Stream< Item = Result< Bytes, Error > > + Send > >;

/// Everything a provider's `execute_request`/`execute_request_stream` stage
/// needs from the network layer. Implemented once for production
/// (`ReqwestTransport`) and once per test fixture.
#[ async_trait ]
pub trait Transport : Send + Sync
{
  /// Send `req` and buffer the full response.
  async fn send( &self, req : &HttpRequestSpec ) -> Result< HttpResponseSpec, Error >;

  /// Send `req` and return its body as an incremental byte stream, for the
  /// streaming coordinator to scan for SSE frames.
  async fn send_stream( &self, req : &HttpRequestSpec ) -> Result< ByteStream, Error >;
}

/// Production [`Transport`] backed by a shared [`reqwest::Client`].
#[ derive( Debug, Clone ) ]
pub struct ReqwestTransport
{
  client : reqwest::Client,
}

impl ReqwestTransport
{
  /// Wrap an existing client (so callers can share connection pools,
  /// proxies, and TLS config across providers).
  #[ must_use ]
  pub fn new( client : reqwest::Client ) -> Self
  {
    Self { client }
  }
}

impl Default for ReqwestTransport
{
  fn default() -> Self
  {
    Self { client : reqwest::Client::new() }
  }
}

fn to_reqwest( req : &HttpRequestSpec, client : &reqwest::Client ) -> reqwest::RequestBuilder
{
  let mut builder = client.request( req.method.parse().unwrap_or( reqwest::Method::POST ), &req.url );
  for ( key, value ) in &req.headers
  {
    builder = builder.header( key, value );
  }
  if !req.body.is_null()
  {
    builder = builder.json( &req.body );
  }
  if let Some( timeout_ms ) = req.timeout_ms
  {
    builder = builder.timeout( Duration::from_millis( timeout_ms ) );
  }
  builder
}

#[ async_trait ]
impl Transport for ReqwestTransport
{
  async fn send( &self, req : &HttpRequestSpec ) -> Result< HttpResponseSpec, Error >
  {
    let response = to_reqwest( req, &self.client ).send().await?;
    let status = response.status().as_u16();
    let headers = response.headers().iter()
      .map( | ( k, v ) | ( k.to_string(), v.to_str().unwrap_or_default().to_string() ) )
      .collect();
    let bytes = response.bytes().await?;
    let body = serde_json::from_slice( &bytes ).unwrap_or( Value::Null );
    Ok( HttpResponseSpec { status, headers, body } )
  }

  async fn send_stream( &self, req : &HttpRequestSpec ) -> Result< ByteStream, Error >
  {
    let response = to_reqwest( req, &self.client ).send().await?;
    if !( 200..300 ).contains( &response.status().as_u16() )
    {
      let status = response.status().as_u16();
      let body = response.text().await.unwrap_or_default();
      return Err( Error::ApiError { status, body } );
    }
    use futures_util::TryStreamExt;
    let stream = response.bytes_stream().map_err( Error::from );
    Ok( Box::pin( stream ) )
  }
}
