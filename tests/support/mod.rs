//! Fixtures shared by the integration tests : a scripted [`Transport`] and a
//! couple of trivial [`ConfigProvider`] implementations, so a call can be
//! driven end to end without touching the network.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{ json, Value };

use llm_core::catalog::Provider;
use llm_core::config::{ ConfigProvider, ProviderConfig };
use llm_core::error::{ Error, ErrorKind };
use llm_core::transport::{ ByteStream, HttpRequestSpec, HttpResponseSpec, Transport };

/// Resolves every provider to the same fixed API key.
pub struct FixedConfigProvider
{
  pub api_key : String,
}

impl ConfigProvider for FixedConfigProvider
{
  fn resolve( &self, _provider : Provider ) -> Result< ProviderConfig, ErrorKind >
  {
    Ok( ProviderConfig
    {
      api_key : self.api_key.clone(),
      base_url : None,
      default_model : None,
      app_name : None,
      app_url : None,
    } )
  }
}

/// Resolves nothing, for exercising the `fetch_configuration` error path.
pub struct MissingConfigProvider;

impl ConfigProvider for MissingConfigProvider
{
  fn resolve( &self, _provider : Provider ) -> Result< ProviderConfig, ErrorKind >
  {
    Err( ErrorKind::ApiKeyMissing )
  }
}

/// A [`Transport`] that serves a fixed queue of canned responses in order,
/// erroring once the queue runs dry — a test fails loudly if it drives more
/// HTTP calls than it scripted.
pub struct ScriptedTransport
{
  responses : Mutex< Vec< HttpResponseSpec > >,
}

impl ScriptedTransport
{
  #[ must_use ]
  pub fn new( responses : Vec< HttpResponseSpec > ) -> Self
  {
    Self { responses : Mutex::new( responses ) }
  }

  #[ must_use ]
  pub fn remaining( &self ) -> usize
  {
    self.responses.lock().unwrap().len()
  }
}

#[ async_trait ]
impl Transport for ScriptedTransport
{
  async fn send( &self, _req : &HttpRequestSpec ) -> Result< HttpResponseSpec, Error >
  {
    let mut responses = self.responses.lock().unwrap();
    if responses.is_empty()
    {
      return Err( Error::NetworkError( "scripted transport has no responses left".to_string() ) );
    }
    Ok( responses.remove( 0 ) )
  }

  async fn send_stream( &self, _req : &HttpRequestSpec ) -> Result< ByteStream, Error >
  {
    Err( Error::NetworkError( "streaming is not scripted by this fixture".to_string() ) )
  }
}

/// An OpenAI-shaped success body, the way `chat.completions` would answer.
#[ must_use ]
pub fn openai_success_body( content : &str ) -> Value
{
  json!(
  {
    "id" : "chatcmpl-test",
    "object" : "chat.completion",
    "created" : 1_700_000_000,
    "model" : "gpt-4o-mini",
    "choices" :
    [
      { "message" : { "role" : "assistant", "content" : content }, "finish_reason" : "stop" },
    ],
    "usage" : { "prompt_tokens" : 10, "completion_tokens" : 5, "total_tokens" : 15 },
  } )
}

#[ must_use ]
pub fn ok_response( body : Value ) -> HttpResponseSpec
{
  HttpResponseSpec { status : 200, headers : Vec::new(), body }
}

#[ must_use ]
pub fn error_response( status : u16, message : &str ) -> HttpResponseSpec
{
  HttpResponseSpec { status, headers : Vec::new(), body : json!( { "error" : { "message" : message } } ) }
}
