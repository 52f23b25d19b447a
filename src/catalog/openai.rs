//! OpenAI chat completions : request shape, response parsing, and SSE
//! chunk decoding.

use std::sync::Arc;

use serde_json::{ json, Value };

use crate::catalog::{ assign_key, CostTable, ModelPricing, LlmResponse, ResponseMetadata, Usage };
use crate::config::ProviderConfig;
use crate::error::ErrorKind;
use crate::pipeline::PlugRegistry;
use crate::plug::{ FnPlug, PlugOpts };
use crate::request::{ Content, ContentPart, Message, Request, Role };
use crate::streaming::chunk::{ ChunkDecoder, DecodeOutcome, StreamChunk };
use crate::streaming::sse::SseEvent;
use crate::transport::HttpRequestSpec;

/// Name this provider's build-request stage registers under.
pub const BUILD_REQUEST : &str = "openai::build_request";
/// Name this provider's parse-response stage registers under.
pub const PARSE_RESPONSE : &str = "openai::parse_response";

/// Models this catalog entry recognizes.
pub const MODELS : &[ &str ] = &[ "gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "o1", "o1-mini" ];
/// Model used when a caller doesn't set `options.model`.
pub const DEFAULT_MODEL : &str = "gpt-4o-mini";

const DEFAULT_BASE_URL : &str = "https://api.openai.com/v1";

fn role_str( role : Role ) -> &'static str
{
  match role
  {
    Role::System => "system",
    Role::User => "user",
    Role::Assistant => "assistant",
    Role::Tool => "tool",
  }
}

fn message_to_json( message : &Message ) -> Value
{
  let content = match &message.content
  {
    Content::Text( text ) => json!( text ),
    Content::Parts( parts ) => json!( parts.iter().filter_map( part_to_json ).collect::< Vec< _ > >() ),
  };
  json!( { "role" : role_str( message.role ), "content" : content } )
}

fn part_to_json( part : &ContentPart ) -> Option< Value >
{
  match part
  {
    ContentPart::Text { text } => Some( json!( { "type" : "text", "text" : text } ) ),
    ContentPart::Image { source, .. } => Some( json!(
    {
      "type" : "image_url",
      "image_url" : { "url" : source },
    } ) ),
    // Audio/tool parts have no first-class chat-completions shape; dropped
    // from the wire payload rather than guessed at.
    ContentPart::Audio { .. } | ContentPart::ToolCall { .. } | ContentPart::ToolResult { .. } => None,
  }
}

fn build_request( mut request : Request, _opts : &PlugOpts ) -> Request
{
  let Some( config ) = request.assigns.get::< ProviderConfig >( assign_key::CONFIG ) else
  {
    request.put_error_from_plug( ErrorKind::ConfigMissing, "no resolved configuration on request", BUILD_REQUEST );
    return request;
  };

  let model = request.options.model.clone()
    .or_else( || config.default_model.clone() )
    .unwrap_or_else( || DEFAULT_MODEL.to_string() );

  let messages : Vec< Value > = request.messages.iter().map( message_to_json ).collect();
  let mut body = json!(
  {
    "model" : model,
    "messages" : messages,
    "stream" : request.options.stream,
  } );
  let map = body.as_object_mut().expect( "object literal" );
  if let Some( t ) = request.options.temperature { map.insert( "temperature".into(), json!( t ) ); }
  if let Some( p ) = request.options.top_p { map.insert( "top_p".into(), json!( p ) ); }
  if let Some( mt ) = request.options.max_tokens { map.insert( "max_completion_tokens".into(), json!( mt ) ); }
  if !request.options.stop.is_empty() { map.insert( "stop".into(), json!( request.options.stop ) ); }
  if let Some( seed ) = request.options.seed { map.insert( "seed".into(), json!( seed ) ); }
  if let Some( n ) = request.options.n { map.insert( "n".into(), json!( n ) ); }
  if !request.options.tools.is_empty()
  {
    let tools : Vec< Value > = request.options.tools.iter().map( | t | json!(
    {
      "type" : "function",
      "function" : { "name" : t.name, "description" : t.description, "parameters" : t.parameters },
    } ) ).collect();
    map.insert( "tools".into(), json!( tools ) );
  }
  if let Some( format ) = &request.options.response_format
  {
    map.insert( "response_format".into(), serde_json::to_value( format ).unwrap_or( Value::Null ) );
  }

  let base_url = config.base_url.clone().unwrap_or_else( || DEFAULT_BASE_URL.to_string() );
  let timeout_ms = request.assigns.get::< u64 >( assign_key::TIMEOUT_MS );
  let spec = HttpRequestSpec::post_json( format!( "{base_url}/chat/completions" ), body )
    .with_header( "Authorization", format!( "Bearer {}", config.api_key ) )
    .with_header( "Content-Type", "application/json" )
    .with_timeout_ms( timeout_ms );
  request.assign( assign_key::HTTP_REQUEST, &spec );
  request
}

fn parse_response( mut request : Request, _opts : &PlugOpts ) -> Request
{
  let Some( response ) = request.assigns.get::< crate::transport::HttpResponseSpec >( assign_key::HTTP_RESPONSE ) else
  {
    request.put_error_from_plug( ErrorKind::ParseFailed, "no http_response on request", PARSE_RESPONSE );
    return request;
  };

  if !response.is_success()
  {
    classify_error( &mut request, response.status, &response.body );
    return request;
  }

  let body = &response.body;
  let Some( choice ) = body.get( "choices" ).and_then( | c | c.get( 0 ) ) else
  {
    request.put_error_from_plug( ErrorKind::ParseFailed, "response had no choices[0]", PARSE_RESPONSE );
    return request;
  };
  let message = choice.get( "message" ).cloned().unwrap_or( Value::Null );
  let text = message.get( "content" ).and_then( Value::as_str ).unwrap_or_default().to_string();
  let finish_reason = choice.get( "finish_reason" ).and_then( Value::as_str ).unwrap_or( "stop" ).to_string();
  let refusal = message.get( "refusal" ).and_then( Value::as_str ).map( str::to_string );

  let tool_calls = message.get( "tool_calls" ).and_then( Value::as_array ).map( | calls |
  {
    calls.iter().filter_map( | call |
    {
      let id = call.get( "id" )?.as_str()?.to_string();
      let function = call.get( "function" )?;
      let name = function.get( "name" )?.as_str()?.to_string();
      let arguments_str = function.get( "arguments" ).and_then( Value::as_str ).unwrap_or( "{}" );
      let arguments = serde_json::from_str( arguments_str ).unwrap_or( Value::Null );
      Some( ContentPart::ToolCall { id, name, arguments } )
    } ).collect::< Vec< _ > >()
  } ).unwrap_or_default();

  let usage_obj = body.get( "usage" );
  let usage = Usage
  {
    input_tokens : usage_obj.and_then( | u | u.get( "prompt_tokens" ) ).and_then( Value::as_u64 ).unwrap_or( 0 ) as u32,
    output_tokens : usage_obj.and_then( | u | u.get( "completion_tokens" ) ).and_then( Value::as_u64 ).unwrap_or( 0 ) as u32,
    total_tokens : usage_obj.and_then( | u | u.get( "total_tokens" ) ).and_then( Value::as_u64 ).unwrap_or( 0 ) as u32,
  };

  let model = body.get( "model" ).and_then( Value::as_str ).unwrap_or_default().to_string();
  let id = body.get( "id" ).and_then( Value::as_str ).map( str::to_string );
  let created = body.get( "created" ).and_then( Value::as_i64 );

  let llm_response = LlmResponse
  {
    content : Content::Text( text ),
    model,
    role : Role::Assistant,
    finish_reason,
    usage,
    tool_calls,
    refusal,
    cost : None,
    metadata : ResponseMetadata { provider : crate::catalog::Provider::OpenAi, id, created, raw : Some( body.clone() ) },
  };
  request.complete( llm_response );
  request
}

fn classify_error( request : &mut Request, status : u16, body : &Value )
{
  let detail = body.get( "error" ).and_then( | e | e.get( "message" ) ).and_then( Value::as_str )
    .unwrap_or( "no error detail in response body" ).to_string();
  match status
  {
    401 | 403 => request.put_error_from_plug( ErrorKind::AuthenticationError, detail, PARSE_RESPONSE ),
    429 => request.put_error_from_plug( ErrorKind::RateLimited, detail, PARSE_RESPONSE ),
    _ => request.put_error_from_plug( ErrorKind::ApiError, format!( "({status}) {detail}" ), PARSE_RESPONSE ),
  }
}

/// Register this provider's plugs into `registry`.
pub fn register( registry : &mut PlugRegistry )
{
  registry.register( Arc::new( FnPlug::new( BUILD_REQUEST, build_request ) ) );
  registry.register( Arc::new( FnPlug::new( PARSE_RESPONSE, parse_response ) ) );
}

/// A small, deliberately incomplete illustrative cost table.
#[ must_use ]
pub fn cost_table() -> CostTable
{
  let mut table = CostTable::new();
  table.insert( "gpt-4o", ModelPricing { input_per_million : 2.50, output_per_million : 10.00 } );
  table.insert( "gpt-4o-mini", ModelPricing { input_per_million : 0.15, output_per_million : 0.60 } );
  table
}

/// Decodes OpenAI's `chat.completion.chunk` SSE frames.
#[ derive( Debug, Default ) ]
pub struct OpenAiChunkDecoder;

impl ChunkDecoder for OpenAiChunkDecoder
{
  fn decode( &self, event : &SseEvent ) -> DecodeOutcome
  {
    if event.data.trim() == "[DONE]"
    {
      return DecodeOutcome::Done;
    }
    let parsed : Value = match serde_json::from_str( &event.data )
    {
      Ok( v ) => v,
      Err( err ) => return DecodeOutcome::Error( crate::error::Error::ParseFailed( err.to_string() ) ),
    };
    let Some( choice ) = parsed.get( "choices" ).and_then( | c | c.get( 0 ) ) else
    {
      return DecodeOutcome::Ignore;
    };
    let delta = choice.get( "delta" ).cloned().unwrap_or( Value::Null );
    let delta_content = delta.get( "content" ).and_then( Value::as_str ).map( str::to_string );
    let finish_reason = choice.get( "finish_reason" ).and_then( Value::as_str ).map( str::to_string );
    if delta_content.is_none() && finish_reason.is_none()
    {
      return DecodeOutcome::Ignore;
    }
    DecodeOutcome::Chunk( StreamChunk
    {
      delta_content,
      delta_tool_call : None,
      finish_reason,
      usage : None,
      done : false,
      raw : parsed,
    } )
  }
}
