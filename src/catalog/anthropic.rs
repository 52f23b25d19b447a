//! Anthropic messages : request shape (with its `system`-as-top-level-field
//! quirk), response parsing, and SSE chunk decoding.

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
pub const BUILD_REQUEST : &str = "anthropic::build_request";
/// Name this provider's parse-response stage registers under.
pub const PARSE_RESPONSE : &str = "anthropic::parse_response";

/// Models this catalog entry recognizes.
pub const MODELS : &[ &str ] = &[ "claude-opus-4", "claude-sonnet-4", "claude-haiku-4" ];
/// Model used when a caller doesn't set `options.model`.
pub const DEFAULT_MODEL : &str = "claude-sonnet-4";

const DEFAULT_BASE_URL : &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION : &str = "2023-06-01";

fn role_str( role : Role ) -> Option< &'static str >
{
  match role
  {
    Role::User | Role::Tool => Some( "user" ),
    Role::Assistant => Some( "assistant" ),
    // Claude takes `system` as a top-level field, never a chat turn.
    Role::System => None,
  }
}

fn part_to_json( part : &ContentPart ) -> Value
{
  match part
  {
    ContentPart::Text { text } => json!( { "type" : "text", "text" : text } ),
    ContentPart::Image { source, media_type } => json!(
    {
      "type" : "image",
      "source" : { "type" : "base64", "media_type" : media_type.clone().unwrap_or_default(), "data" : source },
    } ),
    ContentPart::Audio { .. } => Value::Null,
    ContentPart::ToolCall { id, name, arguments } => json!(
    { "type" : "tool_use", "id" : id, "name" : name, "input" : arguments }
    ),
    ContentPart::ToolResult { tool_call_id, content, is_error } => json!(
    {
      "type" : "tool_result",
      "tool_use_id" : tool_call_id,
      "content" : content,
      "is_error" : is_error.unwrap_or( false ),
    } ),
  }
}

fn message_to_json( message : &Message ) -> Option< Value >
{
  let role = role_str( message.role )?;
  let content = match &message.content
  {
    Content::Text( text ) => json!( [ { "type" : "text", "text" : text } ] ),
    Content::Parts( parts ) => json!( parts.iter().map( part_to_json ).collect::< Vec< _ > >() ),
  };
  Some( json!( { "role" : role, "content" : content } ) )
}

fn system_text( request : &Request ) -> Option< String >
{
  let from_option = request.options.system.clone();
  let from_messages : Vec< String > = request.messages.iter()
    .filter( | m | m.role == Role::System )
    .map( | m | match &m.content { Content::Text( t ) => t.clone(), Content::Parts( _ ) => String::new() } )
    .collect();
  match ( from_option, from_messages.is_empty() )
  {
    ( Some( s ), true ) => Some( s ),
    ( Some( s ), false ) => Some( format!( "{s}\n{}", from_messages.join( "\n" ) ) ),
    ( None, false ) => Some( from_messages.join( "\n" ) ),
    ( None, true ) => None,
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

  let messages : Vec< Value > = request.messages.iter().filter_map( message_to_json ).collect();
  let max_tokens = request.options.max_tokens.unwrap_or( 4096 );

  let mut body = json!(
  {
    "model" : model,
    "messages" : messages,
    "max_tokens" : max_tokens,
    "stream" : request.options.stream,
  } );
  let map = body.as_object_mut().expect( "object literal" );
  if let Some( system ) = system_text( &request ) { map.insert( "system".into(), json!( system ) ); }
  if let Some( t ) = request.options.temperature { map.insert( "temperature".into(), json!( t ) ); }
  if let Some( p ) = request.options.top_p { map.insert( "top_p".into(), json!( p ) ); }
  if !request.options.stop.is_empty() { map.insert( "stop_sequences".into(), json!( request.options.stop ) ); }
  if !request.options.tools.is_empty()
  {
    let tools : Vec< Value > = request.options.tools.iter().map( | t | json!(
    { "name" : t.name, "description" : t.description, "input_schema" : t.parameters }
    ) ).collect();
    map.insert( "tools".into(), json!( tools ) );
  }

  let base_url = config.base_url.clone().unwrap_or_else( || DEFAULT_BASE_URL.to_string() );
  let timeout_ms = request.assigns.get::< u64 >( assign_key::TIMEOUT_MS );
  let spec = HttpRequestSpec::post_json( format!( "{base_url}/messages" ), body )
    .with_header( "x-api-key", config.api_key.clone() )
    .with_header( "anthropic-version", ANTHROPIC_VERSION )
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
  let content_blocks = body.get( "content" ).and_then( Value::as_array ).cloned().unwrap_or_default();
  let mut text = String::new();
  let mut tool_calls = Vec::new();
  for block in &content_blocks
  {
    match block.get( "type" ).and_then( Value::as_str )
    {
      Some( "text" ) => text.push_str( block.get( "text" ).and_then( Value::as_str ).unwrap_or_default() ),
      Some( "tool_use" ) =>
      {
        let id = block.get( "id" ).and_then( Value::as_str ).unwrap_or_default().to_string();
        let name = block.get( "name" ).and_then( Value::as_str ).unwrap_or_default().to_string();
        let arguments = block.get( "input" ).cloned().unwrap_or( Value::Null );
        tool_calls.push( ContentPart::ToolCall { id, name, arguments } );
      }
      _ => {}
    }
  }

  let finish_reason = body.get( "stop_reason" ).and_then( Value::as_str ).unwrap_or( "end_turn" ).to_string();
  let usage_obj = body.get( "usage" );
  let input_tokens = usage_obj.and_then( | u | u.get( "input_tokens" ) ).and_then( Value::as_u64 ).unwrap_or( 0 ) as u32;
  let output_tokens = usage_obj.and_then( | u | u.get( "output_tokens" ) ).and_then( Value::as_u64 ).unwrap_or( 0 ) as u32;
  let usage = Usage { input_tokens, output_tokens, total_tokens : input_tokens + output_tokens };

  let model = body.get( "model" ).and_then( Value::as_str ).unwrap_or_default().to_string();
  let id = body.get( "id" ).and_then( Value::as_str ).map( str::to_string );

  let llm_response = LlmResponse
  {
    content : Content::Text( text ),
    model,
    role : Role::Assistant,
    finish_reason,
    usage,
    tool_calls,
    refusal : None,
    cost : None,
    metadata : ResponseMetadata { provider : crate::catalog::Provider::Anthropic, id, created : None, raw : Some( body.clone() ) },
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
  table.insert( "claude-opus-4", ModelPricing { input_per_million : 15.00, output_per_million : 75.00 } );
  table.insert( "claude-sonnet-4", ModelPricing { input_per_million : 3.00, output_per_million : 15.00 } );
  table
}

/// Decodes Claude's `content_block_delta`/`message_delta`/`message_stop`
/// named SSE events.
#[ derive( Debug, Default ) ]
pub struct AnthropicChunkDecoder;

impl ChunkDecoder for AnthropicChunkDecoder
{
  fn decode( &self, event : &SseEvent ) -> DecodeOutcome
  {
    match event.event.as_deref()
    {
      Some( "message_stop" ) => DecodeOutcome::Done,
      Some( "content_block_delta" ) =>
      {
        let parsed : Value = match serde_json::from_str( &event.data )
        {
          Ok( v ) => v,
          Err( err ) => return DecodeOutcome::Error( crate::error::Error::ParseFailed( err.to_string() ) ),
        };
        let text = parsed.get( "delta" ).and_then( | d | d.get( "text" ) ).and_then( Value::as_str );
        let Some( text ) = text else { return DecodeOutcome::Ignore };
        DecodeOutcome::Chunk( StreamChunk
        {
          delta_content : Some( text.to_string() ),
          raw : parsed,
          ..StreamChunk::default()
        } )
      }
      Some( "message_delta" ) =>
      {
        let parsed : Value = match serde_json::from_str( &event.data )
        {
          Ok( v ) => v,
          Err( err ) => return DecodeOutcome::Error( crate::error::Error::ParseFailed( err.to_string() ) ),
        };
        let finish_reason = parsed.get( "delta" ).and_then( | d | d.get( "stop_reason" ) ).and_then( Value::as_str ).map( str::to_string );
        let usage = parsed.get( "usage" ).map( | u |
        {
          let output_tokens = u.get( "output_tokens" ).and_then( Value::as_u64 ).unwrap_or( 0 ) as u32;
          Usage { input_tokens : 0, output_tokens, total_tokens : output_tokens }
        } );
        DecodeOutcome::Chunk( StreamChunk { finish_reason, usage, raw : parsed, ..StreamChunk::default() } )
      }
      _ => DecodeOutcome::Ignore,
    }
  }
}
