//! Google Gemini `generateContent` : request shape, response parsing, and
//! chunk decoding for the `streamGenerateContent` SSE endpoint.

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
pub const BUILD_REQUEST : &str = "gemini::build_request";
/// Name this provider's parse-response stage registers under.
pub const PARSE_RESPONSE : &str = "gemini::parse_response";

/// Models this catalog entry recognizes.
pub const MODELS : &[ &str ] = &[ "gemini-1.5-pro", "gemini-1.5-flash", "gemini-2.0-flash" ];
/// Model used when a caller doesn't set `options.model`.
pub const DEFAULT_MODEL : &str = "gemini-1.5-flash";

const DEFAULT_BASE_URL : &str = "https://generativelanguage.googleapis.com/v1beta";

fn gemini_role( role : Role ) -> Option< &'static str >
{
  match role
  {
    Role::User | Role::Tool => Some( "user" ),
    Role::Assistant => Some( "model" ),
    // Gemini takes system instructions as a dedicated top-level field.
    Role::System => None,
  }
}

fn part_to_json( part : &ContentPart ) -> Value
{
  match part
  {
    ContentPart::Text { text } => json!( { "text" : text } ),
    ContentPart::Image { source, media_type } => json!(
    { "inline_data" : { "mime_type" : media_type.clone().unwrap_or_else( || "image/jpeg".to_string() ), "data" : source } }
    ),
    ContentPart::Audio { source, media_type } => json!(
    { "inline_data" : { "mime_type" : media_type.clone().unwrap_or_else( || "audio/wav".to_string() ), "data" : source } }
    ),
    ContentPart::ToolCall { name, arguments, .. } => json!( { "function_call" : { "name" : name, "args" : arguments } } ),
    ContentPart::ToolResult { content, .. } => json!( { "function_response" : { "response" : content } } ),
  }
}

fn message_to_json( message : &Message ) -> Option< Value >
{
  let role = gemini_role( message.role )?;
  let parts = match &message.content
  {
    Content::Text( text ) => vec![ json!( { "text" : text } ) ],
    Content::Parts( parts ) => parts.iter().map( part_to_json ).collect(),
  };
  Some( json!( { "role" : role, "parts" : parts } ) )
}

fn system_instruction( request : &Request ) -> Option< Value >
{
  let from_option = request.options.system.clone();
  let from_messages : Vec< String > = request.messages.iter()
    .filter( | m | m.role == Role::System )
    .map( | m | match &m.content { Content::Text( t ) => t.clone(), Content::Parts( _ ) => String::new() } )
    .collect();
  let combined = match ( from_option, from_messages.is_empty() )
  {
    ( Some( s ), true ) => Some( s ),
    ( Some( s ), false ) => Some( format!( "{s}\n{}", from_messages.join( "\n" ) ) ),
    ( None, false ) => Some( from_messages.join( "\n" ) ),
    ( None, true ) => None,
  };
  combined.map( | text | json!( { "parts" : [ { "text" : text } ] } ) )
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

  let contents : Vec< Value > = request.messages.iter().filter_map( message_to_json ).collect();
  let mut body = json!( { "contents" : contents } );
  let map = body.as_object_mut().expect( "object literal" );
  if let Some( instruction ) = system_instruction( &request ) { map.insert( "systemInstruction".into(), instruction ); }

  let mut generation_config = serde_json::Map::new();
  if let Some( t ) = request.options.temperature { generation_config.insert( "temperature".into(), json!( t ) ); }
  if let Some( p ) = request.options.top_p { generation_config.insert( "topP".into(), json!( p ) ); }
  if let Some( mt ) = request.options.max_tokens { generation_config.insert( "maxOutputTokens".into(), json!( mt ) ); }
  if !request.options.stop.is_empty() { generation_config.insert( "stopSequences".into(), json!( request.options.stop ) ); }
  if !generation_config.is_empty() { map.insert( "generationConfig".into(), Value::Object( generation_config ) ); }

  let endpoint = if request.options.stream { "streamGenerateContent" } else { "generateContent" };
  let base_url = config.base_url.clone().unwrap_or_else( || DEFAULT_BASE_URL.to_string() );
  let url = format!( "{base_url}/models/{model}:{endpoint}?alt=sse&key={}", config.api_key );
  let timeout_ms = request.assigns.get::< u64 >( assign_key::TIMEOUT_MS );
  let spec = HttpRequestSpec::post_json( url, body )
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
  let Some( candidate ) = body.get( "candidates" ).and_then( | c | c.get( 0 ) ) else
  {
    request.put_error_from_plug( ErrorKind::ParseFailed, "response had no candidates[0]", PARSE_RESPONSE );
    return request;
  };

  let mut text = String::new();
  let mut tool_calls = Vec::new();
  if let Some( parts ) = candidate.get( "content" ).and_then( | c | c.get( "parts" ) ).and_then( Value::as_array )
  {
    for part in parts
    {
      if let Some( t ) = part.get( "text" ).and_then( Value::as_str )
      {
        text.push_str( t );
      }
      if let Some( call ) = part.get( "functionCall" )
      {
        let name = call.get( "name" ).and_then( Value::as_str ).unwrap_or_default().to_string();
        let arguments = call.get( "args" ).cloned().unwrap_or( Value::Null );
        tool_calls.push( ContentPart::ToolCall { id : name.clone(), name, arguments } );
      }
    }
  }

  let finish_reason = candidate.get( "finishReason" ).and_then( Value::as_str ).unwrap_or( "STOP" ).to_lowercase();
  let usage_obj = body.get( "usageMetadata" );
  let input_tokens = usage_obj.and_then( | u | u.get( "promptTokenCount" ) ).and_then( Value::as_u64 ).unwrap_or( 0 ) as u32;
  let output_tokens = usage_obj.and_then( | u | u.get( "candidatesTokenCount" ) ).and_then( Value::as_u64 ).unwrap_or( 0 ) as u32;
  let total_tokens = usage_obj.and_then( | u | u.get( "totalTokenCount" ) ).and_then( Value::as_u64 ).unwrap_or( input_tokens + output_tokens ) as u32;

  let model = request.options.model.clone().unwrap_or_else( || DEFAULT_MODEL.to_string() );

  let llm_response = LlmResponse
  {
    content : Content::Text( text ),
    model,
    role : Role::Assistant,
    finish_reason,
    usage : Usage { input_tokens, output_tokens, total_tokens },
    tool_calls,
    refusal : None,
    cost : None,
    metadata : ResponseMetadata { provider : crate::catalog::Provider::Gemini, id : None, created : None, raw : Some( body.clone() ) },
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
  table.insert( "gemini-1.5-pro", ModelPricing { input_per_million : 1.25, output_per_million : 5.00 } );
  table.insert( "gemini-1.5-flash", ModelPricing { input_per_million : 0.075, output_per_million : 0.30 } );
  table
}

/// Decodes Gemini's `streamGenerateContent` SSE frames (unnamed `data:`
/// events carrying a single candidate each; no `[DONE]` sentinel, so the
/// coordinator's end-of-stream synthesis handles termination).
#[ derive( Debug, Default ) ]
pub struct GeminiChunkDecoder;

impl ChunkDecoder for GeminiChunkDecoder
{
  fn decode( &self, event : &SseEvent ) -> DecodeOutcome
  {
    let parsed : Value = match serde_json::from_str( &event.data )
    {
      Ok( v ) => v,
      Err( err ) => return DecodeOutcome::Error( crate::error::Error::ParseFailed( err.to_string() ) ),
    };
    let Some( candidate ) = parsed.get( "candidates" ).and_then( | c | c.get( 0 ) ) else
    {
      return DecodeOutcome::Ignore;
    };
    let text : String = candidate.get( "content" ).and_then( | c | c.get( "parts" ) ).and_then( Value::as_array )
      .map( | parts | parts.iter().filter_map( | p | p.get( "text" ).and_then( Value::as_str ) ).collect() )
      .unwrap_or_default();
    let finish_reason = candidate.get( "finishReason" ).and_then( Value::as_str ).map( | s | s.to_lowercase() );
    let done = finish_reason.is_some();
    if text.is_empty() && finish_reason.is_none()
    {
      return DecodeOutcome::Ignore;
    }
    DecodeOutcome::Chunk( StreamChunk
    {
      delta_content : if text.is_empty() { None } else { Some( text ) },
      finish_reason,
      done,
      raw : parsed,
      ..StreamChunk::default()
    } )
  }
}
