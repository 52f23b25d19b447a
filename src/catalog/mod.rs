//! The closed set of supported providers : default pipelines, capability
//! flags, cost tables, and the response shape every provider normalizes
//! into.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use std::collections::HashMap;
use serde::{ Deserialize, Serialize };
use serde_json::Value;

use crate::pipeline::{ Pipeline, PlugSpec };
use crate::pipeline::PlugRegistry;
use crate::request::{ Content, Role };

/// Stable names for the cross-provider stages every default pipeline shares.
/// Provider-specific stages (`build_request`, `parse_response`) are named per
/// module (see [`openai::BUILD_REQUEST`] and siblings).
pub mod stage
{
  /// Confirms the provider named on the request is in the catalog.
  pub const VALIDATE_PROVIDER : &str = "validate_provider";
  /// Resolves API key / base URL / default model via the configured
  /// [`crate::config::ConfigProvider`].
  pub const FETCH_CONFIGURATION : &str = "fetch_configuration";
  /// Applies the request's [`crate::context::ContextStrategy`].
  pub const MANAGE_CONTEXT : &str = "manage_context";
  /// Looks the fingerprint up in the cache; halts with a hit.
  pub const CACHE_LOOKUP : &str = "cache_lookup";
  /// Consults the named circuit before attempting I/O.
  pub const CIRCUIT_BREAKER_GATE : &str = "circuit_breaker_gate";
  /// Sends the built HTTP request and stores the raw response.
  pub const EXECUTE_REQUEST : &str = "execute_request";
  /// Begins a streamed HTTP request; the rest is driven by the coordinator.
  pub const EXECUTE_REQUEST_STREAM : &str = "execute_request_stream";
  /// Populates the cache with a freshly computed result.
  pub const CACHE_STORE : &str = "cache_store";
  /// Attaches a cost estimate from the provider's cost table.
  pub const TRACK_COST : &str = "track_cost";
}

/// The closed set of providers this catalog speaks.
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum Provider
{
  /// OpenAI chat completions.
  OpenAi,
  /// Anthropic messages.
  Anthropic,
  /// Google Gemini generateContent.
  Gemini,
}

impl Provider
{
  /// Lowercase identifier, used for config lookups and log fields.
  #[ must_use ]
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Provider::OpenAi => "openai",
      Provider::Anthropic => "anthropic",
      Provider::Gemini => "gemini",
    }
  }

  /// Parse a provider identifier, accepting the same spelling `as_str` emits.
  #[ must_use ]
  pub fn parse( value : &str ) -> Option< Self >
  {
    match value.to_ascii_lowercase().as_str()
    {
      "openai" => Some( Provider::OpenAi ),
      "anthropic" => Some( Provider::Anthropic ),
      "gemini" => Some( Provider::Gemini ),
      _ => None,
    }
  }
}

impl std::fmt::Display for Provider
{
  fn fmt( &self, f : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.write_str( self.as_str() )
  }
}

/// Feature flags a caller can branch on before building a request, so a
/// generic front-end doesn't have to hardcode per-provider knowledge.
#[ derive( Debug, Clone, Copy, Default, PartialEq, Eq ) ]
pub struct Capabilities
{
  /// Whether the provider supports incremental (SSE) responses.
  pub streaming : bool,
  /// Whether the provider accepts `tools`/`tool_choice`.
  pub function_calling : bool,
  /// Whether the provider accepts image content parts.
  pub vision : bool,
  /// Whether the provider honors `response_format: json_object`.
  pub json_mode : bool,
  /// Whether the provider exposes a reasoning/thinking budget.
  pub reasoning : bool,
  /// Whether the provider catalog additionally covers an embeddings endpoint.
  pub embeddings : bool,
}

/// Per-million-token pricing for one model.
#[ derive( Debug, Clone, Copy, PartialEq ) ]
pub struct ModelPricing
{
  /// USD per million input tokens.
  pub input_per_million : f64,
  /// USD per million output tokens.
  pub output_per_million : f64,
}

/// Maps a model name to its pricing. Consulted by the `track_cost` stage;
/// a model absent from the table leaves `LlmResponse::cost` as `None`
/// rather than guessing.
pub type CostTable = HashMap< &'static str, ModelPricing >;

/// Everything the builder needs to drive a call against one provider.
#[ derive( Debug, Clone ) ]
pub struct ProviderCatalogEntry
{
  /// Which provider this entry describes.
  pub provider : Provider,
  /// Pipeline run by `ChatBuilder::execute`.
  pub default_chat_pipeline : Pipeline,
  /// Pipeline run by `ChatBuilder::stream`.
  pub default_stream_pipeline : Pipeline,
  /// Models this catalog entry knows about, for validation and defaulting.
  pub models : Vec< &'static str >,
  /// Model used when the caller doesn't set `options.model`.
  pub default_model : &'static str,
  /// What this provider can do.
  pub capabilities : Capabilities,
}

impl ProviderCatalogEntry
{
  /// This provider's illustrative cost table (§9 : a small, deliberately
  /// incomplete set; unknown models simply cost `None`).
  #[ must_use ]
  pub fn cost_table( &self ) -> CostTable
  {
    match self.provider
    {
      Provider::OpenAi => openai::cost_table(),
      Provider::Anthropic => anthropic::cost_table(),
      Provider::Gemini => gemini::cost_table(),
    }
  }
}

fn shared_chat_pipeline( build_request : &'static str, parse_response : &'static str ) -> Pipeline
{
  vec!
  [
    PlugSpec::bare( stage::VALIDATE_PROVIDER ),
    PlugSpec::bare( stage::FETCH_CONFIGURATION ),
    PlugSpec::bare( stage::MANAGE_CONTEXT ),
    PlugSpec::bare( stage::CACHE_LOOKUP ),
    PlugSpec::bare( stage::CIRCUIT_BREAKER_GATE ),
    PlugSpec::bare( build_request ),
    PlugSpec::bare( stage::EXECUTE_REQUEST ),
    PlugSpec::bare( parse_response ),
    PlugSpec::bare( stage::CACHE_STORE ),
    PlugSpec::bare( stage::TRACK_COST ),
  ]
}

fn shared_stream_pipeline( build_request : &'static str ) -> Pipeline
{
  // Streaming responses are not idempotent builds, so the cache stages are
  // absent : §7.2's bypass rule for non-idempotent calls.
  vec!
  [
    PlugSpec::bare( stage::VALIDATE_PROVIDER ),
    PlugSpec::bare( stage::FETCH_CONFIGURATION ),
    PlugSpec::bare( stage::MANAGE_CONTEXT ),
    PlugSpec::bare( stage::CIRCUIT_BREAKER_GATE ),
    PlugSpec::bare( build_request ),
    PlugSpec::bare( stage::EXECUTE_REQUEST_STREAM ),
  ]
}

/// Stable keys used on `request.assigns` to pass artifacts between stages.
/// Centralized here so a provider module and a cross-cutting stage agree on
/// spelling without importing each other.
pub mod assign_key
{
  /// The resolved [`crate::config::ProviderConfig`] for this call.
  pub const CONFIG : &str = "config";
  /// The [`crate::transport::HttpRequestSpec`] built for this call.
  pub const HTTP_REQUEST : &str = "http_request";
  /// The [`crate::transport::HttpResponseSpec`] returned by the transport.
  pub const HTTP_RESPONSE : &str = "http_response";
  /// The cache fingerprint computed for this call.
  pub const FINGERPRINT : &str = "fingerprint";
  /// Whether `cache_lookup` served this call from the cache.
  pub const CACHE_HIT : &str = "cache_hit";
  /// The named circuit this call was gated through.
  pub const CIRCUIT_KEY : &str = "circuit_key";
  /// The effective per-call deadline (`options.timeout_ms`, falling back to
  /// [`crate::config::GlobalDefaults::default_timeout_ms`]), in milliseconds.
  pub const TIMEOUT_MS : &str = "timeout_ms";
}

/// Look up a provider's default catalog entry.
#[ must_use ]
pub fn catalog_entry( provider : Provider ) -> ProviderCatalogEntry
{
  match provider
  {
    Provider::OpenAi => ProviderCatalogEntry
    {
      provider,
      default_chat_pipeline : shared_chat_pipeline( openai::BUILD_REQUEST, openai::PARSE_RESPONSE ),
      default_stream_pipeline : shared_stream_pipeline( openai::BUILD_REQUEST ),
      models : openai::MODELS.to_vec(),
      default_model : openai::DEFAULT_MODEL,
      capabilities : Capabilities
      {
        streaming : true,
        function_calling : true,
        vision : true,
        json_mode : true,
        reasoning : false,
        embeddings : false,
      },
    },
    Provider::Anthropic => ProviderCatalogEntry
    {
      provider,
      default_chat_pipeline : shared_chat_pipeline( anthropic::BUILD_REQUEST, anthropic::PARSE_RESPONSE ),
      default_stream_pipeline : shared_stream_pipeline( anthropic::BUILD_REQUEST ),
      models : anthropic::MODELS.to_vec(),
      default_model : anthropic::DEFAULT_MODEL,
      capabilities : Capabilities
      {
        streaming : true,
        function_calling : true,
        vision : true,
        json_mode : false,
        reasoning : true,
        embeddings : false,
      },
    },
    Provider::Gemini => ProviderCatalogEntry
    {
      provider,
      default_chat_pipeline : shared_chat_pipeline( gemini::BUILD_REQUEST, gemini::PARSE_RESPONSE ),
      default_stream_pipeline : shared_stream_pipeline( gemini::BUILD_REQUEST ),
      models : gemini::MODELS.to_vec(),
      default_model : gemini::DEFAULT_MODEL,
      capabilities : Capabilities
      {
        streaming : true,
        function_calling : true,
        vision : true,
        json_mode : true,
        reasoning : false,
        embeddings : false,
      },
    },
  }
}

/// Register every provider's `build_request`/`parse_response` plugs into
/// `registry`. Cross-cutting stages (`validate_provider`, `fetch_configuration`,
/// `manage_context`, `cache_*`, `circuit_breaker_gate`, `execute_request*`,
/// `track_cost`) are registered separately by
/// [`crate::builder::ChatBuilder`], since they close over collaborators
/// (`ConfigProvider`, `CircuitRegistry`, `CacheFacade`) the catalog itself
/// has no business owning.
pub fn register_provider_plugs( registry : &mut PlugRegistry )
{
  openai::register( registry );
  anthropic::register( registry );
  gemini::register( registry );
}

/// Token usage reported by the provider.
#[ derive( Debug, Clone, Copy, Default, Serialize, Deserialize ) ]
pub struct Usage
{
  /// Tokens in the prompt.
  pub input_tokens : u32,
  /// Tokens generated.
  pub output_tokens : u32,
  /// `input_tokens + output_tokens`, as reported (not recomputed).
  pub total_tokens : u32,
}

/// Provenance fields attached to every normalized response.
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct ResponseMetadata
{
  /// Which provider produced this response.
  pub provider : Provider,
  /// Provider-assigned response id, when present.
  pub id : Option< String >,
  /// Provider-reported creation timestamp (unix seconds), when present.
  pub created : Option< i64 >,
  /// The untouched provider JSON body, kept for callers that need fields
  /// this normalization doesn't surface.
  pub raw : Option< Value >,
}

/// The provider-agnostic shape every `parse_response` plug normalizes into.
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct LlmResponse
{
  /// The generated content.
  pub content : Content,
  /// The model that actually served the call (may differ from the request's
  /// `options.model` alias).
  pub model : String,
  /// Always [`Role::Assistant`] today; kept as a field rather than a
  /// constant so a future provider with a distinct terminal role has
  /// somewhere to put it.
  pub role : Role,
  /// Why generation stopped (`"stop"`, `"length"`, `"tool_calls"`, ...).
  pub finish_reason : String,
  /// Token accounting.
  pub usage : Usage,
  /// Tool calls the model emitted, if any.
  pub tool_calls : Vec< crate::request::ContentPart >,
  /// Set when the provider refused to answer (distinct from an error : the
  /// call succeeded, the model declined).
  pub refusal : Option< String >,
  /// Estimated USD cost, when the model is in the provider's cost table.
  pub cost : Option< f64 >,
  /// Provenance.
  pub metadata : ResponseMetadata,
}
