//! The closed set of recognized call-time options.

use serde::{ Deserialize, Serialize };
use serde_json::Value;

/// `response_format` option.
#[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
#[ serde( tag = "type", rename_all = "snake_case" ) ]
pub enum ResponseFormat
{
  /// Plain text response (the default).
  Text,
  /// Ask the provider to constrain output to a JSON object.
  JsonObject,
  /// Ask the provider to constrain output to a JSON schema.
  JsonSchema
  {
    /// The schema to constrain against.
    schema : Value,
  },
}

/// A function tool schema, as described to the provider.
#[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
pub struct ToolSchema
{
  /// Tool name.
  pub name : String,
  /// Human-readable description shown to the model.
  pub description : String,
  /// JSON Schema for the tool's arguments.
  pub parameters : Value,
}

/// `tool_choice` option.
#[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
#[ serde( rename_all = "snake_case" ) ]
pub enum ToolChoice
{
  /// The model decides whether to call a tool.
  Auto,
  /// The model must not call a tool.
  None,
  /// The model must call this specific function.
  Function
  {
    /// Name of the tool the model must call.
    name : String,
  },
}

/// How the cache stage should treat this request.
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
pub enum CacheOption
{
  /// Use the policy-driven default TTL.
  Default,
  /// Never consult or populate the cache for this request.
  Disabled,
  /// Cache for exactly this many milliseconds.
  TtlMs( u64 ),
  /// Cache forever (until evicted for capacity reasons).
  Infinite,
}

impl Default for CacheOption
{
  fn default() -> Self
  {
    CacheOption::Default
  }
}

/// The closed set of call-time options recognized by the core, per the
/// external-interfaces option table. A provider MAY ignore any key it does
/// not support.
#[ derive( Debug, Clone, Default, PartialEq, Serialize, Deserialize ) ]
pub struct Options
{
  /// Overrides the provider's configured default model.
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub model : Option< String >,
  /// Sampling temperature, 0.0-2.0.
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub temperature : Option< f64 >,
  /// Nucleus sampling parameter, 0.0-1.0.
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub top_p : Option< f64 >,
  /// Maximum tokens to generate.
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub max_tokens : Option< u32 >,
  /// Provider alias for `max_tokens` some APIs use instead.
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub max_completion_tokens : Option< u32 >,
  /// Stop sequences.
  #[ serde( skip_serializing_if = "Vec::is_empty", default ) ]
  pub stop : Vec< String >,
  /// Deterministic sampling seed.
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub seed : Option< i64 >,
  /// Number of completions to generate.
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub n : Option< u32 >,
  /// Desired response shape.
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub response_format : Option< ResponseFormat >,
  /// Tools the model may call.
  #[ serde( skip_serializing_if = "Vec::is_empty", default ) ]
  pub tools : Vec< ToolSchema >,
  /// How the model should decide whether to call a tool.
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub tool_choice : Option< ToolChoice >,
  /// Set implicitly by `ChatBuilder::stream`; a caller should not set this
  /// directly.
  #[ serde( default ) ]
  pub stream : bool,
  /// Prepended as a leading system message when the provider supports one.
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub system : Option< String >,
  /// Provider-specific safety configuration, passed through verbatim.
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub safety_settings : Option< Value >,
  /// Overall deadline for the call, in milliseconds.
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub timeout_ms : Option< u64 >,
  /// Caching policy for this call.
  #[ serde( default ) ]
  pub cache : CacheOption,
  /// Whether a caller-level retry plug should act on this request. Off by
  /// default; the core never retries internally.
  #[ serde( default ) ]
  pub retry : bool,
  /// Escape hatch for provider-specific fields not in the recognized set.
  #[ serde( skip_serializing_if = "Option::is_none" ) ]
  pub extra : Option< Value >,
}

impl Options
{
  /// Validate the recognized-but-bounded fields (temperature, top_p).
  ///
  /// # Errors
  ///
  /// Returns a description of the first out-of-range field.
  pub fn validate( &self ) -> Result< (), String >
  {
    if let Some( t ) = self.temperature
    {
      if !( 0.0..=2.0 ).contains( &t )
      {
        return Err( format!( "temperature {t} out of range 0.0..=2.0" ) );
      }
    }
    if let Some( p ) = self.top_p
    {
      if !( 0.0..=1.0 ).contains( &p )
      {
        return Err( format!( "top_p {p} out of range 0.0..=1.0" ) );
      }
    }
    if let Some( mt ) = self.max_tokens
    {
      if mt == 0
      {
        return Err( "max_tokens must be positive".to_string() );
      }
    }
    Ok( () )
  }

  /// The subset of options that participate in the cache fingerprint :
  /// excludes anything non-semantic (timeouts, cache policy itself, and
  /// whatever a caller stashed in `extra` for telemetry purposes).
  #[ must_use ]
  pub fn semantic_subset( &self ) -> Value
  {
    serde_json::json!(
    {
      "model" : self.model,
      "temperature" : self.temperature,
      "top_p" : self.top_p,
      "max_tokens" : self.max_tokens,
      "max_completion_tokens" : self.max_completion_tokens,
      "stop" : self.stop,
      "seed" : self.seed,
      "n" : self.n,
      "response_format" : self.response_format,
      "tools" : self.tools,
      "tool_choice" : self.tool_choice,
      "system" : self.system,
    } )
  }
}
