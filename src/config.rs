//! Where API keys, base URLs, and per-provider defaults come from. The core
//! never reads the environment itself outside of [`EnvConfigProvider`] —
//! every other collaborator goes through the [`ConfigProvider`] seam.

use serde::{ Deserialize, Serialize };

use crate::catalog::Provider;
use crate::error::ErrorKind;

/// Resolved configuration for one provider, as fetched by the
/// `fetch_configuration` pipeline stage.
#[ derive( Debug, Clone, Serialize, Deserialize ) ]
pub struct ProviderConfig
{
  /// Credential sent on every request to this provider.
  pub api_key : String,
  /// Overrides the provider's compiled-in default endpoint.
  pub base_url : Option< String >,
  /// Overrides the catalog entry's `default_model`.
  pub default_model : Option< String >,
  /// Sent as an identifying header by providers that accept one
  /// (OpenAI's `OpenAI-Organization` equivalents, referral headers, ...).
  pub app_name : Option< String >,
  /// Companion URL some providers ask for alongside `app_name`.
  pub app_url : Option< String >,
}

/// Defaults that apply across every provider unless a `ChatBuilder` call
/// overrides them.
#[ derive( Debug, Clone ) ]
pub struct GlobalDefaults
{
  /// Request timeout applied when `Options::timeout_ms` is unset.
  pub default_timeout_ms : u64,
  /// Whether a caller-level retry plug is attached by default.
  pub default_retry : bool,
}

impl Default for GlobalDefaults
{
  fn default() -> Self
  {
    Self { default_timeout_ms : 30_000, default_retry : false }
  }
}

/// Resolves provider configuration. `fetch_configuration` calls this once
/// per request; providers that need OAuth exchange, secrets-manager
/// lookups, or file-based config implement their own.
pub trait ConfigProvider : Send + Sync
{
  /// Resolve `provider`'s configuration.
  ///
  /// # Errors
  ///
  /// Returns [`ErrorKind::ConfigMissing`] if the provider has no
  /// configuration at all, or [`ErrorKind::ApiKeyMissing`] if configuration
  /// exists but no credential was resolved.
  fn resolve( &self, provider : Provider ) -> Result< ProviderConfig, ErrorKind >;

  /// Defaults applied when a call doesn't override them.
  fn global_defaults( &self ) -> GlobalDefaults
  {
    GlobalDefaults::default()
  }
}

/// Default [`ConfigProvider`] : reads `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`,
/// and `GEMINI_API_KEY` from the process environment. File-based and
/// secrets-manager config are out of scope; a caller needing either
/// implements [`ConfigProvider`] directly.
#[ derive( Debug, Clone, Copy, Default ) ]
pub struct EnvConfigProvider;

impl EnvConfigProvider
{
  fn env_var_for( provider : Provider ) -> &'static str
  {
    match provider
    {
      Provider::OpenAi => "OPENAI_API_KEY",
      Provider::Anthropic => "ANTHROPIC_API_KEY",
      Provider::Gemini => "GEMINI_API_KEY",
    }
  }
}

impl ConfigProvider for EnvConfigProvider
{
  fn resolve( &self, provider : Provider ) -> Result< ProviderConfig, ErrorKind >
  {
    let var = Self::env_var_for( provider );
    let api_key = std::env::var( var ).map_err( | _ | ErrorKind::ApiKeyMissing )?;
    Ok( ProviderConfig
    {
      api_key,
      base_url : None,
      default_model : None,
      app_name : None,
      app_url : None,
    } )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn missing_env_var_is_api_key_missing()
  {
    std::env::remove_var( "OPENAI_API_KEY" );
    let provider = EnvConfigProvider;
    assert_eq!( provider.resolve( Provider::OpenAi ).unwrap_err(), ErrorKind::ApiKeyMissing );
  }

  #[ test ]
  fn present_env_var_resolves()
  {
    std::env::set_var( "ANTHROPIC_API_KEY", "sk-test-123" );
    let provider = EnvConfigProvider;
    let resolved = provider.resolve( Provider::Anthropic ).unwrap();
    assert_eq!( resolved.api_key, "sk-test-123" );
    std::env::remove_var( "ANTHROPIC_API_KEY" );
  }
}
