//! The fluent entrypoint : gathers a provider, messages, and options into a
//! [`crate::request::Request`], lets a caller reshape the default pipeline,
//! then drives it to completion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::catalog::{ self, assign_key, catalog_entry, LlmResponse, Provider };
use crate::config::ConfigProvider;
use crate::context::{ byte_length_estimator, ContextStrategy, TokenEstimator };
use crate::error::Error;
use crate::modification::{ compile, PipelineModification };
use crate::pipeline::{ Pipeline, PlugRegistry, PlugSpec, Runner };
use crate::plug::{ FnPlug, Plug, PlugOpts };
use crate::reliability::{ CacheFacade, CircuitBreakerConfig, CircuitRegistry };
use crate::request::{ Message, Options, Request, State };
use crate::streaming::{ ChunkDecoder, Reconnect, RecoveryPolicy, StreamCallback, StreamCoordinator };
use crate::transport::{ HttpRequestSpec, Transport };

/// Collaborators a `ChatBuilder` closes its generic pipeline stages over.
/// Constructed once per application (or per test) and cloned cheaply
/// (every field is an `Arc`) into each `ChatBuilder`.
#[ derive( Clone ) ]
pub struct Runtime
{
  config : Arc< dyn ConfigProvider >,
  transport : Arc< dyn Transport >,
  circuits : Arc< CircuitRegistry >,
  cache : Option< Arc< CacheFacade > >,
}

impl Runtime
{
  /// Build a runtime around the given collaborators. `cache` is `None` to
  /// run with caching entirely unwired (every call bypasses the cache
  /// stages regardless of `Options::cache`).
  #[ must_use ]
  pub fn new(
    config : Arc< dyn ConfigProvider >,
    transport : Arc< dyn Transport >,
    circuits : Arc< CircuitRegistry >,
    cache : Option< Arc< CacheFacade > >,
  ) -> Self
  {
    Self { config, transport, circuits, cache }
  }
}

fn decoder_for( provider : Provider ) -> Arc< dyn ChunkDecoder >
{
  match provider
  {
    Provider::OpenAi => Arc::new( catalog::openai::OpenAiChunkDecoder ),
    Provider::Anthropic => Arc::new( catalog::anthropic::AnthropicChunkDecoder ),
    Provider::Gemini => Arc::new( catalog::gemini::GeminiChunkDecoder ),
  }
}

fn circuit_key( provider : Provider ) -> String
{
  format!( "provider:{}", provider.as_str() )
}

fn validate_provider_plug( catalog_entry : catalog::ProviderCatalogEntry ) -> FnPlug
{
  FnPlug::new( catalog::stage::VALIDATE_PROVIDER, move | mut request, _opts |
  {
    if let Some( model ) = &request.options.model
    {
      if !catalog_entry.models.iter().any( | known | *known == model.as_str() )
      {
        warn!( model, provider = %request.provider, "model is not in the provider's known catalog; forwarding anyway" );
      }
    }
    request
  } )
}

fn fetch_configuration_plug( config : Arc< dyn ConfigProvider > ) -> FnPlug
{
  FnPlug::new( catalog::stage::FETCH_CONFIGURATION, move | mut request, _opts |
  {
    match config.resolve( request.provider )
    {
      Ok( resolved ) =>
      {
        request.assign( assign_key::CONFIG, &resolved );
        let timeout_ms = request.options.timeout_ms.unwrap_or( config.global_defaults().default_timeout_ms );
        request.assign( assign_key::TIMEOUT_MS, timeout_ms );
      }
      Err( kind ) => request.put_error_from_plug( kind, format!( "no configuration for {}", request.provider ), catalog::stage::FETCH_CONFIGURATION ),
    }
    request
  } )
}

fn manage_context_plug( strategy : ContextStrategy, estimator : TokenEstimator ) -> FnPlug
{
  FnPlug::new( catalog::stage::MANAGE_CONTEXT, move | mut request, _opts |
  {
    request.messages = strategy.apply( &request.messages, estimator );
    request
  } )
}

fn cache_lookup_plug( cache : Option< Arc< CacheFacade > >, default_model : &'static str ) -> FnPlug
{
  FnPlug::new( catalog::stage::CACHE_LOOKUP, move | mut request, _opts |
  {
    if CacheFacade::is_disabled( request.options.cache )
    {
      return request;
    }
    let Some( cache ) = cache.clone() else { return request };
    let model = request.options.model.clone().unwrap_or_else( || default_model.to_string() );
    let fingerprint = CacheFacade::fingerprint( request.provider, &model, &request.messages, &request.options );
    request.assign( assign_key::FINGERPRINT, &fingerprint );

    let handle = tokio::runtime::Handle::current();
    let hit = handle.block_on( async
    {
      tokio::time::timeout( Duration::from_secs( 5 ), cache.get_or_wait( &fingerprint ) ).await.ok().flatten()
    } );
    match hit
    {
      Some( response ) =>
      {
        request.assign( assign_key::CACHE_HIT, true );
        request.complete( response );
        request.halt();
      }
      None =>
      {
        if !cache.claim_build( &fingerprint )
        {
          // Lost the single-flight race : someone else's claim landed between
          // our get_or_wait above and this claim_build. Wait on their build
          // instead of issuing a second duplicate call.
          let hit = handle.block_on( async
          {
            tokio::time::timeout( Duration::from_secs( 5 ), cache.get_or_wait( &fingerprint ) ).await.ok().flatten()
          } );
          if let Some( response ) = hit
          {
            request.assign( assign_key::CACHE_HIT, true );
            request.complete( response );
            request.halt();
          }
        }
      }
    }
    request
  } )
}

fn cache_store_plug( cache : Option< Arc< CacheFacade > > ) -> FnPlug
{
  FnPlug::new( catalog::stage::CACHE_STORE, move | mut request, _opts |
  {
    let Some( cache ) = cache.clone() else { return request };
    let Some( fingerprint ) = request.assigns.get::< String >( assign_key::FINGERPRINT ) else { return request };
    let already_hit = request.assigns.get::< bool >( assign_key::CACHE_HIT ).unwrap_or( false );
    if already_hit
    {
      return request;
    }
    if let Some( response ) = request.result.clone()
    {
      let cache_option = request.options.cache;
      let handle = tokio::runtime::Handle::current();
      handle.block_on( cache.store( &fingerprint, response, cache_option ) );
    }
    else
    {
      cache.abandon_build( &fingerprint );
    }
    request
  } )
}

fn circuit_breaker_gate_plug( circuits : Arc< CircuitRegistry > ) -> FnPlug
{
  FnPlug::new( catalog::stage::CIRCUIT_BREAKER_GATE, move | mut request, _opts |
  {
    let key = circuit_key( request.provider );
    let circuit = circuits.get_or_create( &key );
    if !circuit.should_allow_request()
    {
      request.assign( assign_key::CIRCUIT_KEY, &key );
      request.put_error_from_plug( crate::error::ErrorKind::CircuitOpen, format!( "circuit '{key}' is open" ), catalog::stage::CIRCUIT_BREAKER_GATE );
      return request;
    }
    request.assign( assign_key::CIRCUIT_KEY, &key );
    request
  } )
}

fn execute_request_plug( transport : Arc< dyn Transport >, circuits : Arc< CircuitRegistry > ) -> FnPlug
{
  FnPlug::new( catalog::stage::EXECUTE_REQUEST, move | mut request, _opts |
  {
    let Some( spec ) = request.assigns.get::< HttpRequestSpec >( assign_key::HTTP_REQUEST ) else
    {
      request.put_error_from_plug( crate::error::ErrorKind::ParseFailed, "no http_request built for this call", catalog::stage::EXECUTE_REQUEST );
      return request;
    };
    let circuit_name = request.assigns.get::< String >( assign_key::CIRCUIT_KEY );
    let call_timeout_ms = circuit_name.as_ref()
      .map( | name | circuits.get_or_create( name ).config().call_timeout_ms )
      .unwrap_or( CircuitBreakerConfig::default().call_timeout_ms );
    let transport = transport.clone();
    let handle = tokio::runtime::Handle::current();
    let outcome = handle.block_on( async move
    {
      match tokio::time::timeout( Duration::from_millis( call_timeout_ms ), transport.send( &spec ) ).await
      {
        Ok( result ) => result,
        Err( _elapsed ) => Err( Error::Timeout( format!( "call exceeded {call_timeout_ms}ms" ) ) ),
      }
    } );
    match outcome
    {
      Ok( response ) =>
      {
        if let Some( name ) = &circuit_name { circuits.get_or_create( name ).record_success(); }
        request.assign( assign_key::HTTP_RESPONSE, &response );
      }
      Err( err ) =>
      {
        if let Some( name ) = &circuit_name
        {
          let circuit = circuits.get_or_create( name );
          if matches!( err, Error::Timeout( _ ) ) { circuit.record_timeout(); } else { circuit.record_failure(); }
        }
        request.put_error_from_plug( err.kind(), err.to_string(), catalog::stage::EXECUTE_REQUEST );
      }
    }
    request
  } )
}

fn execute_request_stream_plug() -> FnPlug
{
  FnPlug::new( catalog::stage::EXECUTE_REQUEST_STREAM, | mut request, _opts |
  {
    request.mark_streaming();
    request
  } )
}

fn track_cost_plug( catalog_entry : catalog::ProviderCatalogEntry, track : bool ) -> FnPlug
{
  FnPlug::new( catalog::stage::TRACK_COST, move | mut request, _opts |
  {
    if !track
    {
      return request;
    }
    if let Some( mut response ) = request.result.clone()
    {
      let table = catalog_entry.cost_table();
      if let Some( pricing ) = table.get( response.model.as_str() )
      {
        let input_cost = f64::from( response.usage.input_tokens ) * pricing.input_per_million / 1_000_000.0;
        let output_cost = f64::from( response.usage.output_tokens ) * pricing.output_per_million / 1_000_000.0;
        response.cost = Some( input_cost + output_cost );
        request.result = Some( response );
      }
    }
    request
  } )
}

fn build_registry( entry : &catalog::ProviderCatalogEntry, runtime : &Runtime, context_strategy : ContextStrategy, estimator : TokenEstimator, track_cost : bool ) -> PlugRegistry
{
  let mut registry = PlugRegistry::new();
  catalog::register_provider_plugs( &mut registry );
  registry.register( Arc::new( validate_provider_plug( entry.clone() ) ) );
  registry.register( Arc::new( fetch_configuration_plug( runtime.config.clone() ) ) );
  registry.register( Arc::new( manage_context_plug( context_strategy, estimator ) ) );
  registry.register( Arc::new( cache_lookup_plug( runtime.cache.clone(), entry.default_model ) ) );
  registry.register( Arc::new( cache_store_plug( runtime.cache.clone() ) ) );
  registry.register( Arc::new( circuit_breaker_gate_plug( runtime.circuits.clone() ) ) );
  registry.register( Arc::new( execute_request_plug( runtime.transport.clone(), runtime.circuits.clone() ) ) );
  registry.register( Arc::new( execute_request_stream_plug() ) );
  registry.register( Arc::new( track_cost_plug( entry.clone(), track_cost ) ) );
  registry
}

/// Fluent construction of one call, generalizing the teacher's
/// `ClientBuilder` from a single fixed provider pipeline to a per-call
/// reshapeable one.
pub struct ChatBuilder
{
  request : Request,
  modifications : Vec< PipelineModification >,
  streaming : bool,
  callback : Option< StreamCallback >,
  runtime : Runtime,
  context_strategy : ContextStrategy,
  token_estimator : TokenEstimator,
  track_cost : bool,
  recovery : RecoveryPolicy,
  custom_plugs : HashMap< &'static str, Arc< dyn Plug > >,
}

impl std::fmt::Debug for ChatBuilder
{
  fn fmt( &self, f : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "ChatBuilder" )
      .field( "provider", &self.request.provider )
      .field( "streaming", &self.streaming )
      .field( "modifications", &self.modifications.len() )
      .finish()
  }
}

impl ChatBuilder
{
  /// Start building a call against `provider`.
  ///
  /// # Errors
  ///
  /// Returns [`Error::InvalidMessages`] if `messages` is empty or
  /// malformed (see [`crate::request::Message::is_well_formed`]).
  pub fn new( runtime : Runtime, provider : Provider, messages : Vec< Message > ) -> Result< Self, Error >
  {
    let request = Request::create( provider, messages, Options::default() ).map_err( Error::InvalidMessages )?;
    Ok( Self
    {
      request,
      modifications : Vec::new(),
      streaming : false,
      callback : None,
      runtime,
      context_strategy : ContextStrategy::default(),
      token_estimator : byte_length_estimator,
      track_cost : true,
      recovery : RecoveryPolicy::default(),
      custom_plugs : HashMap::new(),
    } )
  }

  /// Override the model.
  #[ must_use ]
  pub fn with_model( mut self, model : impl Into< String > ) -> Self
  {
    self.request.options.model = Some( model.into() );
    self
  }

  /// Set sampling temperature.
  #[ must_use ]
  pub fn with_temperature( mut self, temperature : f64 ) -> Self
  {
    self.request.options.temperature = Some( temperature );
    self
  }

  /// Set nucleus sampling.
  #[ must_use ]
  pub fn with_top_p( mut self, top_p : f64 ) -> Self
  {
    self.request.options.top_p = Some( top_p );
    self
  }

  /// Set the maximum tokens to generate.
  #[ must_use ]
  pub fn with_max_tokens( mut self, max_tokens : u32 ) -> Self
  {
    self.request.options.max_tokens = Some( max_tokens );
    self
  }

  /// Set stop sequences.
  #[ must_use ]
  pub fn with_stop( mut self, stop : Vec< String > ) -> Self
  {
    self.request.options.stop = stop;
    self
  }

  /// Prepend a leading system message/instruction.
  #[ must_use ]
  pub fn with_system( mut self, system : impl Into< String > ) -> Self
  {
    self.request.options.system = Some( system.into() );
    self
  }

  /// Offer tools the model may call.
  #[ must_use ]
  pub fn with_tools( mut self, tools : Vec< crate::request::ToolSchema > ) -> Self
  {
    self.request.options.tools = tools;
    self
  }

  /// Override the call-level cache policy.
  #[ must_use ]
  pub fn with_cache( mut self, option : crate::request::CacheOption ) -> Self
  {
    self.request.options.cache = option;
    self
  }

  /// Bypass the cache for this call, regardless of the builder's default.
  #[ must_use ]
  pub fn without_cache( mut self ) -> Self
  {
    self.request.options.cache = crate::request::CacheOption::Disabled;
    self
  }

  /// Skip cost estimation for this call.
  #[ must_use ]
  pub fn without_cost_tracking( mut self ) -> Self
  {
    self.track_cost = false;
    self
  }

  /// Replace the context-management strategy applied before the call.
  #[ must_use ]
  pub fn with_context_strategy( mut self, strategy : ContextStrategy ) -> Self
  {
    self.context_strategy = strategy;
    self
  }

  /// Replace the token estimator `with_context_strategy`'s strategy uses.
  #[ must_use ]
  pub fn with_token_estimator( mut self, estimator : TokenEstimator ) -> Self
  {
    self.token_estimator = estimator;
    self
  }

  /// Configure mid-stream reconnect behavior.
  #[ must_use ]
  pub fn with_recovery_policy( mut self, policy : RecoveryPolicy ) -> Self
  {
    self.recovery = policy;
    self
  }

  /// Register a custom plug and append it to the end of the pipeline.
  #[ must_use ]
  pub fn with_custom_plug( mut self, plug : Arc< dyn Plug >, opts : PlugOpts ) -> Self
  {
    let name = plug.name();
    self.custom_plugs.insert( name, plug );
    self.modifications.push( PipelineModification::Append { plug : name, opts } );
    self
  }

  /// Insert a registered plug (built-in or previously passed to
  /// `with_custom_plug`) immediately before `anchor`.
  #[ must_use ]
  pub fn insert_before( mut self, anchor : &'static str, plug : &'static str, opts : PlugOpts ) -> Self
  {
    self.modifications.push( PipelineModification::InsertBefore { anchor, plug, opts } );
    self
  }

  /// Insert a registered plug immediately after `anchor`.
  #[ must_use ]
  pub fn insert_after( mut self, anchor : &'static str, plug : &'static str, opts : PlugOpts ) -> Self
  {
    self.modifications.push( PipelineModification::InsertAfter { anchor, plug, opts } );
    self
  }

  /// Replace `target` in place with a different registered plug.
  #[ must_use ]
  pub fn replace_plug( mut self, target : &'static str, plug : &'static str, opts : PlugOpts ) -> Self
  {
    self.modifications.push( PipelineModification::Replace { target, plug, opts } );
    self
  }

  /// Drop `target` from the pipeline entirely.
  #[ must_use ]
  pub fn remove_plug( mut self, target : &'static str ) -> Self
  {
    self.modifications.push( PipelineModification::Remove { target } );
    self
  }

  /// Replace the whole pipeline wholesale, ignoring the provider's default
  /// and every other modification queued so far.
  #[ must_use ]
  pub fn with_pipeline( mut self, pipeline : Pipeline ) -> Self
  {
    self.modifications.push( PipelineModification::Custom { pipeline } );
    self
  }

  /// Configure this call to stream, invoking `callback` once per chunk.
  #[ must_use ]
  pub fn stream_with( mut self, callback : StreamCallback ) -> Self
  {
    self.streaming = true;
    self.request.options.stream = true;
    self.callback = Some( callback );
    self
  }

  fn entry( &self ) -> catalog::ProviderCatalogEntry
  {
    catalog_entry( self.request.provider )
  }

  fn registry( &self, entry : &catalog::ProviderCatalogEntry ) -> PlugRegistry
  {
    let mut registry = build_registry( entry, &self.runtime, self.context_strategy, self.token_estimator, self.track_cost );
    for ( name, plug ) in &self.custom_plugs
    {
      let _ = name;
      registry.register( plug.clone() );
    }
    registry
  }

  /// The pipeline this builder would run right now, without running it.
  #[ must_use ]
  pub fn inspect_pipeline( &self ) -> Pipeline
  {
    let entry = self.entry();
    let base = if self.streaming { &entry.default_stream_pipeline } else { &entry.default_chat_pipeline };
    compile( base, &self.modifications )
  }

  /// A diagnostic snapshot of this builder's configuration.
  #[ must_use ]
  pub fn debug_info( &self ) -> Value
  {
    serde_json::json!(
    {
      "provider" : self.request.provider.as_str(),
      "model" : self.request.options.model,
      "streaming" : self.streaming,
      "modifications" : self.modifications.len(),
      "pipeline" : self.inspect_pipeline().iter().map( | spec | spec.plug ).collect::< Vec< _ > >(),
      "track_cost" : self.track_cost,
    } )
  }

  /// Run the call and wait for the full (non-streamed) response.
  ///
  /// # Errors
  ///
  /// Returns [`Error::UseStreamMethodForStreaming`] if this builder was
  /// configured with [`Self::stream_with`]; otherwise returns whatever
  /// error the pipeline recorded, classified via
  /// [`crate::request::Request::first_error`].
  pub async fn execute( self ) -> Result< LlmResponse, Error >
  {
    if self.streaming
    {
      return Err( Error::UseStreamMethodForStreaming );
    }
    let entry = self.entry();
    let registry = self.registry( &entry );
    let pipeline = compile( &entry.default_chat_pipeline, &self.modifications );
    let request = self.request;

    let finished = tokio::task::spawn_blocking( move || Runner::run( &pipeline, &registry, request ) ).await
      .map_err( | join_err | Error::PlugException { plug : "runner".to_string(), detail : join_err.to_string() } )?;

    Self::finish( finished )
  }

  /// Run the call in streaming mode, invoking the callback passed to
  /// [`Self::stream_with`] once per chunk, and returning the assembled
  /// final response once the terminal chunk has been delivered.
  ///
  /// # Errors
  ///
  /// Returns [`Error::InvalidCallback`] if [`Self::stream_with`] was never
  /// called; otherwise propagates build/transport/decode/callback errors.
  pub async fn stream( self ) -> Result< LlmResponse, Error >
  {
    let Some( callback ) = self.callback.clone() else
    {
      return Err( Error::InvalidCallback( "stream() requires stream_with(callback) to have been called".to_string() ) );
    };
    let entry = self.entry();
    let registry = self.registry( &entry );
    let pipeline = compile( &entry.default_stream_pipeline, &self.modifications );
    let provider = self.request.provider;
    let request = self.request;

    let prepared = tokio::task::spawn_blocking( move || Runner::run( &pipeline, &registry, request ) ).await
      .map_err( | join_err | Error::PlugException { plug : "runner".to_string(), detail : join_err.to_string() } )?;

    if prepared.state == State::Error
    {
      return Err( Self::first_error_to_public( &prepared ) );
    }

    let Some( spec ) = prepared.assigns.get::< HttpRequestSpec >( assign_key::HTTP_REQUEST ) else
    {
      return Err( Error::ParseFailed( "no http_request built for this streaming call".to_string() ) );
    };
    let model = prepared.options.model.clone().unwrap_or_else( || entry.default_model.to_string() );
    let byte_stream = self.runtime.transport.send_stream( &spec ).await?;
    let decoder = decoder_for( provider );

    let transport = self.runtime.transport.clone();
    let reconnect : Option< Reconnect > = Some( Arc::new( move | _delivered : &str |
    {
      let transport = transport.clone();
      let spec = spec.clone();
      Box::pin( async move { transport.send_stream( &spec ).await } )
    } ) );

    StreamCoordinator::run( byte_stream, decoder, callback, reconnect, self.recovery, provider, model ).await
  }

  fn first_error_to_public( request : &Request ) -> Error
  {
    let Some( record ) = request.first_error() else { return Error::ParseFailed( "pipeline failed with no recorded error".to_string() ) };
    match record.kind
    {
      crate::error::ErrorKind::InvalidMessages => Error::InvalidMessages( record.detail.clone() ),
      crate::error::ErrorKind::UnknownProvider => Error::UnknownProvider( record.detail.clone() ),
      crate::error::ErrorKind::ConfigMissing => Error::ConfigMissing( record.detail.clone() ),
      crate::error::ErrorKind::ApiKeyMissing => Error::ApiKeyMissing( record.detail.clone() ),
      crate::error::ErrorKind::CircuitOpen => Error::CircuitOpen( record.detail.clone() ),
      crate::error::ErrorKind::RateLimited => Error::RateLimited( record.detail.clone() ),
      crate::error::ErrorKind::AuthenticationError => Error::AuthenticationError( record.detail.clone() ),
      crate::error::ErrorKind::ApiError => Error::ApiError { status : 0, body : record.detail.clone() },
      crate::error::ErrorKind::Timeout => Error::Timeout( record.detail.clone() ),
      crate::error::ErrorKind::NetworkError => Error::NetworkError( record.detail.clone() ),
      crate::error::ErrorKind::StreamInterrupted => Error::StreamInterrupted( record.detail.clone() ),
      crate::error::ErrorKind::ParseFailed => Error::ParseFailed( record.detail.clone() ),
      crate::error::ErrorKind::PlugException => Error::PlugException
      {
        plug : record.plug.clone().unwrap_or_default(),
        detail : record.detail.clone(),
      },
      crate::error::ErrorKind::CallbackAborted => Error::CallbackAborted( record.detail.clone() ),
      crate::error::ErrorKind::Halted => Error::ParseFailed( format!( "halted : {}", record.detail ) ),
      crate::error::ErrorKind::InvalidUsage => Error::InvalidCallback( record.detail.clone() ),
    }
  }

  fn finish( request : Request ) -> Result< LlmResponse, Error >
  {
    match request.state
    {
      State::Completed => request.result.ok_or_else( || Error::ParseFailed( "completed with no result".to_string() ) ),
      _ => Err( Self::first_error_to_public( &request ) ),
    }
  }
}
