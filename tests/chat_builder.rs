//! End-to-end coverage of `ChatBuilder::execute`, driven entirely through the
//! `Transport` seam so no test touches the network.

mod support;

use std::sync::Arc;
use std::time::Duration;

use llm_core::builder::{ ChatBuilder, Runtime };
use llm_core::catalog::{ self, Provider };
use llm_core::error::Error;
use llm_core::reliability::{ CacheFacade, CircuitRegistry, InMemoryCacheBackend };
use llm_core::request::{ CacheOption, Content, Message };

use support::{ error_response, ok_response, openai_success_body, FixedConfigProvider, MissingConfigProvider, ScriptedTransport };

fn runtime_with( transport : ScriptedTransport ) -> Runtime
{
  Runtime::new(
    Arc::new( FixedConfigProvider { api_key : "sk-test".to_string() } ),
    Arc::new( transport ),
    Arc::new( CircuitRegistry::default() ),
    None,
  )
}

#[ tokio::test ]
async fn execute_happy_path_returns_normalized_content()
{
  let transport = ScriptedTransport::new( vec![ ok_response( openai_success_body( "hello there" ) ) ] );
  let runtime = runtime_with( transport );

  let response = ChatBuilder::new( runtime, Provider::OpenAi, vec![ Message::user( "hi" ) ] )
    .unwrap()
    .with_model( "gpt-4o-mini" )
    .execute()
    .await
    .unwrap();

  assert_eq!( response.content, Content::Text( "hello there".to_string() ) );
  assert_eq!( response.usage.total_tokens, 15 );
}

#[ tokio::test ]
async fn execute_attaches_a_cost_estimate_for_a_known_model()
{
  let transport = ScriptedTransport::new( vec![ ok_response( openai_success_body( "priced" ) ) ] );
  let runtime = runtime_with( transport );

  let response = ChatBuilder::new( runtime, Provider::OpenAi, vec![ Message::user( "hi" ) ] )
    .unwrap()
    .with_model( "gpt-4o-mini" )
    .execute()
    .await
    .unwrap();

  // 10 prompt tokens + 5 completion tokens against openai::cost_table()'s
  // gpt-4o-mini pricing (0.15 / 0.60 per million).
  let expected = 10.0 * 0.15 / 1_000_000.0 + 5.0 * 0.60 / 1_000_000.0;
  assert!( ( response.cost.unwrap() - expected ).abs() < 1e-12 );
}

#[ tokio::test ]
async fn without_cost_tracking_leaves_cost_unset()
{
  let transport = ScriptedTransport::new( vec![ ok_response( openai_success_body( "unpriced" ) ) ] );
  let runtime = runtime_with( transport );

  let response = ChatBuilder::new( runtime, Provider::OpenAi, vec![ Message::user( "hi" ) ] )
    .unwrap()
    .without_cost_tracking()
    .execute()
    .await
    .unwrap();

  assert_eq!( response.cost, None );
}

#[ tokio::test ]
async fn missing_configuration_surfaces_before_any_http_call()
{
  let transport = ScriptedTransport::new( Vec::new() );
  let runtime = Runtime::new(
    Arc::new( MissingConfigProvider ),
    Arc::new( transport ),
    Arc::new( CircuitRegistry::default() ),
    None,
  );

  let err = ChatBuilder::new( runtime, Provider::OpenAi, vec![ Message::user( "hi" ) ] )
    .unwrap()
    .execute()
    .await
    .unwrap_err();

  assert!( matches!( err, Error::ApiKeyMissing( _ ) ) );
}

#[ tokio::test ]
async fn rate_limit_response_is_classified_as_rate_limited()
{
  let transport = ScriptedTransport::new( vec![ error_response( 429, "slow down" ) ] );
  let runtime = runtime_with( transport );

  let err = ChatBuilder::new( runtime, Provider::OpenAi, vec![ Message::user( "hi" ) ] )
    .unwrap()
    .execute()
    .await
    .unwrap_err();

  assert!( matches!( err, Error::RateLimited( _ ) ) );
}

#[ tokio::test ]
async fn open_circuit_rejects_the_call_without_any_http_attempt()
{
  let transport = ScriptedTransport::new( Vec::new() );
  let circuits = Arc::new( CircuitRegistry::default() );
  let circuit = circuits.get_or_create( "provider:openai" );
  for _ in 0..5
  {
    circuit.record_failure();
  }

  let runtime = Runtime::new(
    Arc::new( FixedConfigProvider { api_key : "sk-test".to_string() } ),
    Arc::new( transport ),
    circuits,
    None,
  );

  let err = ChatBuilder::new( runtime, Provider::OpenAi, vec![ Message::user( "hi" ) ] )
    .unwrap()
    .execute()
    .await
    .unwrap_err();

  assert!( matches!( err, Error::CircuitOpen( _ ) ) );
}

#[ tokio::test ]
async fn execute_on_a_streaming_builder_is_rejected()
{
  let transport = ScriptedTransport::new( Vec::new() );
  let runtime = runtime_with( transport );
  let callback : llm_core::streaming::StreamCallback = Arc::new( | _chunk | Ok( () ) );

  let err = ChatBuilder::new( runtime, Provider::OpenAi, vec![ Message::user( "hi" ) ] )
    .unwrap()
    .stream_with( callback )
    .execute()
    .await
    .unwrap_err();

  assert!( matches!( err, Error::UseStreamMethodForStreaming ) );
}

#[ tokio::test ]
async fn stream_without_a_callback_is_rejected()
{
  let transport = ScriptedTransport::new( Vec::new() );
  let runtime = runtime_with( transport );

  let err = ChatBuilder::new( runtime, Provider::OpenAi, vec![ Message::user( "hi" ) ] )
    .unwrap()
    .stream()
    .await
    .unwrap_err();

  assert!( matches!( err, Error::InvalidCallback( _ ) ) );
}

#[ tokio::test ]
async fn cache_hit_avoids_a_second_http_call()
{
  let transport = ScriptedTransport::new( vec![ ok_response( openai_success_body( "cached answer" ) ) ] );
  let cache = Arc::new( CacheFacade::new( Arc::new( InMemoryCacheBackend::default() ), Duration::from_secs( 60 ) ) );
  let runtime = Runtime::new(
    Arc::new( FixedConfigProvider { api_key : "sk-test".to_string() } ),
    Arc::new( transport ),
    Arc::new( CircuitRegistry::default() ),
    Some( cache ),
  );

  let build = || Message::user( "repeatable question" );

  let first = ChatBuilder::new( runtime.clone(), Provider::OpenAi, vec![ build() ] )
    .unwrap()
    .with_model( "gpt-4o-mini" )
    .execute()
    .await
    .unwrap();

  let second = ChatBuilder::new( runtime, Provider::OpenAi, vec![ build() ] )
    .unwrap()
    .with_model( "gpt-4o-mini" )
    .execute()
    .await
    .unwrap();

  assert_eq!( first.content, second.content );
  assert_eq!( second.content, Content::Text( "cached answer".to_string() ) );
}

#[ tokio::test ]
async fn without_cache_bypasses_a_populated_cache()
{
  let transport = ScriptedTransport::new( vec!
  [
    ok_response( openai_success_body( "first answer" ) ),
    ok_response( openai_success_body( "second answer" ) ),
  ] );
  let cache = Arc::new( CacheFacade::new( Arc::new( InMemoryCacheBackend::default() ), Duration::from_secs( 60 ) ) );
  let runtime = Runtime::new(
    Arc::new( FixedConfigProvider { api_key : "sk-test".to_string() } ),
    Arc::new( transport ),
    Arc::new( CircuitRegistry::default() ),
    Some( cache ),
  );

  let message = || Message::user( "same question every time" );

  let first = ChatBuilder::new( runtime.clone(), Provider::OpenAi, vec![ message() ] )
    .unwrap()
    .with_model( "gpt-4o-mini" )
    .with_cache( CacheOption::Disabled )
    .execute()
    .await
    .unwrap();

  let second = ChatBuilder::new( runtime, Provider::OpenAi, vec![ message() ] )
    .unwrap()
    .with_model( "gpt-4o-mini" )
    .with_cache( CacheOption::Disabled )
    .execute()
    .await
    .unwrap();

  assert_eq!( first.content, Content::Text( "first answer".to_string() ) );
  assert_eq!( second.content, Content::Text( "second answer".to_string() ) );
}

#[ tokio::test ]
async fn removing_track_cost_leaves_a_known_model_unpriced()
{
  let transport = ScriptedTransport::new( vec![ ok_response( openai_success_body( "no price" ) ) ] );
  let runtime = runtime_with( transport );

  let response = ChatBuilder::new( runtime, Provider::OpenAi, vec![ Message::user( "hi" ) ] )
    .unwrap()
    .with_model( "gpt-4o-mini" )
    .remove_plug( catalog::stage::TRACK_COST )
    .execute()
    .await
    .unwrap();

  assert_eq!( response.cost, None );
}

#[ test ]
fn inspect_pipeline_reflects_queued_modifications()
{
  let transport = ScriptedTransport::new( Vec::new() );
  let runtime = runtime_with( transport );

  let builder = ChatBuilder::new( runtime, Provider::OpenAi, vec![ Message::user( "hi" ) ] )
    .unwrap()
    .remove_plug( catalog::stage::TRACK_COST );

  let names : Vec< &str > = builder.inspect_pipeline().iter().map( | spec | spec.plug ).collect();
  assert!( !names.contains( &catalog::stage::TRACK_COST ) );
}
