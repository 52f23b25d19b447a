//! Measures the runner's own dispatch overhead : how much a pipeline adds on
//! top of the plugs it runs, with no network or cache I/O in the loop.

use std::sync::Arc;

use criterion::{ black_box, criterion_group, criterion_main, Criterion };

use llm_core::catalog::Provider;
use llm_core::pipeline::{ PlugRegistry, PlugSpec, Runner };
use llm_core::plug::FnPlug;
use llm_core::request::{ Message, Options, Request };

fn noop_plug( name : &'static str ) -> FnPlug
{
  FnPlug::new( name, | request, _opts | request )
}

fn build_request() -> Request
{
  Request::create( Provider::OpenAi, vec![ Message::user( "benchmark" ) ], Options::default() )
    .expect( "well-formed benchmark request" )
}

fn bench_short_pipeline( c : &mut Criterion )
{
  let mut registry = PlugRegistry::new();
  registry.register( Arc::new( noop_plug( "a" ) ) );
  registry.register( Arc::new( noop_plug( "b" ) ) );
  let pipeline = vec![ PlugSpec::bare( "a" ), PlugSpec::bare( "b" ) ];

  c.bench_function( "runner_two_stage_pipeline", | b |
  {
    b.iter( || Runner::run( black_box( &pipeline ), black_box( &registry ), black_box( build_request() ) ) );
  } );
}

fn bench_ten_stage_pipeline( c : &mut Criterion )
{
  let mut registry = PlugRegistry::new();
  let names : Vec< &'static str > = ( 0..10 ).map( | i | -> &'static str
  {
    Box::leak( format!( "stage-{i}" ).into_boxed_str() )
  } ).collect();
  for name in &names
  {
    registry.register( Arc::new( noop_plug( name ) ) );
  }
  let pipeline : Vec< PlugSpec > = names.iter().map( | n | PlugSpec::bare( n ) ).collect();

  c.bench_function( "runner_ten_stage_pipeline", | b |
  {
    b.iter( || Runner::run( black_box( &pipeline ), black_box( &registry ), black_box( build_request() ) ) );
  } );
}

criterion_group!( benches, bench_short_pipeline, bench_ten_stage_pipeline );
criterion_main!( benches );
