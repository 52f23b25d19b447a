//! A process-wide table of named circuit breakers, gating outbound calls
//! per provider (or finer, if a caller names circuits more specifically).

use std::collections::HashMap;
use std::sync::atomic::{ AtomicU32, AtomicU64, Ordering };
use std::sync::Arc;
use std::time::{ Duration, Instant };

use parking_lot::RwLock;
use tracing::{ debug, info };

/// Tunables for one circuit.
#[ derive( Debug, Clone, Copy ) ]
pub struct CircuitBreakerConfig
{
  /// Consecutive failures, while closed, that trip the circuit open.
  pub failure_threshold : u32,
  /// How long a tripped circuit stays open before allowing a trial call.
  pub reset_timeout : Duration,
  /// Consecutive successes, while half-open, needed to close the circuit.
  pub success_threshold : u32,
  /// Deadline enforced around a single call gated by this circuit, in
  /// milliseconds. A call that overruns this counts as a timeout, not a
  /// plain failure.
  pub call_timeout_ms : u64,
}

impl Default for CircuitBreakerConfig
{
  fn default() -> Self
  {
    Self
    {
      failure_threshold : 5,
      reset_timeout : Duration::from_secs( 30 ),
      success_threshold : 2,
      call_timeout_ms : 30_000,
    }
  }
}

impl CircuitBreakerConfig
{
  /// Validate the config's invariants.
  ///
  /// # Errors
  ///
  /// Returns a description of the first violated constraint.
  pub fn validate( &self ) -> Result< (), String >
  {
    if self.failure_threshold == 0
    {
      return Err( "failure_threshold must be positive".to_string() );
    }
    if self.success_threshold == 0
    {
      return Err( "success_threshold must be positive".to_string() );
    }
    if self.call_timeout_ms == 0
    {
      return Err( "call_timeout_ms must be positive".to_string() );
    }
    Ok( () )
  }
}

#[ derive( Debug, Clone, Copy, PartialEq, Eq ) ]
enum CircuitState
{
  Closed,
  Open,
  HalfOpen,
}

/// Point-in-time counters for one circuit.
#[ derive( Debug, Clone, Copy ) ]
pub struct CircuitStats
{
  /// Current state, as a label (`"closed"`, `"open"`, `"half_open"`).
  pub state : &'static str,
  /// Consecutive failures recorded in the current window.
  pub consecutive_failures : u32,
  /// Consecutive successes recorded since entering half-open.
  pub consecutive_successes : u32,
  /// Total calls rejected outright while open.
  pub rejected_calls : u64,
}

/// An event describing a circuit's state change or call outcome, for a
/// caller that wants to export breaker activity without this crate taking
/// a hard dependency on any specific telemetry sink.
#[ derive( Debug, Clone ) ]
pub enum TelemetryEvent
{
  /// The circuit moved between states.
  StateChange { circuit : String, from : &'static str, to : &'static str },
  /// A call through the circuit succeeded.
  CallSuccess { circuit : String },
  /// A call through the circuit failed.
  CallFailure { circuit : String },
  /// A call timed out (treated as a failure for trip purposes).
  CallTimeout { circuit : String },
  /// A call was rejected without attempting I/O.
  CallRejected { circuit : String },
  /// A circuit was created on first reference.
  CircuitCreated { circuit : String },
  /// A circuit was manually reset.
  CircuitReset { circuit : String },
  /// A circuit's config was replaced.
  ConfigUpdated { circuit : String },
}

fn emit( event : &TelemetryEvent )
{
  match event
  {
    TelemetryEvent::StateChange { circuit, from, to } => info!( circuit, from, to, "circuit state changed" ),
    TelemetryEvent::CallSuccess { circuit } => debug!( circuit, "circuit call succeeded" ),
    TelemetryEvent::CallFailure { circuit } => debug!( circuit, "circuit call failed" ),
    TelemetryEvent::CallTimeout { circuit } => debug!( circuit, "circuit call timed out" ),
    TelemetryEvent::CallRejected { circuit } => debug!( circuit, "circuit rejected call" ),
    TelemetryEvent::CircuitCreated { circuit } => info!( circuit, "circuit created" ),
    TelemetryEvent::CircuitReset { circuit } => info!( circuit, "circuit reset" ),
    TelemetryEvent::ConfigUpdated { circuit } => info!( circuit, "circuit config updated" ),
  }
}

/// One named circuit. Its own lock (not the registry's) guards every state
/// transition, so concurrent calls through different circuits never
/// contend with each other.
pub struct CircuitBreaker
{
  name : String,
  config : RwLock< CircuitBreakerConfig >,
  state : RwLock< CircuitState >,
  consecutive_failures : AtomicU32,
  consecutive_successes : AtomicU32,
  rejected_calls : AtomicU64,
  opened_at : RwLock< Option< Instant > >,
}

impl CircuitBreaker
{
  fn new( name : String, config : CircuitBreakerConfig ) -> Self
  {
    emit( &TelemetryEvent::CircuitCreated { circuit : name.clone() } );
    Self
    {
      name,
      config : RwLock::new( config ),
      state : RwLock::new( CircuitState::Closed ),
      consecutive_failures : AtomicU32::new( 0 ),
      consecutive_successes : AtomicU32::new( 0 ),
      rejected_calls : AtomicU64::new( 0 ),
      opened_at : RwLock::new( None ),
    }
  }

  /// Whether a call may proceed right now. An open circuit whose
  /// `reset_timeout` has elapsed transitions to half-open and allows
  /// exactly the calls made while in that state through, per the
  /// half-open trial semantics.
  pub fn should_allow_request( &self ) -> bool
  {
    let state = *self.state.read();
    match state
    {
      CircuitState::Closed | CircuitState::HalfOpen => true,
      CircuitState::Open =>
      {
        let elapsed = self.opened_at.read().map( | at | at.elapsed() ).unwrap_or( Duration::ZERO );
        if elapsed >= self.config.read().reset_timeout
        {
          self.transition( CircuitState::HalfOpen );
          true
        }
        else
        {
          self.rejected_calls.fetch_add( 1, Ordering::Relaxed );
          emit( &TelemetryEvent::CallRejected { circuit : self.name.clone() } );
          false
        }
      }
    }
  }

  /// Record a successful call.
  pub fn record_success( &self )
  {
    emit( &TelemetryEvent::CallSuccess { circuit : self.name.clone() } );
    self.consecutive_failures.store( 0, Ordering::Relaxed );
    if *self.state.read() == CircuitState::HalfOpen
    {
      let successes = self.consecutive_successes.fetch_add( 1, Ordering::Relaxed ) + 1;
      if successes >= self.config.read().success_threshold
      {
        self.consecutive_successes.store( 0, Ordering::Relaxed );
        self.transition( CircuitState::Closed );
      }
    }
  }

  /// Record a failed call (including a timeout; call
  /// [`Self::record_timeout`] instead if the caller wants the distinct
  /// telemetry event).
  pub fn record_failure( &self )
  {
    emit( &TelemetryEvent::CallFailure { circuit : self.name.clone() } );
    self.consecutive_successes.store( 0, Ordering::Relaxed );
    if *self.state.read() == CircuitState::HalfOpen
    {
      self.transition( CircuitState::Open );
      return;
    }
    let failures = self.consecutive_failures.fetch_add( 1, Ordering::Relaxed ) + 1;
    if failures >= self.config.read().failure_threshold
    {
      self.transition( CircuitState::Open );
    }
  }

  /// Record a timed-out call.
  pub fn record_timeout( &self )
  {
    emit( &TelemetryEvent::CallTimeout { circuit : self.name.clone() } );
    self.record_failure();
  }

  fn transition( &self, to : CircuitState )
  {
    let mut state = self.state.write();
    if *state == to
    {
      return;
    }
    let from = *state;
    *state = to;
    if to == CircuitState::Open
    {
      *self.opened_at.write() = Some( Instant::now() );
    }
    drop( state );
    emit( &TelemetryEvent::StateChange
    {
      circuit : self.name.clone(),
      from : state_label( from ),
      to : state_label( to ),
    } );
  }

  /// Point-in-time counters.
  #[ must_use ]
  pub fn stats( &self ) -> CircuitStats
  {
    CircuitStats
    {
      state : state_label( *self.state.read() ),
      consecutive_failures : self.consecutive_failures.load( Ordering::Relaxed ),
      consecutive_successes : self.consecutive_successes.load( Ordering::Relaxed ),
      rejected_calls : self.rejected_calls.load( Ordering::Relaxed ),
    }
  }

  /// Force this circuit back to closed, clearing its counters.
  pub fn reset( &self )
  {
    emit( &TelemetryEvent::CircuitReset { circuit : self.name.clone() } );
    self.consecutive_failures.store( 0, Ordering::Relaxed );
    self.consecutive_successes.store( 0, Ordering::Relaxed );
    *self.state.write() = CircuitState::Closed;
    *self.opened_at.write() = None;
  }

  /// This circuit's current config.
  #[ must_use ]
  pub fn config( &self ) -> CircuitBreakerConfig
  {
    *self.config.read()
  }

  /// Replace this circuit's config.
  ///
  /// # Errors
  ///
  /// Returns the validation error if `config` violates
  /// [`CircuitBreakerConfig::validate`]; the old config is kept on failure.
  pub fn update_config( &self, config : CircuitBreakerConfig ) -> Result< (), String >
  {
    config.validate()?;
    *self.config.write() = config;
    emit( &TelemetryEvent::ConfigUpdated { circuit : self.name.clone() } );
    Ok( () )
  }
}

fn state_label( state : CircuitState ) -> &'static str
{
  match state
  {
    CircuitState::Closed => "closed",
    CircuitState::Open => "open",
    CircuitState::HalfOpen => "half_open",
  }
}

/// Process-wide table of named circuits. A brief write lock is taken only
/// to insert a circuit on first reference (first-writer-wins); every
/// subsequent state transition goes through the circuit's own lock.
#[ derive( Default ) ]
pub struct CircuitRegistry
{
  circuits : RwLock< HashMap< String, Arc< CircuitBreaker > > >,
  default_config : CircuitBreakerConfig,
}

impl CircuitRegistry
{
  /// A registry whose circuits default to `config` on first creation.
  #[ must_use ]
  pub fn new( default_config : CircuitBreakerConfig ) -> Self
  {
    Self { circuits : RwLock::new( HashMap::new() ), default_config }
  }

  /// Fetch the named circuit, creating it with the registry's default
  /// config if this is the first reference.
  pub fn get_or_create( &self, name : &str ) -> Arc< CircuitBreaker >
  {
    if let Some( existing ) = self.circuits.read().get( name )
    {
      return existing.clone();
    }
    let mut circuits = self.circuits.write();
    circuits.entry( name.to_string() )
      .or_insert_with( || Arc::new( CircuitBreaker::new( name.to_string(), self.default_config ) ) )
      .clone()
  }

  /// Stats for a circuit, if it has been referenced at least once.
  #[ must_use ]
  pub fn get_stats( &self, name : &str ) -> Option< CircuitStats >
  {
    self.circuits.read().get( name ).map( | c | c.stats() )
  }

  /// Reset a circuit, if it exists.
  pub fn reset( &self, name : &str )
  {
    if let Some( circuit ) = self.circuits.read().get( name )
    {
      circuit.reset();
    }
  }

  /// Update a circuit's config, if it exists.
  ///
  /// # Errors
  ///
  /// Returns the validation error from [`CircuitBreaker::update_config`];
  /// returns `Ok(())` (a no-op) if the circuit has never been referenced.
  pub fn update_config( &self, name : &str, config : CircuitBreakerConfig ) -> Result< (), String >
  {
    match self.circuits.read().get( name )
    {
      Some( circuit ) => circuit.update_config( config ),
      None => Ok( () ),
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  fn fast_config() -> CircuitBreakerConfig
  {
    CircuitBreakerConfig
    {
      failure_threshold : 3,
      reset_timeout : Duration::from_millis( 20 ),
      success_threshold : 2,
      call_timeout_ms : 30_000,
    }
  }

  #[ test ]
  fn opens_after_failure_threshold()
  {
    let registry = CircuitRegistry::new( fast_config() );
    let circuit = registry.get_or_create( "openai" );
    for _ in 0..3
    {
      circuit.record_failure();
    }
    assert!( !circuit.should_allow_request() );
  }

  #[ test ]
  fn half_opens_after_reset_timeout_then_closes_on_successes()
  {
    let registry = CircuitRegistry::new( fast_config() );
    let circuit = registry.get_or_create( "openai" );
    for _ in 0..3
    {
      circuit.record_failure();
    }
    std::thread::sleep( Duration::from_millis( 30 ) );
    assert!( circuit.should_allow_request() );
    circuit.record_success();
    circuit.record_success();
    assert_eq!( circuit.stats().state, "closed" );
  }

  #[ test ]
  fn half_open_failure_reopens_immediately()
  {
    let registry = CircuitRegistry::new( fast_config() );
    let circuit = registry.get_or_create( "openai" );
    for _ in 0..3
    {
      circuit.record_failure();
    }
    std::thread::sleep( Duration::from_millis( 30 ) );
    assert!( circuit.should_allow_request() );
    circuit.record_failure();
    assert!( !circuit.should_allow_request() );
  }

  #[ test ]
  fn distinct_circuits_do_not_interfere()
  {
    let registry = CircuitRegistry::new( fast_config() );
    let a = registry.get_or_create( "openai" );
    let b = registry.get_or_create( "anthropic" );
    for _ in 0..3
    {
      a.record_failure();
    }
    assert!( !a.should_allow_request() );
    assert!( b.should_allow_request() );
  }

  #[ test ]
  fn invalid_config_is_rejected_and_old_config_kept()
  {
    let registry = CircuitRegistry::new( fast_config() );
    let circuit = registry.get_or_create( "openai" );
    let bad = CircuitBreakerConfig { failure_threshold : 0, ..fast_config() };
    assert!( circuit.update_config( bad ).is_err() );
    for _ in 0..3
    {
      circuit.record_failure();
    }
    assert!( !circuit.should_allow_request() );
  }
}
