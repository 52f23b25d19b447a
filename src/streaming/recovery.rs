//! Mid-stream recovery : when the transport drops a stream before a
//! terminal chunk arrived, reconnect with exponential backoff rather than
//! surfacing a partial response as a success.

use std::time::Duration;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;

/// Bounds on how the coordinator may retry a dropped stream.
#[ derive( Debug, Clone ) ]
pub struct RecoveryPolicy
{
  /// Maximum reconnect attempts before giving up and surfacing
  /// `StreamInterrupted`.
  pub max_retries : u32,
  /// First retry delay.
  pub initial_interval : Duration,
  /// Growth factor applied to the delay after each attempt.
  pub multiplier : f64,
  /// Ceiling on any single retry delay.
  pub max_interval : Duration,
}

impl Default for RecoveryPolicy
{
  fn default() -> Self
  {
    Self
    {
      max_retries : 3,
      initial_interval : Duration::from_millis( 200 ),
      multiplier : 2.0,
      max_interval : Duration::from_secs( 10 ),
    }
  }
}

impl RecoveryPolicy
{
  /// A policy that never retries; a dropped stream surfaces immediately.
  #[ must_use ]
  pub fn disabled() -> Self
  {
    Self { max_retries : 0, ..Self::default() }
  }

  /// Build a fresh backoff generator from this policy, scoped to one
  /// in-flight stream's reconnect attempts.
  #[ must_use ]
  pub fn backoff( &self ) -> ExponentialBackoff
  {
    ExponentialBackoff
    {
      initial_interval : self.initial_interval,
      multiplier : self.multiplier,
      max_interval : self.max_interval,
      max_elapsed_time : None,
      ..ExponentialBackoff::default()
    }
  }
}

/// Drives reconnect delays for one stream's recovery attempts. Not
/// reentrant : a fresh instance belongs to one `StreamCoordinator::run` call.
pub struct RecoveryState
{
  policy : RecoveryPolicy,
  backoff : ExponentialBackoff,
  attempts : u32,
}

impl RecoveryState
{
  /// Start tracking recovery attempts under `policy`.
  #[ must_use ]
  pub fn new( policy : RecoveryPolicy ) -> Self
  {
    let backoff = policy.backoff();
    Self { policy, backoff, attempts : 0 }
  }

  /// The delay before the next reconnect attempt, or `None` once
  /// `max_retries` is exhausted.
  pub fn next_delay( &mut self ) -> Option< Duration >
  {
    if self.attempts >= self.policy.max_retries
    {
      return None;
    }
    self.attempts += 1;
    self.backoff.next_backoff()
  }

  /// Attempts spent so far.
  #[ must_use ]
  pub fn attempts( &self ) -> u32
  {
    self.attempts
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn exhausts_after_max_retries()
  {
    let mut state = RecoveryState::new( RecoveryPolicy { max_retries : 2, ..RecoveryPolicy::default() } );
    assert!( state.next_delay().is_some() );
    assert!( state.next_delay().is_some() );
    assert!( state.next_delay().is_none() );
    assert_eq!( state.attempts(), 2 );
  }

  #[ test ]
  fn disabled_policy_never_retries()
  {
    let mut state = RecoveryState::new( RecoveryPolicy::disabled() );
    assert!( state.next_delay().is_none() );
  }
}
