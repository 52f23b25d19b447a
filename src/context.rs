//! Trims conversation history before it's sent to a provider, so a long
//! chat doesn't silently blow past a model's context window.

use crate::request::Message;

/// A token estimator : maps one message to an approximate token count.
/// Defaults to a byte-length heuristic, which is deliberately crude — a
/// caller with a real tokenizer for their target model should supply one.
pub type TokenEstimator = fn( &Message ) -> usize;

/// The default estimator : roughly four bytes per token, the same
/// rule-of-thumb used for quick context-budgeting without loading a real
/// tokenizer.
#[ must_use ]
pub fn byte_length_estimator( message : &Message ) -> usize
{
  ( message.content.byte_len() / 4 ).max( 1 )
}

/// How to cut a message list down to a token budget.
#[ derive( Debug, Clone, Copy ) ]
pub enum ContextStrategy
{
  /// Drop the oldest messages first until the budget is met. The system
  /// message (if it's first in the list) is kept regardless, since
  /// dropping it usually changes the conversation's meaning.
  TruncateOldest
  {
    /// Token budget to fit within.
    max_tokens : usize,
  },
  /// Keep only the most recent `window_tokens` worth of messages.
  SlidingWindow
  {
    /// Token budget of the retained window.
    window_tokens : usize,
  },
  /// A deliberate stub : truncates to `max_tokens` like `TruncateOldest`,
  /// then appends a synthetic `[summarized]` marker message in place of
  /// what was dropped, rather than calling back into a model to actually
  /// summarize it (real summarization is out of scope here).
  SummarizeStub
  {
    /// Token budget to fit within before the marker is appended.
    max_tokens : usize,
  },
}

impl Default for ContextStrategy
{
  fn default() -> Self
  {
    // A generous default; callers managing a specific model's window
    // should set an explicit budget.
    ContextStrategy::TruncateOldest { max_tokens : 64_000 }
  }
}

impl ContextStrategy
{
  /// Apply this strategy to `messages` using `estimator` for per-message
  /// token counts. Always keeps at least the most recent message, even if
  /// it alone exceeds the budget — a plug can't send an empty request.
  #[ must_use ]
  pub fn apply( &self, messages : &[ Message ], estimator : TokenEstimator ) -> Vec< Message >
  {
    match *self
    {
      ContextStrategy::TruncateOldest { max_tokens } => truncate_oldest( messages, max_tokens, estimator ),
      ContextStrategy::SlidingWindow { window_tokens } => truncate_oldest( messages, window_tokens, estimator ),
      ContextStrategy::SummarizeStub { max_tokens } =>
      {
        let kept = truncate_oldest( messages, max_tokens, estimator );
        if kept.len() == messages.len()
        {
          return kept;
        }
        let mut with_marker = vec![ Message::system( "[summarized] earlier turns of this conversation were elided to fit the context budget" ) ];
        with_marker.extend( kept );
        with_marker
      }
    }
  }
}

fn truncate_oldest( messages : &[ Message ], max_tokens : usize, estimator : TokenEstimator ) -> Vec< Message >
{
  if messages.is_empty()
  {
    return Vec::new();
  }

  let mut kept_reversed = Vec::new();
  let mut budget_used = 0usize;
  for message in messages.iter().rev()
  {
    let cost = estimator( message );
    if !kept_reversed.is_empty() && budget_used + cost > max_tokens
    {
      break;
    }
    budget_used += cost;
    kept_reversed.push( message.clone() );
  }
  kept_reversed.reverse();

  if let Some( first ) = messages.first()
  {
    if first.role == crate::request::Role::System && kept_reversed.first().map( | m | m.role ) != Some( crate::request::Role::System )
    {
      kept_reversed.insert( 0, first.clone() );
    }
  }
  kept_reversed
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::request::Message;

  #[ test ]
  fn keeps_at_least_the_most_recent_message()
  {
    let messages = vec![ Message::user( "a very very very very very very long message indeed" ) ];
    let kept = ContextStrategy::TruncateOldest { max_tokens : 1 }.apply( &messages, byte_length_estimator );
    assert_eq!( kept.len(), 1 );
  }

  #[ test ]
  fn drops_oldest_first()
  {
    let messages = vec!
    [
      Message::user( "one" ),
      Message::user( "two" ),
      Message::user( "three" ),
    ];
    let kept = ContextStrategy::TruncateOldest { max_tokens : 1 }.apply( &messages, | _ | 1 );
    assert_eq!( kept.len(), 1 );
    assert_eq!( kept[ 0 ].content, crate::request::Content::Text( "three".to_string() ) );
  }

  #[ test ]
  fn leading_system_message_survives_truncation()
  {
    let messages = vec!
    [
      Message::system( "be nice" ),
      Message::user( "one" ),
      Message::user( "two" ),
    ];
    let kept = ContextStrategy::TruncateOldest { max_tokens : 1 }.apply( &messages, | _ | 1 );
    assert_eq!( kept[ 0 ].role, crate::request::Role::System );
  }

  #[ test ]
  fn summarize_stub_appends_marker_only_when_it_trimmed_anything()
  {
    let messages = vec![ Message::user( "one" ), Message::user( "two" ) ];
    let untouched = ContextStrategy::SummarizeStub { max_tokens : 100 }.apply( &messages, | _ | 1 );
    assert_eq!( untouched.len(), 2 );

    let trimmed = ContextStrategy::SummarizeStub { max_tokens : 1 }.apply( &messages, | _ | 1 );
    assert_eq!( trimmed[ 0 ].role, crate::request::Role::System );
    assert_eq!( trimmed.len(), 2 );
  }
}
