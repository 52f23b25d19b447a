//! Pipeline specs and the runner that drives a [`Request`] through them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::plug::{ call_guarded, Plug, PlugOpts };
use crate::request::{ Request, State };

/// A bare plug identifier or a `(plug, opts)` pair, as it appears in a
/// [`Pipeline`] before resolution against a [`PlugRegistry`].
#[ derive( Debug, Clone ) ]
pub struct PlugSpec
{
  /// Name looked up in the registry.
  pub plug : &'static str,
  /// Options frozen in at compile time.
  pub opts : PlugOpts,
}

impl PlugSpec
{
  /// A plug reference with default (empty) options.
  #[ must_use ]
  pub fn bare( plug : &'static str ) -> Self
  {
    Self { plug, opts : PlugOpts::none() }
  }

  /// A plug reference with explicit options.
  #[ must_use ]
  pub fn with_opts( plug : &'static str, opts : PlugOpts ) -> Self
  {
    Self { plug, opts }
  }
}

/// An ordered sequence of plug specifications.
pub type Pipeline = Vec< PlugSpec >;

/// Maps a plug name to its implementation. Populated once per provider
/// catalog entry; looked up by name at compile/run time so pipeline
/// modifications can refer to stages by their stable name.
#[ derive( Clone, Default ) ]
pub struct PlugRegistry( HashMap< &'static str, Arc< dyn Plug > > );

impl std::fmt::Debug for PlugRegistry
{
  fn fmt( &self, f : &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "PlugRegistry" ).field( "plugs", &self.0.keys().collect::< Vec< _ > >() ).finish()
  }
}

impl PlugRegistry
{
  /// An empty registry.
  #[ must_use ]
  pub fn new() -> Self
  {
    Self::default()
  }

  /// Register a plug under its own name.
  pub fn register( &mut self, plug : Arc< dyn Plug > )
  {
    self.0.insert( plug.name(), plug );
  }

  /// Look up a plug by name.
  #[ must_use ]
  pub fn get( &self, name : &str ) -> Option< Arc< dyn Plug > >
  {
    self.0.get( name ).cloned()
  }
}

/// Iterates a resolved [`Pipeline`] against a [`PlugRegistry`], honoring
/// halt/error/terminal-state semantics.
#[ derive( Debug, Default ) ]
pub struct Runner;

impl Runner
{
  /// Drive `request` through `pipeline`.
  ///
  /// Before each plug, a terminal state stops iteration. After each plug,
  /// a halt or a newly recorded error also stops iteration. A plug name
  /// absent from `registry` is treated as a `PlugException` on that stage
  /// and iteration stops, matching how a raised exception inside a plug
  /// is handled.
  #[ must_use ]
  pub fn run( pipeline : &Pipeline, registry : &PlugRegistry, mut request : Request ) -> Request
  {
    request.mark_executing();
    for spec in pipeline
    {
      if request.state.is_terminal()
      {
        break;
      }

      let Some( plug ) = registry.get( spec.plug ) else
      {
        request.put_error_from_plug(
          crate::error::ErrorKind::PlugException,
          format!( "no plug registered under the name '{}'", spec.plug ),
          spec.plug,
        );
        break;
      };

      request = call_guarded( plug.as_ref(), request, &spec.opts );

      if request.is_halted()
      {
        if !request.state.is_terminal()
        {
          if request.result.is_some()
          {
            request.state = State::Completed;
          }
          else
          {
            request.put_error( crate::error::ErrorKind::Halted, "pipeline halted with no result" );
          }
        }
        break;
      }

      if request.state == State::Error
      {
        break;
      }
    }
    request
  }
}
