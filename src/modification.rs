//! Pipeline modifications : a declarative diff applied to a provider's
//! default pipeline before it runs.

use crate::pipeline::{ Pipeline, PlugSpec };
use crate::plug::PlugOpts;

/// A single edit to a base pipeline. Modifications are folded in
/// declaration order; the first [`PipelineModification::Custom`]
/// short-circuits every modification after it.
#[ derive( Debug, Clone ) ]
pub enum PipelineModification
{
  /// Substitute `target` in place with `plug`/`opts`.
  Replace
  {
    /// Name of the stage being replaced.
    target : &'static str,
    /// Replacement plug name.
    plug : &'static str,
    /// Replacement options.
    opts : PlugOpts,
  },
  /// Drop `target` from the pipeline.
  Remove
  {
    /// Name of the stage to drop.
    target : &'static str,
  },
  /// Add `plug` to the end of the pipeline.
  Append
  {
    /// Plug to append.
    plug : &'static str,
    /// Options for the appended plug.
    opts : PlugOpts,
  },
  /// Add `plug` to the start of the pipeline.
  Prepend
  {
    /// Plug to prepend.
    plug : &'static str,
    /// Options for the prepended plug.
    opts : PlugOpts,
  },
  /// Insert `plug` immediately before `anchor`.
  InsertBefore
  {
    /// Name of the existing stage to insert before.
    anchor : &'static str,
    /// Plug to insert.
    plug : &'static str,
    /// Options for the inserted plug.
    opts : PlugOpts,
  },
  /// Insert `plug` immediately after `anchor`.
  InsertAfter
  {
    /// Name of the existing stage to insert after.
    anchor : &'static str,
    /// Plug to insert.
    plug : &'static str,
    /// Options for the inserted plug.
    opts : PlugOpts,
  },
  /// Wholesale replacement of the pipeline. Everything after the first
  /// occurrence of this variant in the modification list is ignored.
  Custom
  {
    /// The replacement pipeline.
    pipeline : Pipeline,
  },
}

/// Fold `modifications` onto `base`, per the compilation algorithm : the
/// first `Custom` short-circuits the rest; otherwise every modification is
/// applied in order. Pure function of its inputs.
#[ must_use ]
pub fn compile( base : &Pipeline, modifications : &[ PipelineModification ] ) -> Pipeline
{
  for modification in modifications
  {
    if let PipelineModification::Custom { pipeline } = modification
    {
      return pipeline.clone();
    }
  }

  let mut pipeline = base.clone();
  for modification in modifications
  {
    match modification
    {
      PipelineModification::Custom { .. } => unreachable!( "handled by the short-circuit above" ),
      PipelineModification::Replace { target, plug, opts } =>
      {
        if let Some( slot ) = pipeline.iter_mut().find( | spec | spec.plug == *target )
        {
          *slot = PlugSpec::with_opts( plug, opts.clone() );
        }
      }
      PipelineModification::Remove { target } =>
      {
        pipeline.retain( | spec | spec.plug != *target );
      }
      PipelineModification::Append { plug, opts } =>
      {
        pipeline.push( PlugSpec::with_opts( plug, opts.clone() ) );
      }
      PipelineModification::Prepend { plug, opts } =>
      {
        pipeline.insert( 0, PlugSpec::with_opts( plug, opts.clone() ) );
      }
      PipelineModification::InsertBefore { anchor, plug, opts } =>
      {
        let index = pipeline.iter().position( | spec | spec.plug == *anchor ).unwrap_or( pipeline.len() );
        pipeline.insert( index, PlugSpec::with_opts( plug, opts.clone() ) );
      }
      PipelineModification::InsertAfter { anchor, plug, opts } =>
      {
        let index = pipeline.iter().position( | spec | spec.plug == *anchor )
          .map_or( pipeline.len(), | i | i + 1 );
        pipeline.insert( index, PlugSpec::with_opts( plug, opts.clone() ) );
      }
    }
  }
  pipeline
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  fn p( name : &'static str ) -> PlugSpec
  {
    PlugSpec::bare( name )
  }

  #[ test ]
  fn replace_and_remove()
  {
    let base = vec![ p( "a" ), p( "b" ), p( "c" ) ];
    let mods = vec!
    [
      PipelineModification::Replace { target : "b", plug : "b2", opts : PlugOpts::none() },
      PipelineModification::Remove { target : "c" },
    ];
    let compiled = compile( &base, &mods );
    let names : Vec< _ > = compiled.iter().map( | s | s.plug ).collect();
    assert_eq!( names, vec![ "a", "b2" ] );
  }

  #[ test ]
  fn custom_short_circuits()
  {
    let base = vec![ p( "a" ) ];
    let mods = vec!
    [
      PipelineModification::Custom { pipeline : vec![ p( "z" ) ] },
      PipelineModification::Append { plug : "ignored", opts : PlugOpts::none() },
    ];
    let compiled = compile( &base, &mods );
    let names : Vec< _ > = compiled.iter().map( | s | s.plug ).collect();
    assert_eq!( names, vec![ "z" ] );
  }

  #[ test ]
  fn insert_after_is_associative_for_disjoint_anchors()
  {
    let base = vec![ p( "a" ), p( "b" ) ];
    let mods_1 = vec!
    [
      PipelineModification::InsertAfter { anchor : "a", plug : "x", opts : PlugOpts::none() },
      PipelineModification::InsertAfter { anchor : "b", plug : "y", opts : PlugOpts::none() },
    ];
    let mods_2 = vec!
    [
      PipelineModification::InsertAfter { anchor : "b", plug : "y", opts : PlugOpts::none() },
      PipelineModification::InsertAfter { anchor : "a", plug : "x", opts : PlugOpts::none() },
    ];
    let names_1 : Vec< _ > = compile( &base, &mods_1 ).iter().map( | s | s.plug ).collect();
    let names_2 : Vec< _ > = compile( &base, &mods_2 ).iter().map( | s | s.plug ).collect();
    assert_eq!( names_1, names_2 );
    assert_eq!( names_1, vec![ "a", "x", "b", "y" ] );
  }

  #[ test ]
  fn compile_is_pure()
  {
    let base = vec![ p( "a" ), p( "b" ) ];
    let mods = vec![ PipelineModification::Append { plug : "c", opts : PlugOpts::none() } ];
    let once = compile( &base, &mods );
    let twice = compile( &base, &mods );
    let names_1 : Vec< _ > = once.iter().map( | s | s.plug ).collect();
    let names_2 : Vec< _ > = twice.iter().map( | s | s.plug ).collect();
    assert_eq!( names_1, names_2 );
  }
}
