//! Response caching : a pluggable storage backend plus a facade that
//! fingerprints requests, decides whether to consult the cache at all, and
//! guarantees at most one concurrent build per fingerprint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{ Duration, Instant };

use parking_lot::Mutex;
use serde_json::Value;
use sha2::{ Digest, Sha256 };
use tokio::sync::Notify;
use tracing::debug;

use crate::catalog::{ LlmResponse, Provider };
use crate::request::{ CacheOption, Options };

/// One stored response plus its expiry.
#[ derive( Debug, Clone ) ]
pub struct CacheEntry
{
  /// The cached response.
  pub response : LlmResponse,
  /// When this entry stops being servable.
  pub expires_at : Instant,
}

impl CacheEntry
{
  /// Whether `self` is still servable.
  #[ must_use ]
  pub fn is_expired( &self ) -> bool
  {
    Instant::now() >= self.expires_at
  }
}

/// Point-in-time counters a backend reports through [`CacheBackend::info`].
#[ derive( Debug, Clone, Copy, Default ) ]
pub struct CacheInfo
{
  /// Live (non-expired) entries.
  pub entries : usize,
  /// Cumulative hits since the backend was created.
  pub hits : u64,
  /// Cumulative misses since the backend was created.
  pub misses : u64,
}

/// Storage contract for cached responses. `InMemoryCacheBackend` ships as
/// the default; a caller may plug in Redis or another shared store by
/// implementing this trait.
#[ async_trait::async_trait ]
pub trait CacheBackend : Send + Sync
{
  /// Prepare the backend for use (connect, create tables, ...). A no-op
  /// for backends needing no setup.
  async fn init( &self ) -> Result< (), String >;

  /// Fetch a live entry, if any.
  async fn get( &self, key : &str ) -> Option< CacheEntry >;

  /// Store an entry, overwriting whatever was there.
  async fn put( &self, key : &str, entry : CacheEntry );

  /// Remove one entry.
  async fn delete( &self, key : &str );

  /// Remove every entry.
  async fn clear( &self );

  /// List every live key, for diagnostics.
  async fn list_keys( &self ) -> Vec< String >;

  /// Point-in-time counters.
  async fn info( &self ) -> CacheInfo;
}

struct Bucket
{
  entries : HashMap< String, CacheEntry >,
  capacity : usize,
  order : Vec< String >,
  hits : u64,
  misses : u64,
}

/// Default [`CacheBackend`] : an in-process LRU-with-TTL map. Adequate for
/// a single process; a multi-instance deployment needs a shared backend.
pub struct InMemoryCacheBackend
{
  bucket : Mutex< Bucket >,
}

impl InMemoryCacheBackend
{
  /// Create a backend that evicts its least-recently-used entry once more
  /// than `capacity` keys are live.
  #[ must_use ]
  pub fn new( capacity : usize ) -> Self
  {
    Self { bucket : Mutex::new( Bucket { entries : HashMap::new(), capacity, order : Vec::new(), hits : 0, misses : 0 } ) }
  }
}

impl Default for InMemoryCacheBackend
{
  fn default() -> Self
  {
    Self::new( 1024 )
  }
}

fn touch( bucket : &mut Bucket, key : &str )
{
  bucket.order.retain( | k | k != key );
  bucket.order.push( key.to_string() );
}

#[ async_trait::async_trait ]
impl CacheBackend for InMemoryCacheBackend
{
  async fn init( &self ) -> Result< (), String >
  {
    Ok( () )
  }

  async fn get( &self, key : &str ) -> Option< CacheEntry >
  {
    let mut bucket = self.bucket.lock();
    let live = bucket.entries.get( key ).filter( | e | !e.is_expired() ).cloned();
    match &live
    {
      Some( _ ) => { bucket.hits += 1; touch( &mut bucket, key ); }
      None =>
      {
        bucket.misses += 1;
        bucket.entries.remove( key );
      }
    }
    live
  }

  async fn put( &self, key : &str, entry : CacheEntry )
  {
    let mut bucket = self.bucket.lock();
    bucket.entries.insert( key.to_string(), entry );
    touch( &mut bucket, key );
    while bucket.entries.len() > bucket.capacity && !bucket.order.is_empty()
    {
      let victim = bucket.order.remove( 0 );
      bucket.entries.remove( &victim );
    }
  }

  async fn delete( &self, key : &str )
  {
    let mut bucket = self.bucket.lock();
    bucket.entries.remove( key );
    bucket.order.retain( | k | k != key );
  }

  async fn clear( &self )
  {
    let mut bucket = self.bucket.lock();
    bucket.entries.clear();
    bucket.order.clear();
  }

  async fn list_keys( &self ) -> Vec< String >
  {
    self.bucket.lock().entries.keys().cloned().collect()
  }

  async fn info( &self ) -> CacheInfo
  {
    let bucket = self.bucket.lock();
    CacheInfo { entries : bucket.entries.len(), hits : bucket.hits, misses : bucket.misses }
  }
}

/// Computes fingerprints, decides whether a given call is cacheable, and
/// enforces at most one concurrent build per fingerprint (single-flight)
/// for backends that can't atomically reserve a key themselves.
pub struct CacheFacade
{
  backend : Arc< dyn CacheBackend >,
  default_ttl : Duration,
  in_flight : Mutex< HashMap< String, Arc< Notify > > >,
}

impl CacheFacade
{
  /// Wrap `backend`, defaulting TTL to `default_ttl` when a call's
  /// `CacheOption::Default` doesn't specify one.
  #[ must_use ]
  pub fn new( backend : Arc< dyn CacheBackend >, default_ttl : Duration ) -> Self
  {
    Self { backend, default_ttl, in_flight : Mutex::new( HashMap::new() ) }
  }

  /// Compute the fingerprint for one call : a stable hash of provider,
  /// model, normalized messages, and the semantically-meaningful options
  /// subset (excludes timeouts, cache policy, and telemetry-only `extra`).
  #[ must_use ]
  pub fn fingerprint( provider : Provider, model : &str, messages : &[ crate::request::Message ], options : &Options ) -> String
  {
    let payload = serde_json::json!(
    {
      "provider" : provider.as_str(),
      "model" : model,
      "messages" : messages,
      "options" : options.semantic_subset(),
    } );
    let mut hasher = Sha256::new();
    hasher.update( payload.to_string().as_bytes() );
    format!( "{:x}", hasher.finalize() )
  }

  /// Whether `cache` on a call means "never consult or populate". Streaming
  /// and tool-executing calls are non-idempotent builds and also bypass the
  /// cache regardless of this flag, per the pipeline's stream pipeline
  /// simply never wiring the cache stages in.
  #[ must_use ]
  pub fn is_disabled( cache : CacheOption ) -> bool
  {
    matches!( cache, CacheOption::Disabled )
  }

  fn ttl_for( &self, cache : CacheOption ) -> Duration
  {
    match cache
    {
      CacheOption::TtlMs( ms ) => Duration::from_millis( ms ),
      CacheOption::Infinite => Duration::from_secs( 60 * 60 * 24 * 365 ),
      CacheOption::Default | CacheOption::Disabled => self.default_ttl,
    }
  }

  /// Look up `fingerprint`. Blocks (without holding any lock) until an
  /// in-flight build for the same fingerprint completes, then re-checks the
  /// backend once — this is the single-flight guarantee.
  pub async fn get_or_wait( &self, fingerprint : &str ) -> Option< LlmResponse >
  {
    if let Some( entry ) = self.backend.get( fingerprint ).await
    {
      return Some( entry.response );
    }
    let notify = self.in_flight.lock().get( fingerprint ).cloned();
    if let Some( notify ) = notify
    {
      notify.notified().await;
      return self.backend.get( fingerprint ).await.map( | e | e.response );
    }
    None
  }

  /// Claim the right to build `fingerprint`, if nobody else is already
  /// building it. Returns `false` when a build is already in flight — the
  /// caller should have already awaited [`Self::get_or_wait`] in that case.
  pub fn claim_build( &self, fingerprint : &str ) -> bool
  {
    let mut in_flight = self.in_flight.lock();
    if in_flight.contains_key( fingerprint )
    {
      return false;
    }
    in_flight.insert( fingerprint.to_string(), Arc::new( Notify::new() ) );
    true
  }

  /// Publish a freshly built response and release any waiters.
  pub async fn store( &self, fingerprint : &str, response : LlmResponse, cache : CacheOption )
  {
    let ttl = self.ttl_for( cache );
    self.backend.put( fingerprint, CacheEntry { response, expires_at : Instant::now() + ttl } ).await;
    if let Some( notify ) = self.in_flight.lock().remove( fingerprint )
    {
      notify.notify_waiters();
    }
    debug!( fingerprint, "cache populated" );
  }

  /// Release the in-flight claim without publishing anything (the build
  /// failed). Waiters re-check the backend and see a miss.
  pub fn abandon_build( &self, fingerprint : &str )
  {
    if let Some( notify ) = self.in_flight.lock().remove( fingerprint )
    {
      notify.notify_waiters();
    }
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::catalog::{ ResponseMetadata, Usage };
  use crate::request::{ Content, Role };

  fn sample_response() -> LlmResponse
  {
    LlmResponse
    {
      content : Content::Text( "hi".to_string() ),
      model : "gpt-4o-mini".to_string(),
      role : Role::Assistant,
      finish_reason : "stop".to_string(),
      usage : Usage::default(),
      tool_calls : Vec::new(),
      refusal : None,
      cost : None,
      metadata : ResponseMetadata { provider : Provider::OpenAi, id : None, created : None, raw : None },
    }
  }

  #[ tokio::test ]
  async fn miss_then_hit()
  {
    let backend = Arc::new( InMemoryCacheBackend::new( 8 ) );
    let facade = CacheFacade::new( backend, Duration::from_secs( 60 ) );
    assert!( facade.get_or_wait( "key-1" ).await.is_none() );
    facade.store( "key-1", sample_response(), CacheOption::Default ).await;
    assert!( facade.get_or_wait( "key-1" ).await.is_some() );
  }

  #[ tokio::test ]
  async fn entry_expires()
  {
    let backend = Arc::new( InMemoryCacheBackend::new( 8 ) );
    let facade = CacheFacade::new( backend, Duration::from_millis( 10 ) );
    facade.store( "key-1", sample_response(), CacheOption::Default ).await;
    tokio::time::sleep( Duration::from_millis( 30 ) ).await;
    assert!( facade.get_or_wait( "key-1" ).await.is_none() );
  }

  #[ tokio::test ]
  async fn lru_eviction_drops_oldest()
  {
    let backend = InMemoryCacheBackend::new( 2 );
    backend.put( "a", CacheEntry { response : sample_response(), expires_at : Instant::now() + Duration::from_secs( 60 ) } ).await;
    backend.put( "b", CacheEntry { response : sample_response(), expires_at : Instant::now() + Duration::from_secs( 60 ) } ).await;
    backend.put( "c", CacheEntry { response : sample_response(), expires_at : Instant::now() + Duration::from_secs( 60 ) } ).await;
    assert!( backend.get( "a" ).await.is_none() );
    assert!( backend.get( "c" ).await.is_some() );
  }

  #[ tokio::test ]
  async fn second_waiter_sees_result_of_first_builder()
  {
    let backend = Arc::new( InMemoryCacheBackend::new( 8 ) );
    let facade = Arc::new( CacheFacade::new( backend, Duration::from_secs( 60 ) ) );
    assert!( facade.claim_build( "key-1" ) );
    assert!( !facade.claim_build( "key-1" ) );

    let waiter_facade = facade.clone();
    let waiter = tokio::spawn( async move { waiter_facade.get_or_wait( "key-1" ).await } );
    tokio::task::yield_now().await;
    facade.store( "key-1", sample_response(), CacheOption::Default ).await;
    assert!( waiter.await.unwrap().is_some() );
  }

  #[ test ]
  fn fingerprint_is_stable_for_identical_input()
  {
    let messages = vec![ crate::request::Message::user( "hi" ) ];
    let options = Options::default();
    let a = CacheFacade::fingerprint( Provider::OpenAi, "gpt-4o-mini", &messages, &options );
    let b = CacheFacade::fingerprint( Provider::OpenAi, "gpt-4o-mini", &messages, &options );
    assert_eq!( a, b );
  }
}
