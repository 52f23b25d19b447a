//! A composable request-pipeline runtime for talking to chat-completion
//! providers (OpenAI, Anthropic, Gemini) through one `Request` type threaded
//! through an ordered list of `Plug`s.
//!
//! The governing idea, borrowed wholesale from Elixir's `Plug` : a pipeline
//! is data (a `Vec` of named stages), not control flow. A provider's
//! default pipeline is just the catalog's opinion about what that data
//! should be; [`builder::ChatBuilder`] lets a caller reshape it per call
//! without forking the crate. Reliability concerns (circuit breaking,
//! caching, streaming recovery) are stages like any other, wired in by the
//! builder rather than hardcoded into the transport.
//!
//! ```no_run
//! use std::sync::Arc;
//! use llm_core::builder::{ ChatBuilder, Runtime };
//! use llm_core::catalog::Provider;
//! use llm_core::config::EnvConfigProvider;
//! use llm_core::reliability::CircuitRegistry;
//! use llm_core::request::Message;
//! use llm_core::transport::ReqwestTransport;
//!
//! # async fn run() -> Result< (), llm_core::error::Error > {
//! let runtime = Runtime::new(
//!   Arc::new( EnvConfigProvider ),
//!   Arc::new( ReqwestTransport::default() ),
//!   Arc::new( CircuitRegistry::default() ),
//!   None,
//! );
//! let response = ChatBuilder::new( runtime, Provider::OpenAi, vec![ Message::user( "hello" ) ] )?
//!   .with_model( "gpt-4o-mini" )
//!   .execute()
//!   .await?;
//! println!( "{:?}", response.content );
//! # Ok( () )
//! # }
//! ```

pub mod builder;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod modification;
pub mod pipeline;
pub mod plug;
pub mod reliability;
pub mod request;
pub mod streaming;
pub mod transport;

pub use builder::{ ChatBuilder, Runtime };
pub use catalog::{ LlmResponse, Provider };
pub use error::Error;
pub use request::Message;
