//! Synthesis and metrics engine behind a Kafka cluster dashboard.
//!
//! The [`engine::Engine`] fabricates a plausible Kafka world (clusters, topics, partitions, consumer groups,
//! records and time series) and keeps it consistent across mutations. The [`store`] module wraps it into
//! observable view-model stores a presentation layer can subscribe to.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> kafkalens::Result<()> {
//! use std::sync::Arc;
//!
//! use kafkalens::{engine::Engine, store::TopicStore};
//!
//! let engine = Arc::new(Engine::builder().build());
//! let topics = TopicStore::new(Arc::clone(&engine));
//! topics.fetch_topics("cluster-1").await?;
//! println!("{:?}", topics.state().topics);
//! # Ok(())
//! # }
//! ```
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    rust_2018_idioms,
    unsafe_code
)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]
pub mod backoff;
pub mod derive;
pub mod engine;
pub mod error;
pub mod group;
pub mod log_store;
pub mod metadata;
pub mod metrics;
pub mod random;
pub mod record;
pub mod store;
pub mod synth;
pub mod topic;
pub mod validation;

pub use error::{Error, Result, ResultVec};
