//! tldw - Too Long; Didn't Watch
//!
//! Turns YouTube videos into transcripts and summaries. Requests are answered
//! from a cache, the resource store, a translation of a transcript in another
//! language, or a newly queued job; clients poll until the resource is done.
//!
//! # Architecture
//!
//! - `config` - Settings and prompt templates
//! - `store` - Shared key-value substrate (Redis, or in-process)
//! - `lock` - Distributed locks over the shared store
//! - `cache` - Read-through resource cache
//! - `queue` - Durable job queues and worker pools
//! - `resources` - Transcript and summary records (SQLite)
//! - `captions` - Caption providers (yt-dlp)
//! - `generation` - Text generation with credential rotation
//! - `summarizer` - Chunk-and-merge summarization
//! - `translation` - Inline translation
//! - `orchestrator` - Request handling and job handlers
//!
//! # Example
//!
//! ```rust,no_run
//! use tldw::config::Settings;
//! use tldw::orchestrator::Orchestrator;
//! use tldw::resources::ResourceKind;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::connect(&settings).await?;
//!
//!     let view = orchestrator.request(ResourceKind::Summary, "dQw4w9WgXcQ", "en").await?;
//!     println!("summary is {:?}", view.status);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod captions;
pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod language;
pub mod lock;
pub mod openai;
pub mod orchestrator;
pub mod queue;
pub mod resources;
pub mod store;
pub mod summarizer;
pub mod translation;

pub use error::{Result, TldwError};
