//! # spawn-index
//!
//! Crawl a filesystem tree, extract structured metadata from every eligible
//! file, and publish the records in bounded batches to a remote search index.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ PathFilter │──▶│  Extractor   │──▶│ RecordBatcher│──▶│IndexPublisher│
//! │  walkdir   │   │   Registry   │   │   batches    │   │ retry/backoff│
//! └────────────┘   └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                                            │                  │
//!                                            ▼                  ▼
//!                                      ┌───────────┐     ┌─────────────┐
//!                                      │ RunReport │     │ SearchIndex │
//!                                      └───────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use spawn_index::config::load_config;
//! use spawn_index::crawler::Crawler;
//! use spawn_index::publish::{BearerToken, GlobusSearchIndex, IndexPublisher, RetryPolicy};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = load_config("spawn.toml".as_ref())?;
//! let index = GlobusSearchIndex::from_config(&config.publish, BearerToken::new("..."))?;
//! let publisher = IndexPublisher::new(Arc::new(index), RetryPolicy::from_config(&config.publish));
//! let report = Crawler::new(config)?
//!     .with_publisher(publisher)
//!     .crawl("/data".as_ref())
//!     .await?;
//! println!("{} files indexed", report.counts().succeeded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Per-stage error types |
//! | [`models`] | File entries, records, outcomes, batches |
//! | [`filter`] | Include/exclude, depth, dotfile, and symlink rules |
//! | [`extract`] | Extractor trait, registry, and built-in extractors |
//! | [`batch`] | Size-bounded record batching |
//! | [`publish`] | Search index transport and retrying publisher |
//! | [`crawler`] | The walk → extract → record → publish pipeline |
//! | [`report`] | Run report, counts, per-file and per-batch outcomes |
//! | [`persist`] | Optional local JSON copies of records |
//! | [`progress`] | Progress reporting on stderr |

pub mod batch;
pub mod config;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod filter;
pub mod models;
pub mod persist;
pub mod progress;
pub mod publish;
pub mod report;
