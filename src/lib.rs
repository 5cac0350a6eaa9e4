//! docslice - a byte-offset documentation index with targeted extraction.
//!
//! docslice scans a directory of markdown (and, for some profiles, code)
//! files once, recording where every section, domain entity and fenced
//! code example lives as a `(source_file, byte_offset, byte_length)`
//! triple. Queries then read only the matching byte range instead of
//! whole files.
//!
//! # Quick start
//!
//! ```no_run
//! use docslice::{DataDir, Engine, EngineConfig, Profile};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config = EngineConfig::from_data_dir(&data_dir, None, Profile::Candlestick, vec![]);
//! let mut engine = Engine::new(config).unwrap();
//!
//! for hit in engine.searcher().unwrap().search("morning star", None, 5) {
//!     println!("{} ({:.3})", hit.id, hit.score);
//! }
//!
//! let hammer = engine.extractor().unwrap().extract("pat/hammer", false).unwrap();
//! println!("{}", hammer.content);
//! ```

pub mod batch;
pub mod data_dir;
pub mod detect;
pub mod engine;
pub mod entry_id;
pub mod error;
pub mod extractor;
pub mod indexer;
pub mod markdown;
pub mod mcp;
pub mod persist;
pub mod profile;
pub mod schema;
pub mod searcher;
pub mod text_util;
pub mod usage;
pub mod walker;

pub use data_dir::DataDir;
pub use engine::{Engine, EngineConfig, IndexStatus};
pub use error::{Error, Result};
pub use extractor::{Extraction, Extractor};
pub use indexer::Indexer;
pub use profile::Profile;
pub use schema::{EntityKind, Index};
pub use searcher::Searcher;
pub use usage::UsageLog;
