//! Node.js `fs` module for Otter.
//!
//! This crate exposes a Node-shaped file system API on top of a pluggable
//! engine. The engine does the real I/O; this crate translates Node open
//! flags and numeric modes into the engine's vocabulary and adapts the
//! engine's push-style file data into backpressure-aware read streams.
//!
//! # Modules
//!
//! - `fs` - The [`NodeFs`] facade (async and `_sync` operations)
//! - `stream` - Readable file streams (`createReadStream`)
//! - `engine` - The [`FsEngine`] capability an embedder supplies
//! - `memory` - An in-memory engine
//! - `mode` / `flags` - Mode and open-flag translation
//!
//! # Example
//!
//! ```no_run
//! use otter_node_fs::{FsConfig, NodeFs, ReadResult};
//!
//! # async fn demo() -> otter_node_fs::FsResult<()> {
//! let fs = NodeFs::in_memory(FsConfig::default());
//! fs.write_file("/hello.txt", "hello").await?;
//!
//! let text = fs.read_file("/hello.txt", Some("utf8")).await?;
//! assert_eq!(text, ReadResult::String("hello".into()));
//!
//! let mut stream = fs.create_read_stream("/hello.txt", fs.read_stream_options())?;
//! assert_eq!(stream.read_to_end().await?, "hello");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod flags;
pub mod fs;
pub mod memory;
pub mod mode;
pub mod stream;

pub use config::FsConfig;
pub use encoding::Encoding;
pub use engine::{ChunkSink, EngineFile, FileHandle, FsEngine, SourceEvent, Stats};
pub use error::{FsError, FsResult, HandleError};
pub use flags::OpenFlags;
pub use fs::{Fd, NodeFs, ReadResult};
pub use memory::{MemoryEngine, MemoryFile};
pub use mode::ModeTable;
pub use stream::{ReadStream, ReadStreamOptions, StreamEvent, StreamState};
