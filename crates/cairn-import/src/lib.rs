//! Importing byte streams into balanced file DAGs, and reading them back.
//!
//! A stream is split into fixed-size chunks ([`chunk`]), the chunks become
//! leaf nodes, and leaves are layered under interior nodes of bounded
//! fan-out until a single root remains ([`balanced`]). Concatenating the
//! leaves in link order reproduces the input ([`export`]).

pub mod balanced;
pub mod chunk;
pub mod error;
pub mod export;

pub use balanced::{child_for_offset, import, ImportConfig, ImportOutcome, DEFAULT_FANOUT};
pub use chunk::{Chunker, SizeChunker, DEFAULT_CHUNK_SIZE};
pub use error::{ImportError, ImportResult};
pub use export::export;
