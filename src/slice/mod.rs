//! Slice transport: splitting oversized messages into chunks and
//! reassembling them on the far side.

pub mod chunk;
pub mod reassembly;

pub use chunk::{split, Chunk, KIND_BINARY, KIND_TEXT, MAX_CHUNKS, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use reassembly::{NameAllocator, Reassembler, DEFAULT_MAX_MESSAGE_SIZE};
