pub mod chunker;
pub mod storage;

pub use chunker::{Chunk, ChunkMetadata, Chunker, Document};
pub use storage::{LocalStorage, StorageGateway};
