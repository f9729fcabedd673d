#![deny(missing_docs)]
//! Text extraction and chunking for the fluxbase document ingestion
//! pipeline (spec §4.2): `Document` content goes in, `Chunk`-shaped text
//! pieces come out, ready for embedding by `fluxbase-embedding`.

mod chunk;
mod extract;

pub use chunk::{ChunkError, ChunkStrategy, Chunker, RawChunk};
pub use extract::{mime_from_extension, ExtractError, OcrProvider, TextExtractor};
