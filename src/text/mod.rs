//! Text side of the pipeline: characters in, synthesis-ready utterances out.

pub mod aggregator;
pub mod chars;
pub mod cleanup;
pub mod segmenter;

pub use aggregator::{BufferedSeconds, ChunkAggregator, SentenceFloor};
pub use chars::{CharHooks, CharIterator, SourceError, TextSource};
pub use segmenter::{
    CharStream, Segmenter, SegmenterOptions, SentenceStream, StreamSegmenter, Tokenizer,
};
