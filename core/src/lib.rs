pub mod batch;
pub mod bookkeeper;
pub mod error;
pub mod extract;
pub mod index;
pub mod merge;
pub mod partial;
pub mod persist;
pub mod query;
pub mod scoring;
pub mod source;
pub mod tokenizer;
pub mod writer;

pub use error::{IndexError, Result};
pub use index::*;
