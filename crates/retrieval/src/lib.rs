//! Question answering over the indexed build history.
//!
//! The flow mirrors a classic retrieval-augmented pipeline: embed the
//! question with the same model the index was built with, fetch the
//! nearest build summaries, assemble them into an analyst prompt, and
//! hand that to a text generator. The answer is whatever follows the
//! final `Your Answer:` cue in the completion, falling back to the raw
//! completion when the model drops the cue.

mod engine;
mod error;
mod generator;
mod prompt;

pub use engine::{
    Answer, BuildStats, Health, RetrievalEngine, RetrievedBuild, DEFAULT_TOP_K, MAX_ANSWER_TOKENS,
};
pub use error::{Result, RetrievalError};
pub use generator::{HttpGenerator, TextGenerator};
pub use prompt::{build_prompt, extract_answer, CueOutcome, ANSWER_CUE};
