//! Query-time retrieval for Strata.
//!
//! [`QueryEngine`] embeds the query, searches the leaf vectors, turns the
//! hits into passages ([`AutoMerger`] for hierarchical indexes,
//! [`WindowExpander`] for sentence windows), optionally reranks them with a
//! [`Reranker`] and hands the best to a generator through
//! [`prompt::build_prompt`].

pub mod automerge;
pub mod deadline;
pub mod engine;
pub mod prompt;
pub mod rerank;
pub mod window;

pub use automerge::{to_passages, AutoMerger, MergedNode};
pub use deadline::with_deadline;
pub use engine::{Answer, QueryEngine, StreamingAnswer};
pub use prompt::{build_prompt, Prompt, QA_TEMPLATE};
pub use rerank::Reranker;
pub use window::WindowExpander;
