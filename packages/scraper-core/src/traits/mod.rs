//! Seams between the engine and its collaborators.
//!
//! The engine only ever talks to these traits. Default implementations live
//! in `fetchers`, `parsers`, `ai` and `agents`; tests swap in the mocks from
//! [`crate::testing`].

pub mod extractor;
pub mod fetcher;
pub mod model;
pub mod parser;
pub mod screenshot;
