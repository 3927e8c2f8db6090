//! Model client implementations.

pub mod openai;

pub use openai::OpenAIModel;
