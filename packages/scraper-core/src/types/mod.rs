//! Data types shared across the scrape engine.

pub mod item;
pub mod request;
pub mod stats;
