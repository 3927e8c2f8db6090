//! Page parser implementations.

pub mod html;

pub use html::HtmlParser;
