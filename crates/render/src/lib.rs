#![deny(unsafe_code)]

//! Turns untrusted assistant replies into displayable HTML.
//!
//! The pipeline converts markdown, strips unsafe markup and finally rewrites
//! record references such as `Sales Invoice SINV-2023-001` into desk links.

/// Record reference detection and desk link rewriting.
pub mod entity_link;
/// Render stage failures.
pub mod error;
/// Text escaping for HTML content and attributes.
pub mod escape;
/// Markdown to HTML conversion.
pub mod markdown;
/// Stage composition with escaped-text fallback.
pub mod pipeline;
/// Allow-list HTML sanitization.
pub mod sanitize;

pub use entity_link::{EntityLinker, EntityReference};
pub use error::{RenderError, RenderResult};
pub use escape::escape_html;
pub use markdown::{CommonMarkRenderer, MarkdownRenderer};
pub use pipeline::{RenderCapabilities, RenderPipeline, RenderSettings};
pub use sanitize::{AllowListSanitizer, HtmlSanitizer};
