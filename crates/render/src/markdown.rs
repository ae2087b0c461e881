use pulldown_cmark::{Options, Parser, html};

use crate::error::RenderResult;

/// Converts raw assistant text into an HTML fragment.
pub trait MarkdownRenderer: Send + Sync {
    fn name(&self) -> &str;
    fn to_html(&self, raw: &str) -> RenderResult<String>;
}

/// CommonMark renderer backed by pulldown-cmark.
///
/// Raw HTML blocks in the input are forwarded untouched; the sanitizer step is
/// responsible for stripping anything unsafe.
#[derive(Debug, Clone, Copy)]
pub struct CommonMarkRenderer {
    options: Options,
}

impl CommonMarkRenderer {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_TASKLISTS);
        Self { options }
    }

    pub fn with_options(options: Options) -> Self {
        Self { options }
    }
}

impl Default for CommonMarkRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownRenderer for CommonMarkRenderer {
    fn name(&self) -> &str {
        "pulldown-cmark"
    }

    fn to_html(&self, raw: &str) -> RenderResult<String> {
        let parser = Parser::new_ext(raw, self.options);
        let mut out = String::with_capacity(raw.len() + raw.len() / 2);
        html::push_html(&mut out, parser);
        Ok(out)
    }
}
