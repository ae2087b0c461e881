use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::entity_link::{DEFAULT_ROUTE_PREFIX, EntityLinker};
use crate::error::{PayloadTooLargeSnafu, RenderError, RenderResult, SanitizeSnafu};
use crate::escape::escape_html;
use crate::markdown::{CommonMarkRenderer, MarkdownRenderer};
use crate::sanitize::{AllowListSanitizer, HtmlSanitizer};

/// Payloads above this size skip markdown conversion and render as escaped text.
pub const DEFAULT_MAX_MARKDOWN_BYTES: usize = 256 * 1024;

/// Render knobs persisted with the application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "default_true")]
    pub markdown: bool,
    #[serde(default = "default_true")]
    pub sanitize: bool,
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,
    #[serde(default = "default_max_markdown_bytes")]
    pub max_markdown_bytes: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            markdown: true,
            sanitize: true,
            route_prefix: default_route_prefix(),
            max_markdown_bytes: DEFAULT_MAX_MARKDOWN_BYTES,
        }
    }
}

/// Optional pipeline stages. A missing stage is configuration, not an error.
#[derive(Default)]
pub struct RenderCapabilities {
    pub markdown: Option<Box<dyn MarkdownRenderer>>,
    pub sanitizer: Option<Box<dyn HtmlSanitizer>>,
}

impl RenderCapabilities {
    /// pulldown-cmark followed by the ammonia allow-list.
    pub fn standard() -> Self {
        Self::default()
            .with_markdown(CommonMarkRenderer::new())
            .with_sanitizer(AllowListSanitizer::new())
    }

    pub fn with_markdown(mut self, renderer: impl MarkdownRenderer + 'static) -> Self {
        self.markdown = Some(Box::new(renderer));
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: impl HtmlSanitizer + 'static) -> Self {
        self.sanitizer = Some(Box::new(sanitizer));
        self
    }

    pub fn from_settings(settings: &RenderSettings) -> Self {
        let mut capabilities = Self::default();
        if settings.markdown {
            capabilities = capabilities.with_markdown(CommonMarkRenderer::new());
        }
        if settings.sanitize {
            capabilities = capabilities.with_sanitizer(AllowListSanitizer::new());
        }
        capabilities
    }
}

impl std::fmt::Debug for RenderCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCapabilities")
            .field("markdown", &self.markdown.as_ref().map(|m| m.name().to_string()))
            .field("sanitizer", &self.sanitizer.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

/// Markdown -> sanitize -> entity-link, in that order.
///
/// Linking runs last because it injects `class` and `target` attributes that a
/// later sanitizer pass would be entitled to strip.
#[derive(Debug)]
pub struct RenderPipeline {
    capabilities: RenderCapabilities,
    linker: EntityLinker,
    max_markdown_bytes: usize,
}

impl RenderPipeline {
    pub fn new(capabilities: RenderCapabilities, linker: EntityLinker) -> Self {
        Self {
            capabilities,
            linker,
            max_markdown_bytes: DEFAULT_MAX_MARKDOWN_BYTES,
        }
    }

    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self::new(
            RenderCapabilities::from_settings(settings),
            EntityLinker::new(&settings.route_prefix),
        )
        .with_max_markdown_bytes(settings.max_markdown_bytes)
    }

    pub fn with_max_markdown_bytes(mut self, limit: usize) -> Self {
        self.max_markdown_bytes = limit;
        self
    }

    pub fn capabilities(&self) -> &RenderCapabilities {
        &self.capabilities
    }

    pub fn linker(&self) -> &EntityLinker {
        &self.linker
    }

    /// Renders untrusted text into displayable HTML. Never fails: any error or
    /// panic inside a stage degrades to the escaped raw text.
    pub fn render(&self, raw: &str) -> String {
        match catch_unwind(AssertUnwindSafe(|| self.try_render(raw))) {
            Ok(Ok(html)) => html,
            Ok(Err(error)) => {
                tracing::warn!(
                    stage = error.stage(),
                    error = %error,
                    raw_len = raw.len(),
                    "render pipeline fell back to escaped text"
                );
                escape_html(raw)
            }
            Err(payload) => {
                let error = RenderError::Panicked {
                    stage: "render",
                    details: panic_details(payload.as_ref()),
                };
                tracing::error!(error = %error, raw_len = raw.len(), "render stage panicked");
                escape_html(raw)
            }
        }
    }

    /// The fallible pipeline behind [`RenderPipeline::render`].
    pub fn try_render(&self, raw: &str) -> RenderResult<String> {
        let html = self.convert_markdown(raw)?;
        let safe = self.sanitize(&html)?;
        Ok(self.linker.link_html(&safe))
    }

    fn convert_markdown(&self, raw: &str) -> RenderResult<String> {
        let Some(renderer) = self.capabilities.markdown.as_ref() else {
            return Ok(raw.to_string());
        };

        ensure!(
            raw.len() <= self.max_markdown_bytes,
            PayloadTooLargeSnafu {
                stage: "markdown-size-guard",
                len: raw.len(),
                limit: self.max_markdown_bytes,
            }
        );

        renderer.to_html(raw)
    }

    fn sanitize(&self, html: &str) -> RenderResult<String> {
        // Without an allow-list the reply is shown as plain text.
        let Some(sanitizer) = self.capabilities.sanitizer.as_ref() else {
            return SanitizeSnafu {
                stage: "sanitizer-unavailable",
                details: "no html sanitizer configured".to_string(),
            }
            .fail();
        };
        sanitizer.sanitize(html)
    }
}

impl Default for RenderPipeline {
    fn default() -> Self {
        Self::from_settings(&RenderSettings::default())
    }
}

fn panic_details(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn default_true() -> bool {
    true
}

fn default_route_prefix() -> String {
    DEFAULT_ROUTE_PREFIX.to_string()
}

fn default_max_markdown_bytes() -> usize {
    DEFAULT_MAX_MARKDOWN_BYTES
}
