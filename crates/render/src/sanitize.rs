use ammonia::Builder;

use crate::error::RenderResult;

/// Attributes allowed on every element on top of ammonia's defaults.
pub const EXTRA_GENERIC_ATTRIBUTES: &[&str] = &["class"];
/// Attributes allowed on anchors on top of ammonia's defaults.
pub const EXTRA_ANCHOR_ATTRIBUTES: &[&str] = &["target"];

/// Strips unsafe markup from an HTML fragment.
pub trait HtmlSanitizer: Send + Sync {
    fn name(&self) -> &str;
    fn sanitize(&self, html: &str) -> RenderResult<String>;
}

/// Allow-list sanitizer backed by ammonia.
///
/// Keeps ammonia's default tag set (scripts, styles and every `on*` handler are
/// dropped) and additionally permits `class` everywhere and `target` on `<a>`,
/// which document links rely on.
pub struct AllowListSanitizer {
    builder: Builder<'static>,
}

impl AllowListSanitizer {
    pub fn new() -> Self {
        let mut builder = Builder::default();
        builder
            .add_generic_attributes(EXTRA_GENERIC_ATTRIBUTES)
            .add_tag_attributes("a", EXTRA_ANCHOR_ATTRIBUTES);
        Self { builder }
    }
}

impl Default for AllowListSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AllowListSanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllowListSanitizer").finish_non_exhaustive()
    }
}

impl HtmlSanitizer for AllowListSanitizer {
    fn name(&self) -> &str {
        "ammonia"
    }

    fn sanitize(&self, html: &str) -> RenderResult<String> {
        Ok(self.builder.clean(html).to_string())
    }
}
