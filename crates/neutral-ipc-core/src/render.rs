//! Render collaborator interface.
//!
//! The template engine is a black box to this crate. A server is built
//! around any `Renderer`; the orchestrator hands it the template reference,
//! the validated schema JSON and the merged context (flags included).

use crate::schema::RenderContext;
use std::fmt;

/// What a request asks the engine to render.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateRef {
    /// A template file, resolved by the renderer.
    Path(String),
    /// Template source sent inline.
    Inline(String),
}

impl TemplateRef {
    pub fn path(path: impl Into<String>) -> Self {
        TemplateRef::Path(path.into())
    }

    pub fn inline(source: impl Into<String>) -> Self {
        TemplateRef::Inline(source.into())
    }

    /// The reference string: a path or the template source.
    pub fn as_str(&self) -> &str {
        match self {
            TemplateRef::Path(s) | TemplateRef::Inline(s) => s,
        }
    }

    /// Tag naming the reference kind in cache keys.
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateRef::Path(_) => "path",
            TemplateRef::Inline(_) => "text",
        }
    }

    pub fn is_path(&self) -> bool {
        matches!(self, TemplateRef::Path(_))
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateRef::Path(path) => write!(f, "{}", path),
            TemplateRef::Inline(source) => write!(f, "<inline {} bytes>", source.len()),
        }
    }
}

/// Switches from `config` that the engine honors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderFlags {
    pub disable_js: bool,
    pub filter_all: bool,
}

/// Outcome of one render call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderResult {
    Success(String),
    Failure {
        code: u16,
        text: String,
        detail: String,
    },
}

impl RenderResult {
    pub fn failure(code: u16, text: impl Into<String>, detail: impl Into<String>) -> Self {
        RenderResult::Failure {
            code,
            text: text.into(),
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::failure(404, "Not Found", detail)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RenderResult::Success(_))
    }
}

/// The template engine seen from the orchestrator.
///
/// `schema_json` is the request's schema exactly as received, already
/// validated. Engines that do their own merging take it from there; the
/// rest read `context`, whose `flags()` carry `disable_js` and `filter_all`.
///
/// Implementations doing CPU-bound work should move it off the async
/// workers (for example with `tokio::task::spawn_blocking`).
#[async_trait::async_trait]
pub trait Renderer: Send + Sync + 'static {
    async fn render(
        &self,
        template: &TemplateRef,
        schema_json: &str,
        context: &RenderContext,
    ) -> RenderResult;
}
