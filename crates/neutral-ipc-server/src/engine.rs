//! Template engine adapter.
//!
//! Renders through `neutralts`, the Neutral TS engine. Each render builds
//! a fresh `Template`, merges the request's schema into the engine's
//! defaults and renders on the blocking pool. Path references are confined
//! to the configured template root before the engine sees them.

use neutral_ipc::{RenderContext, RenderResult, Renderer, TemplateRef};
use neutralts::Template;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Directory that path templates are resolved against.
#[derive(Debug, Clone)]
pub struct TemplateRoot {
    root: PathBuf,
}

impl TemplateRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a path reference to a file under the root.
    ///
    /// Absolute references must name a location under the root; either way
    /// only plain components are allowed below it, so `..` can never climb
    /// out.
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let path = Path::new(reference);
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root).ok()?
        } else {
            path
        };
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

/// `Renderer` backed by the Neutral TS template engine.
#[derive(Debug, Clone)]
pub struct NeutralRenderer {
    root: TemplateRoot,
}

impl NeutralRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: TemplateRoot::new(root),
        }
    }

    fn render_blocking(&self, template: &TemplateRef, schema_json: &str) -> RenderResult {
        let source = match template {
            TemplateRef::Inline(_) => None,
            TemplateRef::Path(reference) => {
                let Some(path) = self.root.resolve(reference) else {
                    return RenderResult::failure(
                        403,
                        "Forbidden",
                        format!("template outside root: {}", reference),
                    );
                };
                if !path.is_file() {
                    return RenderResult::not_found(format!("template not found: {}", reference));
                }
                Some(path)
            }
        };
        let source_str = source.as_ref().map(|p| p.to_string_lossy().into_owned());

        let mut engine = match Template::new() {
            Ok(engine) => engine,
            Err(e) => {
                return RenderResult::failure(
                    500,
                    "Internal Server Error",
                    format!("engine init failed: {}", e),
                )
            }
        };
        if let Err(e) = engine.merge_schema_str(schema_json) {
            return RenderResult::failure(400, "Bad Request", format!("schema rejected: {}", e));
        }

        match (&source, &source_str) {
            (Some(path), Some(path_str)) => {
                if let Err(e) = engine.set_src_path(path_str) {
                    return RenderResult::failure(
                        500,
                        "Internal Server Error",
                        format!("cannot load {}: {}", path.display(), e),
                    );
                }
            }
            _ => engine.set_src_str(template.as_str()),
        }

        let body = engine.render();
        if engine.has_error() {
            debug!("Template {} rendered with errors", template);
        }

        let code = engine.get_status_code().trim().parse::<u16>().unwrap_or(500);
        if code == 200 {
            RenderResult::Success(body)
        } else {
            RenderResult::failure(
                code,
                engine.get_status_text().to_string(),
                engine.get_status_param().to_string(),
            )
        }
    }
}

#[async_trait::async_trait]
impl Renderer for NeutralRenderer {
    async fn render(
        &self,
        template: &TemplateRef,
        schema_json: &str,
        context: &RenderContext,
    ) -> RenderResult {
        debug!("Rendering {} (flags {:?})", template, context.flags());
        let renderer = self.clone();
        let template = template.clone();
        let schema_json = schema_json.to_string();
        match tokio::task::spawn_blocking(move || renderer.render_blocking(&template, &schema_json))
            .await
        {
            Ok(result) => result,
            Err(e) => RenderResult::failure(500, "Internal Server Error", e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neutral_ipc::Schema;
    use tempfile::TempDir;

    const EMPTY_SCHEMA: &str = "{}";

    async fn render(renderer: &NeutralRenderer, template: TemplateRef, schema_json: &str) -> RenderResult {
        let context = Schema::parse_str(schema_json).unwrap().merge();
        renderer.render(&template, schema_json, &context).await
    }

    /// A root directory with a secret file beside it.
    fn create_test_env() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("templates");
        std::fs::create_dir_all(root.join("pages")).unwrap();
        std::fs::write(root.join("pages/home.ntpl"), "<h1>{:;title:}</h1>").unwrap();
        std::fs::write(temp_dir.path().join("secret.txt"), "TOP-SECRET").unwrap();
        (temp_dir, root)
    }

    #[test]
    fn test_resolve_under_root() {
        let root = TemplateRoot::new("/srv/tpl");
        assert_eq!(
            root.resolve("pages/home.ntpl"),
            Some(PathBuf::from("/srv/tpl/pages/home.ntpl"))
        );
        assert_eq!(
            root.resolve("./index.ntpl"),
            Some(PathBuf::from("/srv/tpl/./index.ntpl"))
        );
        assert_eq!(
            root.resolve("/srv/tpl/pages/home.ntpl"),
            Some(PathBuf::from("/srv/tpl/pages/home.ntpl"))
        );
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let root = TemplateRoot::new("/srv/tpl");
        assert_eq!(root.resolve("../etc/passwd"), None);
        assert_eq!(root.resolve("pages/../../etc/passwd"), None);
        assert_eq!(root.resolve("/etc/passwd"), None);
        assert_eq!(root.resolve("/srv/tpl/../secret.txt"), None);
        assert_eq!(root.resolve("/srv/tpl/pages/../../secret.txt"), None);
        assert_eq!(root.resolve("/srv/tplx/index.ntpl"), None);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let (_temp_dir, root) = create_test_env();
        let renderer = NeutralRenderer::new(&root);
        let result = render(&renderer, TemplateRef::path("nope.ntpl"), EMPTY_SCHEMA).await;
        match result {
            RenderResult::Failure { code, detail, .. } => {
                assert_eq!(code, 404);
                assert!(detail.contains("nope.ntpl"));
            }
            other => panic!("Expected failure, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_directory_is_not_found() {
        let (_temp_dir, root) = create_test_env();
        let renderer = NeutralRenderer::new(&root);
        let result = render(&renderer, TemplateRef::path("pages"), EMPTY_SCHEMA).await;
        assert!(matches!(result, RenderResult::Failure { code: 404, .. }));
    }

    #[tokio::test]
    async fn test_traversal_is_forbidden() {
        let (_temp_dir, root) = create_test_env();
        let renderer = NeutralRenderer::new(&root);

        for reference in ["../secret.txt", "/etc/passwd"] {
            let result = render(&renderer, TemplateRef::path(reference), EMPTY_SCHEMA).await;
            assert!(
                matches!(result, RenderResult::Failure { code: 403, .. }),
                "{} should be forbidden, got {:?}",
                reference,
                result
            );
        }
    }

    #[tokio::test]
    async fn test_absolute_path_climbing_out_of_root_is_forbidden() {
        let (_temp_dir, root) = create_test_env();
        let renderer = NeutralRenderer::new(&root);

        let escape = format!("{}/../secret.txt", root.display());
        let result = render(&renderer, TemplateRef::path(escape), EMPTY_SCHEMA).await;
        match result {
            RenderResult::Failure { code, .. } => assert_eq!(code, 403),
            RenderResult::Success(body) => panic!("read outside the root: {}", body),
        }
    }

    #[tokio::test]
    async fn test_file_template_renders_data() {
        let (_temp_dir, root) = create_test_env();
        let renderer = NeutralRenderer::new(&root);
        let result = render(
            &renderer,
            TemplateRef::path("pages/home.ntpl"),
            r#"{"data": {"title": "Welcome"}}"#,
        )
        .await;
        match result {
            RenderResult::Success(body) => assert!(body.contains("<h1>Welcome</h1>"), "{}", body),
            other => panic!("Expected success, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inline_template_renders() {
        let renderer = NeutralRenderer::new(".");
        let result = render(
            &renderer,
            TemplateRef::inline("<p>{:;name:}</p>"),
            r#"{"data": {"name": "Ana"}}"#,
        )
        .await;
        match result {
            RenderResult::Success(body) => assert!(body.contains("<p>Ana</p>"), "{}", body),
            other => panic!("Expected success, got: {:?}", other),
        }
    }
}
