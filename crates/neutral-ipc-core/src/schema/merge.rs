//! Layering of a parsed schema into an immutable render context.

use super::model::{JsonMap, RequestContext, Schema};
use crate::render::RenderFlags;
use serde_json::Value;
use std::collections::BTreeMap;

/// Translation table threaded beside the variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Translations {
    current: String,
    table: BTreeMap<String, BTreeMap<String, String>>,
}

impl Translations {
    pub fn new(
        current: impl Into<String>,
        table: BTreeMap<String, BTreeMap<String, String>>,
    ) -> Self {
        Self {
            current: current.into(),
            table,
        }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Translate into the current locale. Unknown strings come back as-is.
    pub fn lookup<'a>(&'a self, source: &'a str) -> &'a str {
        self.lookup_in(&self.current, source)
    }

    pub fn lookup_in<'a>(&'a self, locale: &str, source: &'a str) -> &'a str {
        self.table
            .get(locale)
            .and_then(|strings| strings.get(source))
            .map(String::as_str)
            .unwrap_or(source)
    }
}

/// Everything the render collaborator sees for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderContext {
    vars: JsonMap,
    snippets: JsonMap,
    translations: Translations,
    request: RequestContext,
    flags: RenderFlags,
}

impl RenderContext {
    /// Merged variables: `inherit.declare`, then `inherit.snippets`, then
    /// `data`, later layers winning on collision.
    pub fn vars(&self) -> &JsonMap {
        &self.vars
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Resolve a dotted path such as `CONTEXT.GET.page`.
    pub fn lookup_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.vars.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// A named fragment from `inherit.snippets`.
    pub fn snippet(&self, name: &str) -> Option<&str> {
        self.snippets.get(name).and_then(Value::as_str)
    }

    pub fn translate<'a>(&'a self, source: &'a str) -> &'a str {
        self.translations.lookup(source)
    }

    pub fn translations(&self) -> &Translations {
        &self.translations
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn flags(&self) -> RenderFlags {
        self.flags
    }
}

impl Schema {
    /// Layer the schema into a render context. Pure.
    pub fn merge(&self) -> RenderContext {
        let data = self.data.to_map();
        let layers: [&JsonMap; 3] = [&self.inherit.declare, &self.inherit.snippets, &data];

        let mut vars = JsonMap::new();
        for layer in layers {
            for (key, value) in layer {
                vars.insert(key.clone(), value.clone());
            }
        }

        let locale = &self.inherit.locale;
        RenderContext {
            vars,
            snippets: self.inherit.snippets.clone(),
            translations: Translations::new(locale.current.clone(), locale.trans.clone()),
            request: self.data.context.clone(),
            flags: self.config.render_flags(),
        }
    }
}
