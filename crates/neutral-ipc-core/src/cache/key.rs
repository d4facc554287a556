//! Cache eligibility and cache key resolution.
//!
//! Pure functions of the request's `config` and `CONTEXT`: no store access,
//! no hidden state.

use crate::render::TemplateRef;
use crate::schema::{Config, JsonMap, RequestContext};
use serde_json::Value;

/// Whether a render may be cached, and under which key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheVerdict {
    Disabled,
    Cacheable(String),
}

impl CacheVerdict {
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheVerdict::Disabled => None,
            CacheVerdict::Cacheable(key) => Some(key),
        }
    }
}

/// Decide cacheability for one request.
///
/// `cache_disable` wins over everything. A call is POST-shaped when it
/// carries POST data and GET-shaped when it carries query data or no POST
/// data; it is eligible when a matching `cache_on_*` flag is set. A call
/// carrying cookies is only eligible with `cache_on_cookies`, and then the
/// cookies become part of the key.
///
/// The key names the template kind (`path:` or `text:`) so a file and an
/// inline template with the same string never share an entry.
pub fn evaluate(config: &Config, template: &TemplateRef, context: &RequestContext) -> CacheVerdict {
    if config.cache_disable {
        return CacheVerdict::Disabled;
    }

    let post_shaped = !context.post.is_empty();
    let get_shaped = !context.get.is_empty() || context.post.is_empty();

    let use_post = post_shaped && config.cache_on_post;
    let use_get = get_shaped && config.cache_on_get;
    if !use_post && !use_get {
        return CacheVerdict::Disabled;
    }

    if !context.cookies.is_empty() && !config.cache_on_cookies {
        return CacheVerdict::Disabled;
    }

    let mut sections: Vec<(&str, &JsonMap)> = Vec::with_capacity(3);
    if use_get {
        sections.push(("GET", &context.get));
    }
    if use_post {
        sections.push(("POST", &context.post));
    }
    if config.cache_on_cookies {
        sections.push(("COOKIES", &context.cookies));
    }

    CacheVerdict::Cacheable(build_key(&config.cache_prefix, template, &sections))
}

fn build_key(prefix: &str, template: &TemplateRef, sections: &[(&str, &JsonMap)]) -> String {
    let reference = template.as_str();
    let mut key = String::with_capacity(prefix.len() + reference.len() + 32);
    key.push_str(prefix);
    key.push('|');
    key.push_str(template.kind());
    key.push(':');
    key.push_str(reference);
    for (name, map) in sections {
        key.push('|');
        key.push_str(name);
        key.push('=');
        write_canonical_map(map, &mut key);
    }
    key
}

/// Append `value` as JSON with mapping keys sorted at every depth.
pub fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_map(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_canonical_map(map: &JsonMap, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(&map[key.as_str()], out);
    }
    out.push('}');
}
