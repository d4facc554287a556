//! Typed three-layer schema and its validating parser.

use crate::config::IpcConfig;
use crate::error::SchemaError;
use crate::render::RenderFlags;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type JsonMap = serde_json::Map<String, Value>;

const BOOL_FLAGS: [&str; 6] = [
    "cache_on_post",
    "cache_on_get",
    "cache_on_cookies",
    "cache_disable",
    "disable_js",
    "filter_all",
];
const STRING_CONFIG: [&str; 2] = ["cache_prefix", "cache_dir"];
const CONTEXT_STRINGS: [&str; 2] = ["ROUTE", "HOST"];
const CONTEXT_MAPS: [&str; 7] = [
    "GET", "POST", "HEADERS", "FILES", "COOKIES", "SESSION", "ENV",
];

/// Behavior switches for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
    pub cache_on_post: bool,
    pub cache_on_get: bool,
    pub cache_on_cookies: bool,
    pub cache_disable: bool,
    pub disable_js: bool,
    pub filter_all: bool,
    /// Keys this crate does not interpret, passed through untouched.
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_prefix: IpcConfig::DEFAULT_CACHE_PREFIX.to_string(),
            cache_dir: None,
            cache_on_post: false,
            cache_on_get: false,
            cache_on_cookies: false,
            cache_disable: false,
            disable_js: false,
            filter_all: false,
            extra: JsonMap::new(),
        }
    }
}

impl Config {
    pub fn render_flags(&self) -> RenderFlags {
        RenderFlags {
            disable_js: self.disable_js,
            filter_all: self.filter_all,
        }
    }
}

/// Current locale plus translations keyed by locale, then source string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Locale {
    pub current: String,
    pub trans: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

impl Default for Locale {
    fn default() -> Self {
        Self {
            current: "en".to_string(),
            trans: BTreeMap::new(),
            extra: JsonMap::new(),
        }
    }
}

/// Reusable context layered beneath `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inherit {
    pub snippets: JsonMap,
    pub declare: JsonMap,
    pub locale: Locale,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// The `data.CONTEXT` block describing the originating request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestContext {
    #[serde(rename = "ROUTE")]
    pub route: String,
    #[serde(rename = "HOST")]
    pub host: String,
    #[serde(rename = "GET")]
    pub get: JsonMap,
    #[serde(rename = "POST")]
    pub post: JsonMap,
    #[serde(rename = "HEADERS")]
    pub headers: JsonMap,
    #[serde(rename = "FILES")]
    pub files: JsonMap,
    #[serde(rename = "COOKIES")]
    pub cookies: JsonMap,
    #[serde(rename = "SESSION")]
    pub session: JsonMap,
    #[serde(rename = "ENV")]
    pub env: JsonMap,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// Per-request variables plus the reserved `CONTEXT` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Data {
    #[serde(rename = "CONTEXT")]
    pub context: RequestContext,
    #[serde(flatten)]
    pub vars: JsonMap,
}

impl Data {
    /// The data layer as a plain mapping, `CONTEXT` included.
    pub fn to_map(&self) -> JsonMap {
        let mut map = self.vars.clone();
        let context = serde_json::to_value(&self.context).unwrap_or(Value::Null);
        map.insert("CONTEXT".to_string(), context);
        map
    }
}

/// The unit submitted with every render request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    pub config: Config,
    pub inherit: Inherit,
    pub data: Data,
}

impl Schema {
    /// Parse and validate a raw schema document.
    pub fn parse(raw: &[u8]) -> Result<Self, SchemaError> {
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(SchemaError::Malformed("empty schema".to_string()));
        }
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn parse_str(raw: &str) -> Result<Self, SchemaError> {
        Self::parse(raw.as_bytes())
    }

    /// Validate shapes on an already-decoded document.
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        let Value::Object(mut root) = value else {
            return Err(SchemaError::shape("schema", "expected a mapping"));
        };

        if let Some(config) = take_object(&mut root, "config", "config")? {
            for flag in BOOL_FLAGS {
                expect_kind(config, flag, "config", Value::is_boolean, "expected a boolean")?;
            }
            for key in STRING_CONFIG {
                expect_kind(config, key, "config", Value::is_string, "expected a string")?;
            }
        }

        if let Some(inherit) = take_object(&mut root, "inherit", "inherit")? {
            take_object(inherit, "snippets", "inherit.snippets")?;
            take_object(inherit, "declare", "inherit.declare")?;
            if let Some(locale) = take_object(inherit, "locale", "inherit.locale")? {
                expect_kind(locale, "current", "inherit.locale", Value::is_string, "expected a string")?;
                if let Some(trans) = take_object(locale, "trans", "inherit.locale.trans")? {
                    for (code, table) in trans.iter() {
                        let path = format!("inherit.locale.trans.{}", code);
                        let Value::Object(table) = table else {
                            return Err(SchemaError::shape(path, "expected a mapping"));
                        };
                        if let Some((source, _)) = table.iter().find(|(_, v)| !v.is_string()) {
                            return Err(SchemaError::shape(
                                format!("{}.{}", path, source),
                                "expected a string",
                            ));
                        }
                    }
                }
            }
        }

        if let Some(data) = take_object(&mut root, "data", "data")? {
            if let Some(context) = take_object(data, "CONTEXT", "data.CONTEXT")? {
                for slot in CONTEXT_STRINGS {
                    expect_kind(context, slot, "data.CONTEXT", Value::is_string, "expected a string")?;
                }
                for slot in CONTEXT_MAPS {
                    take_object(context, slot, &format!("data.CONTEXT.{}", slot))?;
                }
            }
        }

        serde_json::from_value(Value::Object(root))
            .map_err(|e| SchemaError::shape("schema", e.to_string()))
    }

    /// Serialize to the wire JSON form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn context(&self) -> &RequestContext {
        &self.data.context
    }
}

/// Check that `map[key]` is a mapping. A `null` counts as absent and is
/// removed so serde falls back to the default.
fn take_object<'a>(
    map: &'a mut JsonMap,
    key: &str,
    path: &str,
) -> Result<Option<&'a mut JsonMap>, SchemaError> {
    if matches!(map.get(key), Some(Value::Null)) {
        map.remove(key);
        return Ok(None);
    }
    match map.get_mut(key) {
        None => Ok(None),
        Some(Value::Object(inner)) => Ok(Some(inner)),
        Some(other) => Err(SchemaError::shape(
            path,
            format!("expected a mapping, got {}", kind_name(other)),
        )),
    }
}

fn expect_kind(
    map: &mut JsonMap,
    key: &str,
    parent: &str,
    check: fn(&Value) -> bool,
    message: &str,
) -> Result<(), SchemaError> {
    match map.get(key) {
        None => Ok(()),
        Some(Value::Null) => {
            map.remove(key);
            Ok(())
        }
        Some(value) if check(value) => Ok(()),
        Some(other) => Err(SchemaError::shape(
            format!("{}.{}", parent, key),
            format!("{}, got {}", message, kind_name(other)),
        )),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
