//! Three-layer request schema.
//!
//! A schema carries `config` (behavior switches), `inherit` (snippets,
//! declared variables, locale) and `data` (request variables plus the
//! reserved `CONTEXT` block). `Schema::parse` validates shapes;
//! `Schema::merge` layers it into a `RenderContext`.

mod merge;
mod model;

pub use merge::{RenderContext, Translations};
pub use model::{Config, Data, Inherit, JsonMap, Locale, RequestContext, Schema};
