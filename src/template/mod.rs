//! Template storage and rendering.
//!
//! Provides:
//! - A locale model with the implicit bindings templates may reference
//! - Pluggable `${...}` expression evaluation
//! - The single-pass renderer that picks one interpolation rule per template
//! - An in-memory template store keyed by template id

mod engine;
mod expression;
mod locale;
mod store;

pub use engine::{value_to_text, TemplateRenderer};
pub use expression::{lookup_path, ExpressionError, ExpressionEvaluator, PathExpressionEvaluator};
pub use locale::Locale;
pub use store::{
    ResolvedTemplate, Template, TemplateError, TemplateResult, TemplateSource, TemplateStore,
    UpdateTemplateRequest,
};
