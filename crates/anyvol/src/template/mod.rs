//! `{{ placeholder }}` rendering of nested values.
//!
//! A placeholder is a dotted path into the context, optionally followed by
//! a `default` filter:
//!
//! ```text
//! {{ options.access_key }}
//! {{ options.fstype | default('auto') }}
//! ```
//!
//! Rendering is pure: the same value and context always produce the same
//! output, and nothing outside the returned value is touched.

mod value;

pub use value::Value;

use anyvol_common::TemplateError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Render a value against `context`.
///
/// Strings are interpolated, sequences render element-wise and mappings
/// render value-by-value (keys are left as-is). Numbers and booleans pass
/// through unchanged; null is rejected.
pub fn render(value: &Value, context: &Value) -> Result<Value, TemplateError> {
    match value {
        Value::String(s) => render_str(s, context).map(Value::String),
        Value::Seq(items) => items
            .iter()
            .map(|item| render(item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Seq),
        Value::Map(map) => map
            .iter()
            .map(|(key, item)| Ok((key.clone(), render(item, context)?)))
            .collect::<Result<_, TemplateError>>()
            .map(Value::Map),
        Value::Bool(_) | Value::Integer(_) | Value::Float(_) => Ok(value.clone()),
        Value::Null => Err(TemplateError::Unsupported {
            kind: value.kind().to_string(),
        }),
    }
}

/// Interpolate every placeholder in `template`.
pub fn render_str(template: &str, context: &Value) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let end = after.find(CLOSE).ok_or_else(|| TemplateError::Syntax {
            template: template.to_string(),
            reason: "unterminated placeholder".to_string(),
        })?;
        out.push_str(&evaluate(after[..end].trim(), context, template)?);
        rest = &after[end + CLOSE.len()..];
    }

    out.push_str(rest);
    Ok(out)
}

fn evaluate(expr: &str, context: &Value, template: &str) -> Result<String, TemplateError> {
    let syntax = |reason: String| TemplateError::Syntax {
        template: template.to_string(),
        reason,
    };

    let (path, filter) = match expr.split_once('|') {
        Some((path, filter)) => (path.trim(), Some(filter.trim())),
        None => (expr, None),
    };

    if path.is_empty() {
        return Err(syntax("empty placeholder".to_string()));
    }
    if !path.split('.').all(is_identifier) {
        return Err(syntax(format!("invalid variable path '{path}'")));
    }

    let fallback = filter
        .map(|f| parse_default(f).ok_or_else(|| syntax(format!("unknown filter '{f}'"))))
        .transpose()?;

    match context.lookup(path) {
        Some(Value::Seq(_) | Value::Map(_)) => Err(TemplateError::NotScalar {
            path: path.to_string(),
        }),
        Some(value) => match (value.as_scalar_string(), fallback) {
            (Some(s), _) => Ok(s),
            (None, Some(default)) => Ok(default.to_string()),
            (None, None) => Err(undefined(path, template)),
        },
        None => fallback
            .map(str::to_string)
            .ok_or_else(|| undefined(path, template)),
    }
}

fn undefined(path: &str, template: &str) -> TemplateError {
    TemplateError::Undefined {
        path: path.to_string(),
        template: template.to_string(),
    }
}

fn is_identifier(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse `default('text')` or `default("text")`, returning the literal.
fn parse_default(filter: &str) -> Option<&str> {
    let args = filter
        .strip_prefix("default")?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')?
        .trim();
    ['\'', '"'].iter().find_map(|quote| {
        args.strip_prefix(*quote)
            .and_then(|inner| inner.strip_suffix(*quote))
    })
}
