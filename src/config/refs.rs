//! Cross-resource references inside property values.
//!
//! A string property may embed `${<logical_id>}`, which resolves to the
//! remote id of that resource, or `${<logical_id>.<attribute>}`, which
//! resolves to one of its provider outputs. A string that consists of exactly
//! one reference is replaced by the referenced value as-is; otherwise the
//! value is interpolated as text.

use serde_json::Value;
use std::collections::BTreeSet;
use std::ops::Range;

use super::spec::Properties;

/// A parsed `${...}` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    /// Referenced logical id.
    pub logical_id: String,
    /// Output attribute, `None` for the remote id.
    pub attribute: Option<String>,
}

impl Reference {
    /// Returns true if this reference targets the remote id.
    #[must_use]
    pub fn is_remote_id(&self) -> bool {
        matches!(self.attribute.as_deref(), None | Some("id" | "remote_id"))
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.attribute {
            Some(attr) => write!(f, "${{{}.{attr}}}", self.logical_id),
            None => write!(f, "${{{}}}", self.logical_id),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn parse_body(body: &str) -> Option<Reference> {
    let (id, attribute) = match body.split_once('.') {
        Some((id, attr)) => (id, Some(attr)),
        None => (body, None),
    };
    if id.is_empty() || !id.chars().all(is_ident_char) {
        return None;
    }
    if let Some(attr) = attribute
        && (attr.is_empty() || !attr.chars().all(is_ident_char))
    {
        return None;
    }
    Some(Reference {
        logical_id: id.to_string(),
        attribute: attribute.map(str::to_string),
    })
}

/// Scans a string for references, returning each with its byte range.
///
/// Malformed `${...}` sequences are left alone and treated as literal text.
#[must_use]
pub fn parse_references(text: &str) -> Vec<(Range<usize>, Reference)> {
    let mut found = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find("${") {
        let start = cursor + offset;
        let body_start = start + 2;
        let Some(close) = text[body_start..].find('}') else {
            break;
        };
        let end = body_start + close + 1;
        if let Some(reference) = parse_body(&text[body_start..end - 1]) {
            found.push((start..end, reference));
            cursor = end;
        } else {
            cursor = body_start;
        }
    }

    found
}

/// Collects every reference contained in a JSON value.
pub fn collect_references(value: &Value, out: &mut BTreeSet<Reference>) {
    match value {
        Value::String(s) => out.extend(parse_references(s).into_iter().map(|(_, r)| r)),
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_references(v, out)),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Returns the logical ids referenced anywhere in a property map.
#[must_use]
pub fn referenced_ids(properties: &Properties) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    for value in properties.values() {
        collect_references(value, &mut refs);
    }
    refs.into_iter().map(|r| r.logical_id).collect()
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolves every reference in a value.
///
/// # Errors
///
/// Returns the first reference `lookup` could not resolve.
pub fn substitute_value<F>(value: &Value, lookup: &F) -> std::result::Result<Value, Reference>
where
    F: Fn(&Reference) -> Option<Value>,
{
    match value {
        Value::String(s) => {
            let refs = parse_references(s);
            if refs.is_empty() {
                return Ok(value.clone());
            }
            if let [(range, reference)] = refs.as_slice()
                && range.start == 0
                && range.end == s.len()
            {
                return lookup(reference).ok_or_else(|| reference.clone());
            }

            let mut out = String::with_capacity(s.len());
            let mut last = 0;
            for (range, reference) in refs {
                out.push_str(&s[last..range.start]);
                let resolved = lookup(&reference).ok_or(reference)?;
                out.push_str(&as_text(&resolved));
                last = range.end;
            }
            out.push_str(&s[last..]);
            Ok(Value::String(out))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| substitute_value(v, lookup))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, v) in map {
                resolved.insert(key.clone(), substitute_value(v, lookup)?);
            }
            Ok(Value::Object(resolved))
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(value.clone()),
    }
}

/// Resolves every reference in a property map.
///
/// # Errors
///
/// Returns the first reference `lookup` could not resolve.
pub fn substitute<F>(properties: &Properties, lookup: &F) -> std::result::Result<Properties, Reference>
where
    F: Fn(&Reference) -> Option<Value>,
{
    properties
        .iter()
        .map(|(key, value)| Ok((key.clone(), substitute_value(value, lookup)?)))
        .collect()
}
