//! Attribute values and reference expressions.
//!
//! Declarations carry plain JSON values. Strings may embed reference
//! expressions of the form `${Kind.name.attribute}`; `$${` escapes a literal
//! `${`. Parsing turns each value into an [`AttrValue`] tree whose references
//! are resolved once the referenced resources have been applied.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::resource::{is_valid_kind, is_valid_resource_name, Attributes, ResourceId};

/// A pointer from one resource's attribute to another resource's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    /// The referenced resource.
    pub target: ResourceId,
    /// The output attribute read from the target.
    pub attribute: String,
}

/// A piece of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text.
    Text(String),
    /// An embedded reference, stringified on resolution.
    Ref(Reference),
}

/// A parsed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// A value with no references.
    Literal(Value),
    /// A string that is exactly one reference; keeps the target's JSON type.
    Reference(Reference),
    /// A string mixing literal text and references.
    Interpolation(Vec<Segment>),
    /// A list that contains at least one reference somewhere below it.
    List(Vec<AttrValue>),
    /// A map that contains at least one reference somewhere below it.
    Map(BTreeMap<String, AttrValue>),
}

impl Reference {
    /// Parses `Kind.name.attribute`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the expression is malformed.
    pub fn parse(expression: &str) -> Result<Self, String> {
        let mut parts = expression.splitn(3, '.');
        let (Some(kind), Some(name), Some(attribute)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(String::from("expected Kind.name.attribute"));
        };

        if !is_valid_kind(kind) {
            return Err(format!("invalid kind '{kind}'"));
        }
        if !is_valid_resource_name(name) {
            return Err(format!("invalid name '{name}'"));
        }
        if attribute.is_empty()
            || !attribute
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!("invalid output attribute '{attribute}'"));
        }

        Ok(Self {
            target: ResourceId::new(kind, name),
            attribute: attribute.to_string(),
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attribute)
    }
}

impl AttrValue {
    /// Parses a declared JSON value, recognising reference expressions.
    ///
    /// Subtrees without references collapse into a single `Literal`.
    ///
    /// # Errors
    ///
    /// Returns the offending expression and a reason if a reference is malformed.
    pub fn parse(value: &Value) -> Result<Self, (String, String)> {
        match value {
            Value::String(s) => parse_string(s),
            Value::Array(items) => {
                let parsed = items
                    .iter()
                    .map(Self::parse)
                    .collect::<Result<Vec<_>, _>>()?;
                if parsed.iter().all(Self::is_literal) {
                    Ok(Self::Literal(value.clone()))
                } else {
                    Ok(Self::List(parsed))
                }
            }
            Value::Object(map) => {
                let parsed = map
                    .iter()
                    .map(|(k, v)| Self::parse(v).map(|p| (k.clone(), p)))
                    .collect::<Result<BTreeMap<_, _>, _>>()?;
                if parsed.values().all(Self::is_literal) {
                    Ok(Self::Literal(value.clone()))
                } else {
                    Ok(Self::Map(parsed))
                }
            }
            other => Ok(Self::Literal(other.clone())),
        }
    }

    /// Returns true if the value holds no references.
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Appends every reference in this value to `out`.
    pub fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Literal(_) => {}
            Self::Reference(r) => out.push(r),
            Self::Interpolation(segments) => {
                for segment in segments {
                    if let Segment::Ref(r) = segment {
                        out.push(r);
                    }
                }
            }
            Self::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Self::Map(map) => {
                for item in map.values() {
                    item.collect_references(out);
                }
            }
        }
    }

    /// Resolves the value, looking up each reference with `lookup`.
    ///
    /// # Errors
    ///
    /// Returns the first reference `lookup` could not answer.
    pub fn resolve<F>(&self, lookup: &F) -> Result<Value, Reference>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Reference(r) => lookup(r).ok_or_else(|| r.clone()),
            Self::Interpolation(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(text) => out.push_str(text),
                        Segment::Ref(r) => match lookup(r).ok_or_else(|| r.clone())? {
                            Value::String(s) => out.push_str(&s),
                            other => out.push_str(&other.to_string()),
                        },
                    }
                }
                Ok(Value::String(out))
            }
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Self::Map(map) => {
                let mut out = serde_json::Map::new();
                for (key, item) in map {
                    out.insert(key.clone(), item.resolve(lookup)?);
                }
                Ok(Value::Object(out))
            }
        }
    }
}

/// Resolves a whole attribute bag.
///
/// # Errors
///
/// Returns the first reference `lookup` could not answer.
pub fn resolve_attributes<F>(
    attributes: &BTreeMap<String, AttrValue>,
    lookup: &F,
) -> Result<Attributes, Reference>
where
    F: Fn(&Reference) -> Option<Value>,
{
    attributes
        .iter()
        .map(|(key, value)| value.resolve(lookup).map(|v| (key.clone(), v)))
        .collect()
}

fn parse_string(s: &str) -> Result<AttrValue, (String, String)> {
    if !s.contains("${") {
        return Ok(AttrValue::Literal(Value::String(s.to_string())));
    }

    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = s;

    while let Some(pos) = rest.find("${") {
        // `$${` is an escaped literal `${`
        if rest[..pos].ends_with('$') {
            text.push_str(&rest[..pos - 1]);
            text.push_str("${");
            rest = &rest[pos + 2..];
            continue;
        }

        text.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| (s.to_string(), String::from("unterminated expression")))?;
        let expression = after[..end].trim();
        let reference =
            Reference::parse(expression).map_err(|reason| (expression.to_string(), reason))?;

        if !text.is_empty() {
            segments.push(Segment::Text(std::mem::take(&mut text)));
        }
        segments.push(Segment::Ref(reference));
        rest = &after[end + 1..];
    }

    text.push_str(rest);
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }

    if !segments.iter().any(|seg| matches!(seg, Segment::Ref(_))) {
        let joined = segments
            .into_iter()
            .map(|seg| match seg {
                Segment::Text(t) => t,
                Segment::Ref(r) => r.to_string(),
            })
            .collect();
        return Ok(AttrValue::Literal(Value::String(joined)));
    }

    if let [Segment::Ref(r)] = segments.as_slice() {
        return Ok(AttrValue::Reference(r.clone()));
    }

    Ok(AttrValue::Interpolation(segments))
}
