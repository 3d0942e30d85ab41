//! Attribute expressions
//!
//! Input attributes are either literal JSON values or references to another
//! resource's attribute, written `${node.attr}` inside strings. A string that
//! is exactly one reference keeps the referenced value's type; a string that
//! mixes text and references renders to a string. `$${` escapes a literal
//! `${`.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Reference to an attribute of another resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrRef {
    /// Logical name of the producing resource
    pub node: String,
    /// Attribute on the producer (input or output)
    pub attr: String,
}

impl AttrRef {
    /// Parse the inside of `${...}`
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        let Some((node, attr)) = text.split_once('.') else {
            return Err(format!("reference '{text}' must have the form node.attr"));
        };
        if node.is_empty() || attr.is_empty() || attr.contains('.') {
            return Err(format!("reference '{text}' must have the form node.attr"));
        }
        Ok(Self {
            node: node.to_string(),
            attr: attr.to_string(),
        })
    }
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.attr)
    }
}

/// Piece of a string template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Ref(AttrRef),
}

/// An unresolved attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Plain value with no references
    Literal(Value),
    /// Whole value taken from another resource
    Ref(AttrRef),
    /// String interpolating one or more references
    Template(Vec<Segment>),
    /// Array containing at least one reference
    List(Vec<Expr>),
    /// Object containing at least one reference
    Map(BTreeMap<String, Expr>),
}

impl Expr {
    /// Parse a raw document value, turning `${...}` strings into references
    pub fn parse(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => parse_string(s),
            Value::Array(items) => {
                let exprs = items.iter().map(Self::parse).collect::<Result<Vec<_>, _>>()?;
                if exprs.iter().all(|e| matches!(e, Self::Literal(_))) {
                    Ok(Self::Literal(Value::Array(
                        exprs.into_iter().filter_map(Self::into_literal).collect(),
                    )))
                } else {
                    Ok(Self::List(exprs))
                }
            }
            Value::Object(fields) => {
                let mut exprs = BTreeMap::new();
                for (key, field) in fields {
                    exprs.insert(key.clone(), Self::parse(field)?);
                }
                if exprs.values().all(|e| matches!(e, Self::Literal(_))) {
                    Ok(Self::Literal(Value::Object(
                        exprs
                            .into_iter()
                            .filter_map(|(k, e)| e.into_literal().map(|v| (k, v)))
                            .collect(),
                    )))
                } else {
                    Ok(Self::Map(exprs))
                }
            }
            other => Ok(Self::Literal(other.clone())),
        }
    }

    fn into_literal(self) -> Option<Value> {
        match self {
            Self::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// All references in this expression, in document order
    pub fn references(&self) -> Vec<&AttrRef> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a AttrRef>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(r) => out.push(r),
            Self::Template(segments) => {
                for segment in segments {
                    if let Segment::Ref(r) = segment {
                        out.push(r);
                    }
                }
            }
            Self::List(items) => items.iter().for_each(|e| e.collect_refs(out)),
            Self::Map(fields) => fields.values().for_each(|e| e.collect_refs(out)),
        }
    }

    /// Resolve against producer attributes
    ///
    /// `lookup` returns `None` when a referenced value is not known yet;
    /// the whole expression is then unknown.
    pub fn resolve(&self, lookup: &dyn Fn(&AttrRef) -> Option<Value>) -> Option<Value> {
        match self {
            Self::Literal(v) => Some(v.clone()),
            Self::Ref(r) => lookup(r),
            Self::Template(segments) => {
                let mut rendered = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(t) => rendered.push_str(t),
                        Segment::Ref(r) => rendered.push_str(&render(&lookup(r)?)),
                    }
                }
                Some(Value::String(rendered))
            }
            Self::List(items) => items
                .iter()
                .map(|e| e.resolve(lookup))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Self::Map(fields) => {
                let mut object = serde_json::Map::new();
                for (key, expr) in fields {
                    object.insert(key.clone(), expr.resolve(lookup)?);
                }
                Some(Value::Object(object))
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v}"),
            Self::Ref(r) => write!(f, "${{{r}}}"),
            Self::Template(segments) => {
                f.write_str("\"")?;
                for segment in segments {
                    match segment {
                        Segment::Text(t) => f.write_str(t)?,
                        Segment::Ref(r) => write!(f, "${{{r}}}")?,
                    }
                }
                f.write_str("\"")
            }
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(fields) => {
                f.write_str("{")?;
                for (i, (key, item)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "\"{key}\":{item}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Render a resolved value for string interpolation
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_string(s: &str) -> Result<Expr, String> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        text.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("$${") {
            text.push_str("${");
            rest = after;
        } else if let Some(after) = tail.strip_prefix("${") {
            let end = after
                .find('}')
                .ok_or_else(|| format!("unterminated reference in '{s}'"))?;
            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }
            segments.push(Segment::Ref(AttrRef::parse(&after[..end])?));
            rest = &after[end + 1..];
        } else {
            text.push('$');
            rest = &tail[1..];
        }
    }
    text.push_str(rest);

    if segments.is_empty() {
        return Ok(Expr::Literal(Value::String(text)));
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    if let [Segment::Ref(r)] = segments.as_slice() {
        return Ok(Expr::Ref(r.clone()));
    }
    Ok(Expr::Template(segments))
}
