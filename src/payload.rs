//! Transport-safe message payloads.
//!
//! The original bus (`exchange.py`) carries one dynamically-typed
//! `ExchangeMessage` base class per payload, validating field arity/types at
//! construction via a `_fields` tuple of `(name, type, default)` specs. The
//! idiomatic Rust recast (see SPEC_FULL.md REDESIGN FLAGS) keeps that
//! validated-record shape for callers who want it (`Record`/`FieldSpec`),
//! but makes the common payload kinds compile-time-checked enum variants
//! instead of routing everything through runtime field checks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ExchangeFault;

/// The literal value a poll loop recognizes as its own stop sentinel
/// (spec §6, "Control sentinels").
pub const STOP_SENTINEL: &str = "stop";

/// Declared type of a single [`Record`] field. `None` in a [`FieldSpec`]
/// means "untyped" (any JSON value, including null, is accepted).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Bool,
    Array,
    Object,
}

impl FieldKind {
    fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
        }
    }
}

/// One field's declared shape: `(name, type-or-none, default-or-absent)`.
#[derive(Clone, Copy, Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: Option<FieldKind>,
    pub default: Option<fn() -> serde_json::Value>,
}

impl FieldSpec {
    pub const fn required(name: &'static str, kind: Option<FieldKind>) -> Self {
        FieldSpec {
            name,
            kind,
            default: None,
        }
    }
}

/// A tagged record validated against a declared field schema.
///
/// Construction validates arity (too many positional/keyword arguments is
/// an error) and per-field types (null is permitted whenever the declared
/// type is absent), matching `ExchangeMessage.__init__` in the original.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    schema_name: &'static str,
    field_names: Vec<&'static str>,
    values: Vec<serde_json::Value>,
}

impl Record {
    /// Build a record from keyword-style arguments, applying schema
    /// defaults for any field not supplied.
    pub fn build(
        schema_name: &'static str,
        schema: &'static [FieldSpec],
        mut kwargs: std::collections::HashMap<&'static str, serde_json::Value>,
    ) -> Result<Self, ExchangeFault> {
        if kwargs.len() > schema.len() {
            return Err(ExchangeFault::InvalidPayload(
                "too many arguments to constructor".to_string(),
            ));
        }
        let mut field_names = Vec::with_capacity(schema.len());
        let mut values = Vec::with_capacity(schema.len());
        for field in schema {
            let value = match kwargs.remove(field.name) {
                Some(v) => v,
                None => match field.default {
                    Some(f) => f(),
                    None => {
                        return Err(ExchangeFault::InvalidPayload(format!(
                            "property not provided to constructor: {}",
                            field.name
                        )))
                    }
                },
            };
            if !value.is_null() {
                if let Some(kind) = field.kind {
                    if !kind.matches(&value) {
                        return Err(ExchangeFault::InvalidPayload(format!(
                            "incorrect type for property '{}'",
                            field.name
                        )));
                    }
                }
            }
            field_names.push(field.name);
            values.push(value);
        }
        Ok(Record {
            schema_name,
            field_names,
            values,
        })
    }

    /// Structural field access by name.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.field_names
            .iter()
            .position(|n| *n == name)
            .map(|idx| &self.values[idx])
    }

    /// Indexed access by position.
    pub fn at(&self, index: usize) -> Option<&serde_json::Value> {
        self.values.get(index)
    }

    pub fn schema_name(&self) -> &'static str {
        self.schema_name
    }
}

impl PartialEq for Record {
    /// Equality-by-tuple-of-values — two records compare equal when their
    /// ordered value tuples match, independent of which schema produced
    /// them (mirrors `ExchangeMessage` comparing plain tuples).
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .field_names
            .iter()
            .zip(&self.values)
            .map(|(name, val)| format!("{name}={val}"))
            .collect();
        write!(f, "{}({})", self.schema_name, params.join(", "))
    }
}

/// An error value representing a failure in message processing.
///
/// Carried as ordinary data (never a live exception) so it survives
/// process/thread boundaries — see spec §4.1 and §7.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExchangeError {
    pub value: String,
    pub exc_info: String,
}

impl ExchangeError {
    pub fn new(value: impl Into<String>, exc_info: impl Into<String>) -> Self {
        ExchangeError {
            value: value.into(),
            exc_info: exc_info.into(),
        }
    }

    /// Build an error value from a caught panic payload, pre-rendering the
    /// trace the way the source's `exc_info=True` captures
    /// `traceback.format_exc()` at the throw site.
    pub fn from_panic(value: impl Into<String>, panic: &(dyn std::any::Any + Send)) -> Self {
        let rendered = if let Some(s) = panic.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };
        ExchangeError::new(value, rendered)
    }

    pub fn format(&self) -> String {
        if self.exc_info.is_empty() {
            self.value.clone()
        } else {
            format!("{}\n{}", self.value, self.exc_info)
        }
    }
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExchangeError(value={})", self.value)
    }
}

/// The typed content an [`crate::envelope::Envelope`] carries.
///
/// Payloads must be transport-safe: cleanly serializable, never embedding
/// live exceptions or native handles (spec §3). `Record`/`Json` cover
/// dynamically-shaped content; `Text`/`Stop`/`Error` are the compile-time
/// checked variants the bus itself understands.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data")]
pub enum Payload {
    /// A plain string payload — the common case for simple request/reply
    /// traffic (echo demos, acks, small commands).
    Text(String),
    /// A schema-validated structured record.
    Record(Record),
    /// Arbitrary JSON for services that don't need field validation.
    Json(serde_json::Value),
    /// The poll-loop stop sentinel (spec §6).
    Stop,
    /// An error produced while processing an earlier message.
    Error(ExchangeError),
}

impl Payload {
    pub fn text(s: impl Into<String>) -> Self {
        Payload::Text(s.into())
    }

    pub fn stop() -> Self {
        Payload::Stop
    }

    pub fn error(value: impl Into<String>, exc_info: impl Into<String>) -> Self {
        Payload::Error(ExchangeError::new(value, exc_info))
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Payload::Text(s) if s == STOP_SENTINEL) || matches!(self, Payload::Stop)
    }

    pub fn as_error(&self) -> Option<&ExchangeError> {
        match self {
            Payload::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(s) => write!(f, "{s}"),
            Payload::Record(r) => write!(f, "{r}"),
            Payload::Json(v) => write!(f, "{v}"),
            Payload::Stop => write!(f, "stop"),
            Payload::Error(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREETING_SCHEMA: &[FieldSpec] = &[
        FieldSpec::required("name", Some(FieldKind::String)),
        FieldSpec {
            name: "loud",
            kind: Some(FieldKind::Bool),
            default: Some(|| serde_json::Value::Bool(false)),
        },
    ];

    #[test]
    fn record_build_validates_types() {
        let mut kwargs = std::collections::HashMap::new();
        kwargs.insert("name", serde_json::json!("alice"));
        let record = Record::build("Greeting", GREETING_SCHEMA, kwargs).unwrap();
        assert_eq!(record.get("name").unwrap(), "alice");
        assert_eq!(record.get("loud").unwrap(), false);
        assert_eq!(record.at(0).unwrap(), "alice");
    }

    #[test]
    fn record_build_rejects_wrong_type() {
        let mut kwargs = std::collections::HashMap::new();
        kwargs.insert("name", serde_json::json!(42));
        assert!(Record::build("Greeting", GREETING_SCHEMA, kwargs).is_err());
    }

    #[test]
    fn record_build_rejects_missing_required_field() {
        let kwargs = std::collections::HashMap::new();
        assert!(Record::build("Greeting", GREETING_SCHEMA, kwargs).is_err());
    }

    #[test]
    fn record_equality_is_by_value_tuple() {
        let mut a = std::collections::HashMap::new();
        a.insert("name", serde_json::json!("bob"));
        let mut b = std::collections::HashMap::new();
        b.insert("name", serde_json::json!("bob"));
        let r1 = Record::build("Greeting", GREETING_SCHEMA, a).unwrap();
        let r2 = Record::build("Greeting", GREETING_SCHEMA, b).unwrap();
        assert_eq!(r1, r2);
    }

    #[test]
    fn exchange_error_format_with_and_without_trace() {
        let with_trace = ExchangeError::new("boom", "at line 1");
        assert_eq!(with_trace.format(), "boom\nat line 1");

        let without_trace = ExchangeError::new("boom", "");
        assert_eq!(without_trace.format(), "boom");
    }

    #[test]
    fn payload_is_stop_recognizes_sentinel() {
        assert!(Payload::text(STOP_SENTINEL).is_stop());
        assert!(Payload::stop().is_stop());
        assert!(!Payload::text("hello").is_stop());
    }
}
