//! # Schema model
//!
//! The descriptor surface the codec walks. A schema is a recursive tree of
//! fields; each field names a wire kind, a repetition label, and the codec
//! options (`min`, `max`, `precision`, `max_length`, `max_count`, `codec`)
//! the field codecs read. Schemas are plain serde types so hosts can load
//! them from JSON or TOML descriptor files.
//!
//! Messages themselves are dynamic: a [`DynamicMessage`] is a name → values
//! map built at runtime against a loaded schema. Field codecs dispatch on the
//! schema's tagged variants, never on reflection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

// ─── Wire kinds ─────────────────────────────────────────────────────────────

/// Numeric storage class of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericType {
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float,
    Double,
}

impl NumericType {
    /// Whether decoded values are reconstructed as integers.
    pub fn is_integral(self) -> bool {
        !matches!(self, NumericType::Float | NumericType::Double)
    }
}

/// Repetition mode of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Required,
    Optional,
    /// Repeated with a mandatory `max_count` option.
    Repeated,
}

/// The wire kind of one field. Enum values are listed in declaration order;
/// nested messages carry their schema inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldKind {
    Numeric(NumericType),
    Bool,
    Enum(Vec<String>),
    Str,
    Bytes,
    Message(MessageSchema),
}

/// Codec-dispatch axis: which registry slot serves a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireClass {
    Numeric,
    Bool,
    Enum,
    String,
    Bytes,
    Message,
}

impl FieldKind {
    pub fn wire_class(&self) -> WireClass {
        match self {
            FieldKind::Numeric(_) => WireClass::Numeric,
            FieldKind::Bool => WireClass::Bool,
            FieldKind::Enum(_) => WireClass::Enum,
            FieldKind::Str => WireClass::String,
            FieldKind::Bytes => WireClass::Bytes,
            FieldKind::Message(_) => WireClass::Message,
        }
    }
}

// ─── Options ────────────────────────────────────────────────────────────────

/// Per-field codec options, already narrowed from the host's descriptor blob
/// to the keys the core reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldOptions {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Quantization step for numerics. Defaults to 1.0.
    #[serde(default)]
    pub precision: Option<f64>,
    /// Byte bound for strings and bytes fields.
    #[serde(default)]
    pub max_length: Option<u32>,
    /// Element bound for repeated fields. Mandatory when `Label::Repeated`.
    #[serde(default)]
    pub max_count: Option<u32>,
    /// Codec name override; `"_default_"` when absent.
    #[serde(default)]
    pub codec: Option<String>,
}

impl FieldOptions {
    /// Quantization step, defaulted.
    pub fn step(&self) -> f64 {
        self.precision.unwrap_or(1.0)
    }
}

// ─── Schema tree ────────────────────────────────────────────────────────────

/// One field of a message schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub label: Label,
    pub kind: FieldKind,
    #[serde(default)]
    pub options: FieldOptions,
}

/// A message schema: named, optionally carrying a DCCL id.
///
/// `dccl_id == None` marks an embedded-only schema (the descriptor key
/// `omit_id`): it can appear under a [`FieldKind::Message`] field but cannot
/// be loaded as a top-level type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSchema {
    pub name: String,
    #[serde(default)]
    pub dccl_id: Option<u16>,
    pub fields: Vec<FieldDef>,
}

impl MessageSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ─── Dynamic messages ───────────────────────────────────────────────────────

/// A runtime value of one field element.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Double(f64),
    Bool(bool),
    /// Enum value by declared name.
    Enumerator(String),
    Str(String),
    Bytes(Vec<u8>),
    Message(DynamicMessage),
}

impl Value {
    /// Numeric view used by the numeric codec.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }
}

/// A schema-typed message under construction or after decode.
///
/// Storage is field name → element vector: an absent key is an unset
/// optional, one element a singular field, several a repeated field. Two
/// messages compare equal iff every set field matches, which is the
/// round-trip oracle used by the codec tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicMessage {
    values: BTreeMap<String, Vec<Value>>,
}

impl DynamicMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a singular field, replacing any prior value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.values.insert(name.into(), vec![value]);
        self
    }

    /// Append an element to a repeated field.
    pub fn push(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.values.entry(name.into()).or_default().push(value);
        self
    }

    /// Unset a field entirely.
    pub fn clear(&mut self, name: &str) {
        self.values.remove(name);
    }

    /// First element of a field, if set.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).and_then(|v| v.first())
    }

    /// All elements of a field; empty slice when unset.
    pub fn get_all(&self, name: &str) -> &[Value] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(|v| !v.is_empty())
    }

    /// Number of set fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stable 64-bit fingerprint of the value tree, used to memoize encoded
    /// sizes. Floats hash by bit pattern.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash_into(&mut hasher);
        hasher.finish()
    }

    fn hash_into<H: Hasher>(&self, state: &mut H) {
        for (name, values) in &self.values {
            name.hash(state);
            for v in values {
                hash_value(v, state);
            }
        }
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Integer(v) => {
            0u8.hash(state);
            v.hash(state);
        }
        Value::Double(v) => {
            1u8.hash(state);
            v.to_bits().hash(state);
        }
        Value::Bool(v) => {
            2u8.hash(state);
            v.hash(state);
        }
        Value::Enumerator(v) => {
            3u8.hash(state);
            v.hash(state);
        }
        Value::Str(v) => {
            4u8.hash(state);
            v.hash(state);
        }
        Value::Bytes(v) => {
            5u8.hash(state);
            v.hash(state);
        }
        Value::Message(m) => {
            6u8.hash(state);
            m.hash_into(state);
        }
    }
}
