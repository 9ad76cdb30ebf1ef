//! # Field codecs
//!
//! One codec per wire class, each responsible for the bit layout of a single
//! field: its width given a value, its schema-time bounds, and the
//! encode/decode pair. The traversal functions at the bottom walk a schema in
//! declaration order, depth-first through embedded messages, handling
//! repetition (count prefix) and required/optional presence uniformly so the
//! codecs themselves stay small.
//!
//! Codecs never hold a pointer back to the engine. Nested-message recursion
//! goes through [`CodecCtx`], a narrowed capability holding just the registry.

use std::sync::Arc;

use crate::bits::BitBuffer;
use crate::error::{DcclError, ValidationCause};
use crate::registry::{FieldCodecRegistry, DEFAULT_CODEC_NAME};
use crate::schema::{DynamicMessage, FieldDef, FieldKind, Label, MessageSchema, Value};

// ─── Context ────────────────────────────────────────────────────────────────

/// Recursion capability handed to every codec invocation.
pub struct CodecCtx<'a> {
    registry: &'a FieldCodecRegistry,
}

impl<'a> CodecCtx<'a> {
    pub fn new(registry: &'a FieldCodecRegistry) -> Self {
        CodecCtx { registry }
    }

    /// Resolve the codec serving `field`, honouring the `codec` option.
    pub fn codec_for(&self, field: &FieldDef) -> Result<Arc<dyn FieldCodec>, DcclError> {
        let name = field.options.codec.as_deref().unwrap_or(DEFAULT_CODEC_NAME);
        self.registry.lookup(field.kind.wire_class(), name)
    }
}

// ─── Trait ──────────────────────────────────────────────────────────────────

/// Bit-level contract for one field.
///
/// `optional` tells the codec whether it must also represent absence; the
/// traversal passes `false` for required fields and for the elements of a
/// repeated field.
pub trait FieldCodec: Send + Sync {
    /// Schema-time checks. Returns one reason per problem found.
    fn validate(&self, field: &FieldDef, cx: &CodecCtx) -> Vec<String>;

    /// Width in bits this value would occupy.
    fn field_size(
        &self,
        value: Option<&Value>,
        field: &FieldDef,
        optional: bool,
        cx: &CodecCtx,
    ) -> Result<u32, DcclError>;

    /// Largest width any value can occupy.
    fn max_size(&self, field: &FieldDef, optional: bool, cx: &CodecCtx) -> Result<u32, DcclError>;

    /// Smallest width any value can occupy.
    fn min_size(&self, field: &FieldDef, optional: bool, cx: &CodecCtx) -> Result<u32, DcclError>;

    fn encode(
        &self,
        buf: &mut BitBuffer,
        value: Option<&Value>,
        field: &FieldDef,
        optional: bool,
        cx: &CodecCtx,
    ) -> Result<(), DcclError>;

    fn decode(
        &self,
        buf: &mut BitBuffer,
        field: &FieldDef,
        optional: bool,
        cx: &CodecCtx,
    ) -> Result<Option<Value>, DcclError>;
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Bits needed to distinguish `code_points` values: `ceil(log2(code_points))`.
pub(crate) fn bits_for(code_points: u64) -> u32 {
    if code_points <= 1 {
        0
    } else {
        64 - (code_points - 1).leading_zeros()
    }
}

fn codec_error(field: &FieldDef, reason: impl Into<String>) -> DcclError {
    DcclError::FieldDecode {
        field: field.name.clone(),
        reason: reason.into(),
    }
}

/// Cut a string to at most `max` bytes on a character boundary.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

// ─── Default numeric ────────────────────────────────────────────────────────

/// Bounded, quantized numerics.
///
/// A value maps to the code `round((x − min) / precision)`; the width is the
/// smallest holding every code, plus one reserved absent point for optionals.
#[derive(Debug, Default)]
pub struct DefaultNumericCodec;

impl DefaultNumericCodec {
    fn bounds(field: &FieldDef) -> Result<(f64, f64, f64), DcclError> {
        let min = field
            .options
            .min
            .ok_or_else(|| codec_error(field, "missing min"))?;
        let max = field
            .options
            .max
            .ok_or_else(|| codec_error(field, "missing max"))?;
        Ok((min, max, field.options.step()))
    }

    /// Number of in-range value codes.
    fn span(min: f64, max: f64, step: f64) -> u64 {
        ((max - min) / step).floor() as u64 + 1
    }

    fn width(field: &FieldDef, optional: bool) -> Result<u32, DcclError> {
        let (min, max, step) = Self::bounds(field)?;
        Ok(bits_for(Self::span(min, max, step) + optional as u64))
    }
}

impl FieldCodec for DefaultNumericCodec {
    fn validate(&self, field: &FieldDef, _cx: &CodecCtx) -> Vec<String> {
        let mut reasons = Vec::new();
        match (field.options.min, field.options.max) {
            (None, _) => reasons.push("missing min".into()),
            (_, None) => reasons.push("missing max".into()),
            (Some(min), Some(max)) => {
                if !min.is_finite() || !max.is_finite() {
                    reasons.push("min/max must be finite".into());
                } else if min > max {
                    reasons.push(format!("min {min} exceeds max {max}"));
                } else {
                    let step = field.options.step();
                    if !(step.is_finite() && step > 0.0) {
                        reasons.push("precision must be positive".into());
                    } else if (max - min) / step >= (1u64 << 62) as f64 {
                        reasons.push("range/precision needs more than 64 bits".into());
                    }
                }
            }
        }
        reasons
    }

    fn field_size(
        &self,
        _value: Option<&Value>,
        field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<u32, DcclError> {
        Self::width(field, optional)
    }

    fn max_size(&self, field: &FieldDef, optional: bool, _cx: &CodecCtx) -> Result<u32, DcclError> {
        Self::width(field, optional)
    }

    fn min_size(&self, field: &FieldDef, optional: bool, _cx: &CodecCtx) -> Result<u32, DcclError> {
        Self::width(field, optional)
    }

    fn encode(
        &self,
        buf: &mut BitBuffer,
        value: Option<&Value>,
        field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<(), DcclError> {
        let (min, max, step) = Self::bounds(field)?;
        let width = Self::width(field, optional)?;

        let x = match value {
            None => None,
            Some(v) => Some(
                v.as_f64()
                    .ok_or_else(|| codec_error(field, "expected a numeric value"))?,
            ),
        };

        let code = match x {
            Some(x) if (min..=max).contains(&x) => {
                let code = ((x - min) / step).round() as u64;
                if optional {
                    code + 1
                } else {
                    code
                }
            }
            Some(x) if !optional => {
                return Err(DcclError::OutOfRange {
                    field: field.name.clone(),
                    value: x,
                    min,
                    max,
                });
            }
            None if !optional => {
                return Err(codec_error(field, "required field is not set"));
            }
            // Out-of-range optionals encode as absent.
            _ => 0,
        };

        if width > 0 {
            buf.push_bits(code, width);
        }
        Ok(())
    }

    fn decode(
        &self,
        buf: &mut BitBuffer,
        field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<Option<Value>, DcclError> {
        let (min, max, step) = Self::bounds(field)?;
        let width = Self::width(field, optional)?;
        let mut code = if width > 0 { buf.pop_bits(width)? } else { 0 };

        if optional {
            if code == 0 {
                return Ok(None);
            }
            code -= 1;
        }
        if code >= Self::span(min, max, step) {
            return Err(codec_error(
                field,
                format!("numeric code {code} beyond declared range"),
            ));
        }

        let x = min + code as f64 * step;
        let value = match &field.kind {
            FieldKind::Numeric(nt) if nt.is_integral() => Value::Integer(x.round() as i64),
            _ => Value::Double(x),
        };
        Ok(Some(value))
    }
}

// ─── Default bool ───────────────────────────────────────────────────────────

/// 1 bit required; 2 bits optional (0 = absent, 1 = false, 2 = true).
#[derive(Debug, Default)]
pub struct DefaultBoolCodec;

impl FieldCodec for DefaultBoolCodec {
    fn validate(&self, _field: &FieldDef, _cx: &CodecCtx) -> Vec<String> {
        Vec::new()
    }

    fn field_size(
        &self,
        _value: Option<&Value>,
        _field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<u32, DcclError> {
        Ok(if optional { 2 } else { 1 })
    }

    fn max_size(&self, _: &FieldDef, optional: bool, _: &CodecCtx) -> Result<u32, DcclError> {
        Ok(if optional { 2 } else { 1 })
    }

    fn min_size(&self, _: &FieldDef, optional: bool, _: &CodecCtx) -> Result<u32, DcclError> {
        Ok(if optional { 2 } else { 1 })
    }

    fn encode(
        &self,
        buf: &mut BitBuffer,
        value: Option<&Value>,
        field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<(), DcclError> {
        let b = match value {
            Some(Value::Bool(b)) => Some(*b),
            None => None,
            Some(_) => return Err(codec_error(field, "expected a bool value")),
        };
        if optional {
            let code = match b {
                None => 0u64,
                Some(false) => 1,
                Some(true) => 2,
            };
            buf.push_bits(code, 2);
        } else {
            let b = b.ok_or_else(|| codec_error(field, "required field is not set"))?;
            buf.push_bit(b);
        }
        Ok(())
    }

    fn decode(
        &self,
        buf: &mut BitBuffer,
        field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<Option<Value>, DcclError> {
        if optional {
            match buf.pop_bits(2)? {
                0 => Ok(None),
                1 => Ok(Some(Value::Bool(false))),
                2 => Ok(Some(Value::Bool(true))),
                _ => Err(codec_error(field, "reserved bool code")),
            }
        } else {
            Ok(Some(Value::Bool(buf.pop_bits(1)? == 1)))
        }
    }
}

// ─── Default enum ───────────────────────────────────────────────────────────

/// Enumerators numbered by declaration order.
#[derive(Debug, Default)]
pub struct DefaultEnumCodec;

impl DefaultEnumCodec {
    fn values(field: &FieldDef) -> Result<&[String], DcclError> {
        match &field.kind {
            FieldKind::Enum(values) => Ok(values),
            _ => Err(codec_error(field, "enum codec on a non-enum field")),
        }
    }

    fn width(field: &FieldDef, optional: bool) -> Result<u32, DcclError> {
        Ok(bits_for(Self::values(field)?.len() as u64 + optional as u64))
    }
}

impl FieldCodec for DefaultEnumCodec {
    fn validate(&self, field: &FieldDef, _cx: &CodecCtx) -> Vec<String> {
        match Self::values(field) {
            Ok([]) => vec!["enum declares no values".into()],
            Ok(_) => Vec::new(),
            Err(e) => vec![e.to_string()],
        }
    }

    fn field_size(
        &self,
        _value: Option<&Value>,
        field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<u32, DcclError> {
        Self::width(field, optional)
    }

    fn max_size(&self, field: &FieldDef, optional: bool, _: &CodecCtx) -> Result<u32, DcclError> {
        Self::width(field, optional)
    }

    fn min_size(&self, field: &FieldDef, optional: bool, _: &CodecCtx) -> Result<u32, DcclError> {
        Self::width(field, optional)
    }

    fn encode(
        &self,
        buf: &mut BitBuffer,
        value: Option<&Value>,
        field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<(), DcclError> {
        let values = Self::values(field)?;
        let width = Self::width(field, optional)?;
        let code = match value {
            None if optional => 0,
            None => return Err(codec_error(field, "required field is not set")),
            Some(Value::Enumerator(name)) => {
                let idx = values
                    .iter()
                    .position(|v| v == name)
                    .ok_or_else(|| codec_error(field, format!("unknown enumerator `{name}`")))?
                    as u64;
                idx + optional as u64
            }
            Some(_) => return Err(codec_error(field, "expected an enum value")),
        };
        if width > 0 {
            buf.push_bits(code, width);
        }
        Ok(())
    }

    fn decode(
        &self,
        buf: &mut BitBuffer,
        field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<Option<Value>, DcclError> {
        let values = Self::values(field)?;
        let width = Self::width(field, optional)?;
        let mut code = if width > 0 { buf.pop_bits(width)? } else { 0 };
        if optional {
            if code == 0 {
                return Ok(None);
            }
            code -= 1;
        }
        let name = values
            .get(code as usize)
            .ok_or_else(|| codec_error(field, format!("reserved enum value {code}")))?;
        Ok(Some(Value::Enumerator(name.clone())))
    }
}

// ─── Default string ─────────────────────────────────────────────────────────

/// Length prefix of `ceil(log2(max_length + 1))` bits, then that many bytes.
/// Over-length input is truncated silently; an absent optional encodes as
/// length zero, so absent and empty conflate on the wire.
#[derive(Debug, Default)]
pub struct DefaultStringCodec;

impl DefaultStringCodec {
    fn max_length(field: &FieldDef) -> Result<u32, DcclError> {
        field
            .options
            .max_length
            .ok_or_else(|| codec_error(field, "missing max_length"))
    }

    fn prefix_bits(field: &FieldDef) -> Result<u32, DcclError> {
        Ok(bits_for(Self::max_length(field)? as u64 + 1))
    }
}

impl FieldCodec for DefaultStringCodec {
    fn validate(&self, field: &FieldDef, _cx: &CodecCtx) -> Vec<String> {
        match field.options.max_length {
            None => vec!["missing max_length".into()],
            Some(0) => vec!["max_length must be at least 1".into()],
            Some(_) => Vec::new(),
        }
    }

    fn field_size(
        &self,
        value: Option<&Value>,
        field: &FieldDef,
        _optional: bool,
        _cx: &CodecCtx,
    ) -> Result<u32, DcclError> {
        let max = Self::max_length(field)? as usize;
        let len = match value {
            Some(Value::Str(s)) => truncate_utf8(s, max).len(),
            _ => 0,
        };
        Ok(Self::prefix_bits(field)? + 8 * len as u32)
    }

    fn max_size(&self, field: &FieldDef, _: bool, _: &CodecCtx) -> Result<u32, DcclError> {
        Ok(Self::prefix_bits(field)? + 8 * Self::max_length(field)?)
    }

    fn min_size(&self, field: &FieldDef, _: bool, _: &CodecCtx) -> Result<u32, DcclError> {
        Self::prefix_bits(field)
    }

    fn encode(
        &self,
        buf: &mut BitBuffer,
        value: Option<&Value>,
        field: &FieldDef,
        _optional: bool,
        _cx: &CodecCtx,
    ) -> Result<(), DcclError> {
        let max = Self::max_length(field)? as usize;
        let prefix = Self::prefix_bits(field)?;
        let bytes = match value {
            Some(Value::Str(s)) => truncate_utf8(s, max).as_bytes(),
            None => &[],
            Some(_) => return Err(codec_error(field, "expected a string value")),
        };
        if prefix > 0 {
            buf.push_bits(bytes.len() as u64, prefix);
        }
        buf.push_bytes(bytes);
        Ok(())
    }

    fn decode(
        &self,
        buf: &mut BitBuffer,
        field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<Option<Value>, DcclError> {
        let max = Self::max_length(field)?;
        let prefix = Self::prefix_bits(field)?;
        let len = if prefix > 0 { buf.pop_bits(prefix)? } else { 0 };
        if len > max as u64 {
            return Err(codec_error(field, format!("string length {len} over bound {max}")));
        }
        if optional && len == 0 {
            return Ok(None);
        }
        let bytes = buf.pop_bytes(len as usize)?;
        let s = String::from_utf8(bytes)
            .map_err(|_| codec_error(field, "string bytes are not valid UTF-8"))?;
        Ok(Some(Value::Str(s)))
    }
}

// ─── Default bytes ──────────────────────────────────────────────────────────

/// Fixed-width bytes: exactly `max_length` bytes on the wire, zero-padded on
/// short input. Optionals spend one presence bit first.
#[derive(Debug, Default)]
pub struct DefaultBytesCodec;

impl DefaultBytesCodec {
    fn max_length(field: &FieldDef) -> Result<u32, DcclError> {
        field
            .options
            .max_length
            .ok_or_else(|| codec_error(field, "missing max_length"))
    }
}

impl FieldCodec for DefaultBytesCodec {
    fn validate(&self, field: &FieldDef, _cx: &CodecCtx) -> Vec<String> {
        match field.options.max_length {
            None => vec!["missing max_length".into()],
            Some(0) => vec!["max_length must be at least 1".into()],
            Some(_) => Vec::new(),
        }
    }

    fn field_size(
        &self,
        value: Option<&Value>,
        field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<u32, DcclError> {
        let body = 8 * Self::max_length(field)?;
        Ok(match (optional, value) {
            (true, None) => 1,
            (true, Some(_)) => 1 + body,
            (false, _) => body,
        })
    }

    fn max_size(&self, field: &FieldDef, optional: bool, _: &CodecCtx) -> Result<u32, DcclError> {
        Ok(optional as u32 + 8 * Self::max_length(field)?)
    }

    fn min_size(&self, field: &FieldDef, optional: bool, _: &CodecCtx) -> Result<u32, DcclError> {
        Ok(if optional {
            1
        } else {
            8 * Self::max_length(field)?
        })
    }

    fn encode(
        &self,
        buf: &mut BitBuffer,
        value: Option<&Value>,
        field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<(), DcclError> {
        let max = Self::max_length(field)? as usize;
        let bytes = match value {
            Some(Value::Bytes(b)) => Some(b),
            None => None,
            Some(_) => return Err(codec_error(field, "expected a bytes value")),
        };
        if optional {
            buf.push_bit(bytes.is_some());
            if bytes.is_none() {
                return Ok(());
            }
        }
        let bytes = bytes.ok_or_else(|| codec_error(field, "required field is not set"))?;
        let take = bytes.len().min(max);
        buf.push_bytes(&bytes[..take]);
        for _ in take..max {
            buf.push_bits(0, 8);
        }
        Ok(())
    }

    fn decode(
        &self,
        buf: &mut BitBuffer,
        field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<Option<Value>, DcclError> {
        let max = Self::max_length(field)? as usize;
        if optional && buf.pop_bits(1)? == 0 {
            return Ok(None);
        }
        Ok(Some(Value::Bytes(buf.pop_bytes(max)?)))
    }
}

// ─── Variable-length bytes ──────────────────────────────────────────────────

/// Length-prefixed bytes, selected per field with `codec = "var_bytes"`.
/// Cheaper than [`DefaultBytesCodec`] when payloads are usually much shorter
/// than the bound.
#[derive(Debug, Default)]
pub struct VariableBytesCodec;

impl VariableBytesCodec {
    fn max_length(field: &FieldDef) -> Result<u32, DcclError> {
        field
            .options
            .max_length
            .ok_or_else(|| codec_error(field, "missing max_length"))
    }

    fn prefix_bits(field: &FieldDef) -> Result<u32, DcclError> {
        Ok(bits_for(Self::max_length(field)? as u64 + 1))
    }
}

impl FieldCodec for VariableBytesCodec {
    fn validate(&self, field: &FieldDef, _cx: &CodecCtx) -> Vec<String> {
        match field.options.max_length {
            None => vec!["missing max_length".into()],
            Some(0) => vec!["max_length must be at least 1".into()],
            Some(_) => Vec::new(),
        }
    }

    fn field_size(
        &self,
        value: Option<&Value>,
        field: &FieldDef,
        _optional: bool,
        _cx: &CodecCtx,
    ) -> Result<u32, DcclError> {
        let max = Self::max_length(field)? as usize;
        let len = match value {
            Some(Value::Bytes(b)) => b.len().min(max),
            _ => 0,
        };
        Ok(Self::prefix_bits(field)? + 8 * len as u32)
    }

    fn max_size(&self, field: &FieldDef, _: bool, _: &CodecCtx) -> Result<u32, DcclError> {
        Ok(Self::prefix_bits(field)? + 8 * Self::max_length(field)?)
    }

    fn min_size(&self, field: &FieldDef, _: bool, _: &CodecCtx) -> Result<u32, DcclError> {
        Self::prefix_bits(field)
    }

    fn encode(
        &self,
        buf: &mut BitBuffer,
        value: Option<&Value>,
        field: &FieldDef,
        _optional: bool,
        _cx: &CodecCtx,
    ) -> Result<(), DcclError> {
        let max = Self::max_length(field)? as usize;
        let bytes: &[u8] = match value {
            Some(Value::Bytes(b)) => &b[..b.len().min(max)],
            None => &[],
            Some(_) => return Err(codec_error(field, "expected a bytes value")),
        };
        buf.push_bits(bytes.len() as u64, Self::prefix_bits(field)?);
        buf.push_bytes(bytes);
        Ok(())
    }

    fn decode(
        &self,
        buf: &mut BitBuffer,
        field: &FieldDef,
        optional: bool,
        _cx: &CodecCtx,
    ) -> Result<Option<Value>, DcclError> {
        let max = Self::max_length(field)?;
        let len = buf.pop_bits(Self::prefix_bits(field)?)?;
        if len > max as u64 {
            return Err(codec_error(field, format!("length {len} over bound {max}")));
        }
        if optional && len == 0 {
            return Ok(None);
        }
        Ok(Some(Value::Bytes(buf.pop_bytes(len as usize)?)))
    }
}

// ─── Default embedded message ───────────────────────────────────────────────

/// Recursive traversal of the nested schema. Optional nesting spends one
/// presence bit; an absent body contributes nothing beyond it.
#[derive(Debug, Default)]
pub struct DefaultMessageCodec;

impl DefaultMessageCodec {
    fn inner(field: &FieldDef) -> Result<&MessageSchema, DcclError> {
        match &field.kind {
            FieldKind::Message(schema) => Ok(schema),
            _ => Err(codec_error(field, "message codec on a non-message field")),
        }
    }
}

impl FieldCodec for DefaultMessageCodec {
    fn validate(&self, field: &FieldDef, _cx: &CodecCtx) -> Vec<String> {
        // Nested fields are validated by the schema walk itself.
        match Self::inner(field) {
            Ok(_) => Vec::new(),
            Err(e) => vec![e.to_string()],
        }
    }

    fn field_size(
        &self,
        value: Option<&Value>,
        field: &FieldDef,
        optional: bool,
        cx: &CodecCtx,
    ) -> Result<u32, DcclError> {
        let inner = Self::inner(field)?;
        match (optional, value) {
            (true, None) => Ok(1),
            (true, Some(Value::Message(m))) => Ok(1 + size_fields(inner, m, cx)?),
            (false, Some(Value::Message(m))) => size_fields(inner, m, cx),
            (false, None) => Err(codec_error(field, "required field is not set")),
            _ => Err(codec_error(field, "expected a message value")),
        }
    }

    fn max_size(&self, field: &FieldDef, optional: bool, cx: &CodecCtx) -> Result<u32, DcclError> {
        Ok(optional as u32 + max_size_fields(Self::inner(field)?, cx)?)
    }

    fn min_size(&self, field: &FieldDef, optional: bool, cx: &CodecCtx) -> Result<u32, DcclError> {
        if optional {
            Ok(1)
        } else {
            min_size_fields(Self::inner(field)?, cx)
        }
    }

    fn encode(
        &self,
        buf: &mut BitBuffer,
        value: Option<&Value>,
        field: &FieldDef,
        optional: bool,
        cx: &CodecCtx,
    ) -> Result<(), DcclError> {
        let inner = Self::inner(field)?;
        let msg = match value {
            Some(Value::Message(m)) => Some(m),
            None => None,
            Some(_) => return Err(codec_error(field, "expected a message value")),
        };
        if optional {
            buf.push_bit(msg.is_some());
            match msg {
                Some(m) => encode_fields(inner, m, buf, cx),
                None => Ok(()),
            }
        } else {
            let m = msg.ok_or_else(|| codec_error(field, "required field is not set"))?;
            encode_fields(inner, m, buf, cx)
        }
    }

    fn decode(
        &self,
        buf: &mut BitBuffer,
        field: &FieldDef,
        optional: bool,
        cx: &CodecCtx,
    ) -> Result<Option<Value>, DcclError> {
        let inner = Self::inner(field)?;
        if optional && buf.pop_bits(1)? == 0 {
            return Ok(None);
        }
        Ok(Some(Value::Message(decode_fields(inner, buf, cx)?)))
    }
}

// ─── Schema traversal ───────────────────────────────────────────────────────
//
// Declaration order, depth-first. Repeated fields spend a count prefix of
// `ceil(log2(max_count + 1))` bits, then `count` elements encoded as if
// required. Ordering is never alphabetical.

fn repeat_bound(field: &FieldDef) -> Result<u32, DcclError> {
    field
        .options
        .max_count
        .ok_or_else(|| codec_error(field, "repeated field missing max_count"))
}

/// Append every field of `msg` to `buf` in schema order.
pub(crate) fn encode_fields(
    schema: &MessageSchema,
    msg: &DynamicMessage,
    buf: &mut BitBuffer,
    cx: &CodecCtx,
) -> Result<(), DcclError> {
    for field in &schema.fields {
        let codec = cx.codec_for(field)?;
        match field.label {
            Label::Repeated => {
                let max = repeat_bound(field)?;
                let values = msg.get_all(&field.name);
                // Silent truncation at the declared bound.
                let count = values.len().min(max as usize);
                let count_bits = bits_for(max as u64 + 1);
                if count_bits > 0 {
                    buf.push_bits(count as u64, count_bits);
                }
                for v in &values[..count] {
                    codec.encode(buf, Some(v), field, false, cx)?;
                }
            }
            Label::Optional => codec.encode(buf, msg.get(&field.name), field, true, cx)?,
            Label::Required => {
                let v = msg
                    .get(&field.name)
                    .ok_or_else(|| codec_error(field, "required field is not set"))?;
                codec.encode(buf, Some(v), field, false, cx)?;
            }
        }
    }
    Ok(())
}

/// Rebuild a message by consuming `buf` in schema order.
pub(crate) fn decode_fields(
    schema: &MessageSchema,
    buf: &mut BitBuffer,
    cx: &CodecCtx,
) -> Result<DynamicMessage, DcclError> {
    let mut msg = DynamicMessage::new();
    for field in &schema.fields {
        let codec = cx.codec_for(field)?;
        match field.label {
            Label::Repeated => {
                let max = repeat_bound(field)?;
                let count_bits = bits_for(max as u64 + 1);
                let count = if count_bits > 0 {
                    buf.pop_bits(count_bits)?
                } else {
                    0
                };
                if count > max as u64 {
                    return Err(codec_error(
                        field,
                        format!("repeat count {count} over bound {max}"),
                    ));
                }
                for _ in 0..count {
                    match codec.decode(buf, field, false, cx)? {
                        Some(v) => {
                            msg.push(&field.name, v);
                        }
                        None => {
                            return Err(codec_error(field, "missing repeated element"));
                        }
                    }
                }
            }
            Label::Optional => {
                if let Some(v) = codec.decode(buf, field, true, cx)? {
                    msg.set(&field.name, v);
                }
            }
            Label::Required => {
                let v = codec
                    .decode(buf, field, false, cx)?
                    .ok_or_else(|| codec_error(field, "missing required value"))?;
                msg.set(&field.name, v);
            }
        }
    }
    Ok(msg)
}

/// Exact bit width `msg` occupies under `schema`.
pub(crate) fn size_fields(
    schema: &MessageSchema,
    msg: &DynamicMessage,
    cx: &CodecCtx,
) -> Result<u32, DcclError> {
    let mut bits = 0u32;
    for field in &schema.fields {
        let codec = cx.codec_for(field)?;
        match field.label {
            Label::Repeated => {
                let max = repeat_bound(field)?;
                let values = msg.get_all(&field.name);
                let count = values.len().min(max as usize);
                bits += bits_for(max as u64 + 1);
                for v in &values[..count] {
                    bits += codec.field_size(Some(v), field, false, cx)?;
                }
            }
            Label::Optional => {
                bits += codec.field_size(msg.get(&field.name), field, true, cx)?;
            }
            Label::Required => {
                bits += codec.field_size(msg.get(&field.name), field, false, cx)?;
            }
        }
    }
    Ok(bits)
}

/// Schema-time upper bound on the body width.
pub(crate) fn max_size_fields(schema: &MessageSchema, cx: &CodecCtx) -> Result<u32, DcclError> {
    let mut bits = 0u32;
    for field in &schema.fields {
        let codec = cx.codec_for(field)?;
        match field.label {
            Label::Repeated => {
                let max = repeat_bound(field)?;
                bits += bits_for(max as u64 + 1) + max * codec.max_size(field, false, cx)?;
            }
            Label::Optional => bits += codec.max_size(field, true, cx)?,
            Label::Required => bits += codec.max_size(field, false, cx)?,
        }
    }
    Ok(bits)
}

/// Schema-time lower bound on the body width.
pub(crate) fn min_size_fields(schema: &MessageSchema, cx: &CodecCtx) -> Result<u32, DcclError> {
    let mut bits = 0u32;
    for field in &schema.fields {
        let codec = cx.codec_for(field)?;
        match field.label {
            Label::Repeated => bits += bits_for(repeat_bound(field)? as u64 + 1),
            Label::Optional => bits += codec.min_size(field, true, cx)?,
            Label::Required => bits += codec.min_size(field, false, cx)?,
        }
    }
    Ok(bits)
}

/// Collect every schema problem, recursing through embedded messages.
pub(crate) fn validate_fields(
    schema: &MessageSchema,
    cx: &CodecCtx,
    path: &str,
    causes: &mut Vec<ValidationCause>,
) {
    for field in &schema.fields {
        let fpath = if path.is_empty() {
            field.name.clone()
        } else {
            format!("{path}.{}", field.name)
        };
        if field.label == Label::Repeated {
            match field.options.max_count {
                None => causes.push(ValidationCause {
                    path: fpath.clone(),
                    reason: "repeated field missing max_count".into(),
                }),
                Some(0) => causes.push(ValidationCause {
                    path: fpath.clone(),
                    reason: "max_count must be at least 1".into(),
                }),
                Some(_) => {}
            }
        }
        match cx.codec_for(field) {
            Err(e) => causes.push(ValidationCause {
                path: fpath.clone(),
                reason: e.to_string(),
            }),
            Ok(codec) => {
                for reason in codec.validate(field, cx) {
                    causes.push(ValidationCause {
                        path: fpath.clone(),
                        reason,
                    });
                }
            }
        }
        if let FieldKind::Message(inner) = &field.kind {
            validate_fields(inner, cx, &fpath, causes);
        }
    }
}
