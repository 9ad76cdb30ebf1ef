//! # Field codec registry
//!
//! Maps `(wire class, codec name)` to a codec implementation. Every wire
//! class has a `"_default_"` entry installed at engine construction; hosts
//! and plugins add named codecs on top and select them per field through the
//! `codec` option. A side table holds the codec used for the header's DCCL
//! id field (default: plain fixed-width 9-bit unsigned).
//!
//! The registry is owned by the engine (no process-global state) and is
//! treated as read-only once loading begins.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::bits::BitBuffer;
use crate::codecs::FieldCodec;
use crate::error::DcclError;
use crate::header::DCCL_ID_BITS;
use crate::schema::WireClass;

/// Codec name used when a field carries no `codec` option.
pub const DEFAULT_CODEC_NAME: &str = "_default_";

/// Name of the built-in header id codec.
pub const DEFAULT_ID_CODEC_NAME: &str = "_default_id_codec";

// ─── Id codec ───────────────────────────────────────────────────────────────

/// Encodes the DCCL id inside the header. Swappable so deployments with very
/// few message types can shrink the header, at the cost of interoperability.
pub trait IdCodec: Send + Sync {
    /// Encoded width in bits.
    fn size_bits(&self) -> u32;
    /// Largest representable id.
    fn max_id(&self) -> u16;
    fn encode(&self, id: u16, buf: &mut BitBuffer) -> Result<(), DcclError>;
    fn decode(&self, buf: &mut BitBuffer) -> Result<u16, DcclError>;
}

/// Plain fixed-width 9-bit unsigned id.
#[derive(Debug, Default)]
pub struct FixedIdCodec;

impl IdCodec for FixedIdCodec {
    fn size_bits(&self) -> u32 {
        DCCL_ID_BITS
    }

    fn max_id(&self) -> u16 {
        (1 << DCCL_ID_BITS) - 1
    }

    fn encode(&self, id: u16, buf: &mut BitBuffer) -> Result<(), DcclError> {
        buf.push_bits(id as u64, DCCL_ID_BITS);
        Ok(())
    }

    fn decode(&self, buf: &mut BitBuffer) -> Result<u16, DcclError> {
        Ok(buf.pop_bits(DCCL_ID_BITS)? as u16)
    }
}

// ─── Registry ───────────────────────────────────────────────────────────────

struct Registered<T: ?Sized> {
    /// Implementation identity, for idempotent re-registration checks.
    type_id: TypeId,
    codec: Arc<T>,
}

/// Name + wire-class → codec lookup with conflict detection.
pub struct FieldCodecRegistry {
    codecs: HashMap<(WireClass, String), Registered<dyn FieldCodec>>,
    id_codecs: HashMap<String, Registered<dyn IdCodec>>,
}

impl FieldCodecRegistry {
    /// Empty registry. The engine installs the `"_default_"` set on top.
    pub fn new() -> Self {
        FieldCodecRegistry {
            codecs: HashMap::new(),
            id_codecs: HashMap::new(),
        }
    }

    /// Register `codec` for `(class, name)`.
    ///
    /// Registering the same implementation type twice is a no-op; a different
    /// implementation under an existing key fails with
    /// [`DcclError::CodecConflict`].
    pub fn register<C: FieldCodec + 'static>(
        &mut self,
        class: WireClass,
        name: impl Into<String>,
        codec: C,
    ) -> Result<(), DcclError> {
        let name = name.into();
        let type_id = TypeId::of::<C>();
        if let Some(existing) = self.codecs.get(&(class, name.clone())) {
            if existing.type_id == type_id {
                return Ok(());
            }
            return Err(DcclError::CodecConflict { class, name });
        }
        tracing::debug!(?class, name, "registered field codec");
        self.codecs.insert(
            (class, name),
            Registered {
                type_id,
                codec: Arc::new(codec),
            },
        );
        Ok(())
    }

    /// Look up the codec for `(class, name)`.
    pub fn lookup(&self, class: WireClass, name: &str) -> Result<Arc<dyn FieldCodec>, DcclError> {
        self.codecs
            .get(&(class, name.to_string()))
            .map(|r| Arc::clone(&r.codec))
            .ok_or_else(|| DcclError::UnknownCodec {
                class,
                name: name.to_string(),
            })
    }

    /// Register an id codec under `name`, same conflict rules as [`register`].
    ///
    /// [`register`]: FieldCodecRegistry::register
    pub fn register_id_codec<C: IdCodec + 'static>(
        &mut self,
        name: impl Into<String>,
        codec: C,
    ) -> Result<(), DcclError> {
        let name = name.into();
        let type_id = TypeId::of::<C>();
        if let Some(existing) = self.id_codecs.get(&name) {
            if existing.type_id == type_id {
                return Ok(());
            }
            // Id codecs dispatch on the numeric class, like any integer field.
            return Err(DcclError::CodecConflict {
                class: WireClass::Numeric,
                name,
            });
        }
        self.id_codecs.insert(
            name,
            Registered {
                type_id,
                codec: Arc::new(codec),
            },
        );
        Ok(())
    }

    pub fn lookup_id_codec(&self, name: &str) -> Result<Arc<dyn IdCodec>, DcclError> {
        self.id_codecs
            .get(name)
            .map(|r| Arc::clone(&r.codec))
            .ok_or_else(|| DcclError::UnknownCodec {
                class: WireClass::Numeric,
                name: name.to_string(),
            })
    }
}

impl Default for FieldCodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::{CodecCtx, DefaultBoolCodec};
    use crate::schema::{FieldDef, Value};

    /// Minimal stand-in codec for conflict tests.
    struct OtherBoolCodec;

    impl FieldCodec for OtherBoolCodec {
        fn validate(&self, _: &FieldDef, _: &CodecCtx) -> Vec<String> {
            Vec::new()
        }
        fn field_size(
            &self,
            _: Option<&Value>,
            _: &FieldDef,
            _: bool,
            _: &CodecCtx,
        ) -> Result<u32, DcclError> {
            Ok(1)
        }
        fn max_size(&self, _: &FieldDef, _: bool, _: &CodecCtx) -> Result<u32, DcclError> {
            Ok(1)
        }
        fn min_size(&self, _: &FieldDef, _: bool, _: &CodecCtx) -> Result<u32, DcclError> {
            Ok(1)
        }
        fn encode(
            &self,
            _: &mut BitBuffer,
            _: Option<&Value>,
            _: &FieldDef,
            _: bool,
            _: &CodecCtx,
        ) -> Result<(), DcclError> {
            Ok(())
        }
        fn decode(
            &self,
            _: &mut BitBuffer,
            _: &FieldDef,
            _: bool,
            _: &CodecCtx,
        ) -> Result<Option<Value>, DcclError> {
            Ok(None)
        }
    }

    #[test]
    fn lookup_unknown_pair_fails() {
        let reg = FieldCodecRegistry::new();
        let err = match reg.lookup(WireClass::Bool, DEFAULT_CODEC_NAME) {
            Err(e) => e,
            Ok(_) => panic!("expected lookup to fail"),
        };
        assert!(matches!(err, DcclError::UnknownCodec { .. }));
    }

    #[test]
    fn reregistration_same_impl_is_idempotent() {
        let mut reg = FieldCodecRegistry::new();
        reg.register(WireClass::Bool, DEFAULT_CODEC_NAME, DefaultBoolCodec)
            .unwrap();
        reg.register(WireClass::Bool, DEFAULT_CODEC_NAME, DefaultBoolCodec)
            .unwrap();
        assert!(reg.lookup(WireClass::Bool, DEFAULT_CODEC_NAME).is_ok());
    }

    #[test]
    fn conflicting_registration_fails() {
        let mut reg = FieldCodecRegistry::new();
        reg.register(WireClass::Bool, DEFAULT_CODEC_NAME, DefaultBoolCodec)
            .unwrap();
        let err = reg
            .register(WireClass::Bool, DEFAULT_CODEC_NAME, OtherBoolCodec)
            .unwrap_err();
        assert!(matches!(err, DcclError::CodecConflict { .. }));
    }

    #[test]
    fn fixed_id_codec_is_nine_bits() {
        let codec = FixedIdCodec;
        assert_eq!(codec.size_bits(), 9);
        assert_eq!(codec.max_id(), 511);

        let mut buf = BitBuffer::new();
        codec.encode(507, &mut buf).unwrap();
        assert_eq!(buf.len_bits(), 9);
        assert_eq!(codec.decode(&mut buf).unwrap(), 507);
    }
}
