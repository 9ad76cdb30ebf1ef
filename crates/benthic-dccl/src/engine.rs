//! # Codec engine
//!
//! Owns the registry, the loaded-schema table, and the crypto state, and
//! orchestrates the whole wire format: header, schema-ordered body walk,
//! optional body encryption. `load`/`set_crypto_passphrase` take `&mut self`
//! and run at startup; `encode`/`decode`/`id`/`size` are `&self` and safe to
//! call concurrently once loading is done.
//!
//! Hosts extend the engine with plugins: a [`CodecPlugin`] is a plain
//! function receiving the engine by reference and registering codecs into it.
//! No global state, no dynamic symbol lookup; tests build engines in
//! isolation.

use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::bits::BitBuffer;
use crate::codecs::{
    decode_fields, encode_fields, max_size_fields, min_size_fields, size_fields, validate_fields,
    CodecCtx, DefaultBoolCodec, DefaultBytesCodec, DefaultEnumCodec, DefaultMessageCodec,
    DefaultNumericCodec, DefaultStringCodec, FieldCodec,
};
use crate::crypto::CryptoState;
use crate::error::{DcclError, ValidationCause};
use crate::header::Header;
use crate::registry::{
    FieldCodecRegistry, FixedIdCodec, IdCodec, DEFAULT_CODEC_NAME, DEFAULT_ID_CODEC_NAME,
};
use crate::schema::{DynamicMessage, MessageSchema, WireClass};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Frame budget: no loaded schema may exceed this many encoded bytes.
    pub max_frame_bytes: usize,
    /// Name of the id codec used for the header's DCCL id field.
    pub id_codec: String,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            max_frame_bytes: 256,
            id_codec: DEFAULT_ID_CODEC_NAME.to_string(),
        }
    }
}

/// Plugin entry point: registers codecs into the engine it receives.
pub type CodecPlugin = fn(&mut Codec) -> Result<(), String>;

// ─── Engine ─────────────────────────────────────────────────────────────────

struct LoadedSchema {
    schema: Arc<MessageSchema>,
    max_body_bits: u32,
    min_body_bits: u32,
}

/// The DCCL codec: schema table + registry + crypto.
pub struct Codec {
    cfg: CodecConfig,
    registry: FieldCodecRegistry,
    schemas: BTreeMap<u16, LoadedSchema>,
    crypto: Option<CryptoState>,
    /// Encoded-size memo keyed by (id, message fingerprint).
    size_memo: Mutex<HashMap<(u16, u64), usize>>,
}

impl Codec {
    /// Build an engine with the default codec set installed.
    pub fn new(cfg: CodecConfig) -> Result<Self, DcclError> {
        let mut registry = FieldCodecRegistry::new();
        registry.register(WireClass::Numeric, DEFAULT_CODEC_NAME, DefaultNumericCodec)?;
        registry.register(WireClass::Bool, DEFAULT_CODEC_NAME, DefaultBoolCodec)?;
        registry.register(WireClass::Enum, DEFAULT_CODEC_NAME, DefaultEnumCodec)?;
        registry.register(WireClass::String, DEFAULT_CODEC_NAME, DefaultStringCodec)?;
        registry.register(WireClass::Bytes, DEFAULT_CODEC_NAME, DefaultBytesCodec)?;
        registry.register(WireClass::Message, DEFAULT_CODEC_NAME, DefaultMessageCodec)?;
        registry.register_id_codec(DEFAULT_ID_CODEC_NAME, FixedIdCodec)?;
        Ok(Codec {
            cfg,
            registry,
            schemas: BTreeMap::new(),
            crypto: None,
            size_memo: Mutex::new(HashMap::new()),
        })
    }

    // ─── Registration ───────────────────────────────────────────────────

    /// Register a field codec under `(class, name)`.
    pub fn register_codec<C: FieldCodec + 'static>(
        &mut self,
        class: WireClass,
        name: impl Into<String>,
        codec: C,
    ) -> Result<(), DcclError> {
        self.registry.register(class, name, codec)
    }

    /// Register an id codec under `name`; select it via [`CodecConfig::id_codec`].
    pub fn register_id_codec<C: IdCodec + 'static>(
        &mut self,
        name: impl Into<String>,
        codec: C,
    ) -> Result<(), DcclError> {
        self.registry.register_id_codec(name, codec)
    }

    /// Run a plugin entry point against this engine.
    pub fn load_plugin(&mut self, plugin: CodecPlugin) -> Result<(), DcclError> {
        plugin(self).map_err(DcclError::Plugin)
    }

    /// Configure body encryption. Must run before any encode/decode.
    pub fn set_crypto_passphrase(&mut self, passphrase: &str) {
        self.crypto = Some(CryptoState::from_passphrase(passphrase));
    }

    // ─── Loading ────────────────────────────────────────────────────────

    /// Validate `schema` and cache its traversal plan. Returns the DCCL id.
    ///
    /// Every cause found is collected into one
    /// [`DcclError::Validation`], not just the first.
    pub fn load(&mut self, schema: MessageSchema) -> Result<u16, DcclError> {
        let cx = CodecCtx::new(&self.registry);
        let id_codec = self.id_codec()?;
        let mut causes = Vec::new();

        let id = match schema.dccl_id {
            Some(id) => {
                if id > id_codec.max_id() {
                    causes.push(ValidationCause {
                        path: schema.name.clone(),
                        reason: format!(
                            "dccl id {id} exceeds id codec bound {}",
                            id_codec.max_id()
                        ),
                    });
                }
                if let Some(existing) = self.schemas.get(&id) {
                    if *existing.schema == schema {
                        // Idempotent reload of an identical schema.
                        return Ok(id);
                    }
                    causes.push(ValidationCause {
                        path: schema.name.clone(),
                        reason: format!(
                            "dccl id {id} already in use by `{}`",
                            existing.schema.name
                        ),
                    });
                }
                id
            }
            None => {
                causes.push(ValidationCause {
                    path: schema.name.clone(),
                    reason: "embedded-only schema (no dccl id) cannot be loaded".into(),
                });
                0
            }
        };

        validate_fields(&schema, &cx, "", &mut causes);

        let mut max_body_bits = 0;
        let mut min_body_bits = 0;
        if causes.is_empty() {
            // Size bounds only make sense on a structurally valid schema.
            max_body_bits = max_size_fields(&schema, &cx)?;
            min_body_bits = min_size_fields(&schema, &cx)?;
            let max_bytes = bytes_for(Header::size_bits(id_codec.as_ref()) + max_body_bits);
            if max_bytes > self.cfg.max_frame_bytes {
                causes.push(ValidationCause {
                    path: schema.name.clone(),
                    reason: format!(
                        "max encoded size {max_bytes} B exceeds frame budget {} B",
                        self.cfg.max_frame_bytes
                    ),
                });
            }
        }

        if !causes.is_empty() {
            tracing::warn!(
                schema = %schema.name,
                causes = causes.len(),
                "schema rejected at load"
            );
            return Err(DcclError::Validation(causes));
        }

        tracing::debug!(
            schema = %schema.name,
            dccl_id = id,
            max_body_bits,
            "schema loaded"
        );
        self.schemas.insert(
            id,
            LoadedSchema {
                schema: Arc::new(schema),
                max_body_bits,
                min_body_bits,
            },
        );
        Ok(id)
    }

    /// DCCL ids loaded so far, ascending.
    pub fn loaded_ids(&self) -> Vec<u16> {
        self.schemas.keys().copied().collect()
    }

    /// The cached schema for an id.
    pub fn schema(&self, id: u16) -> Option<Arc<MessageSchema>> {
        self.schemas.get(&id).map(|l| Arc::clone(&l.schema))
    }

    // ─── Codec operations ───────────────────────────────────────────────

    /// Encode `msg` behind `header`. All-or-nothing: any failure leaves no
    /// partial output.
    pub fn encode(&self, header: &Header, msg: &DynamicMessage) -> Result<Bytes, DcclError> {
        let loaded = self
            .schemas
            .get(&header.dccl_id)
            .ok_or(DcclError::UnknownId(header.dccl_id))?;
        let id_codec = self.id_codec()?;
        let cx = CodecCtx::new(&self.registry);

        let mut body = BitBuffer::new();
        encode_fields(&loaded.schema, msg, &mut body, &cx)?;

        let mut hdr_buf = BitBuffer::new();
        header.encode(&mut hdr_buf, id_codec.as_ref())?;
        let header_bytes = hdr_buf.to_bytes();

        let mut body_bytes = body.to_bytes().to_vec();
        if let Some(crypto) = &self.crypto {
            crypto.encrypt(&header_bytes, &mut body_bytes);
        }

        let mut out = BytesMut::with_capacity(header_bytes.len() + body_bytes.len());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&body_bytes);
        Ok(out.freeze())
    }

    /// Decode a frame into its header and message.
    pub fn decode(&self, bytes: &[u8]) -> Result<(Header, DynamicMessage), DcclError> {
        let id_codec = self.id_codec()?;
        let header_len = bytes_for(Header::size_bits(id_codec.as_ref()));
        if bytes.len() < header_len {
            return Err(DcclError::ShortFrame {
                requested: Header::size_bits(id_codec.as_ref()),
                available: bytes.len() as u32 * 8,
            });
        }

        let mut hdr_buf = BitBuffer::from_bytes(&bytes[..header_len]);
        let header = Header::decode(&mut hdr_buf, id_codec.as_ref())?;
        let loaded = self
            .schemas
            .get(&header.dccl_id)
            .ok_or(DcclError::UnknownId(header.dccl_id))?;

        let mut body = bytes[header_len..].to_vec();
        if let Some(crypto) = &self.crypto {
            crypto.decrypt(&bytes[..header_len], &mut body);
        }

        let cx = CodecCtx::new(&self.registry);
        let mut buf = BitBuffer::from_bytes(&body);
        match decode_fields(&loaded.schema, &mut buf, &cx) {
            Ok(msg) => Ok((header, msg)),
            // With a passphrase configured, garbage bits mean the keystream
            // did not match; surface that, not the field-level symptom.
            Err(e) if self.crypto.is_some() && is_garbage_symptom(&e) => {
                tracing::warn!(dccl_id = header.dccl_id, symptom = %e, "body failed to decode under passphrase");
                Err(DcclError::DecryptFailed)
            }
            Err(e) => Err(e),
        }
    }

    /// Read the DCCL id of an encoded frame without decoding the body.
    pub fn id(&self, bytes: &[u8]) -> Result<u16, DcclError> {
        let id_codec = self.id_codec()?;
        let mut buf = BitBuffer::from_bytes(bytes);
        buf.pop_bits(crate::header::CCL_ID_BITS)?;
        id_codec.decode(&mut buf)
    }

    /// Byte count [`Codec::encode`] would emit for `msg`, memoized per
    /// message fingerprint.
    pub fn size(&self, id: u16, msg: &DynamicMessage) -> Result<usize, DcclError> {
        let key = (id, msg.fingerprint());
        if let Ok(memo) = self.size_memo.lock() {
            if let Some(&n) = memo.get(&key) {
                return Ok(n);
            }
        }

        let loaded = self.schemas.get(&id).ok_or(DcclError::UnknownId(id))?;
        let id_codec = self.id_codec()?;
        let cx = CodecCtx::new(&self.registry);
        let bits = Header::size_bits(id_codec.as_ref()) + size_fields(&loaded.schema, msg, &cx)?;
        let n = bytes_for(bits);

        if let Ok(mut memo) = self.size_memo.lock() {
            memo.insert(key, n);
        }
        Ok(n)
    }

    /// Largest frame any message of `id` can produce, in bytes.
    pub fn max_size(&self, id: u16) -> Result<usize, DcclError> {
        let loaded = self.schemas.get(&id).ok_or(DcclError::UnknownId(id))?;
        let id_codec = self.id_codec()?;
        Ok(bytes_for(
            Header::size_bits(id_codec.as_ref()) + loaded.max_body_bits,
        ))
    }

    /// Smallest frame any message of `id` can produce, in bytes.
    pub fn min_size(&self, id: u16) -> Result<usize, DcclError> {
        let loaded = self.schemas.get(&id).ok_or(DcclError::UnknownId(id))?;
        let id_codec = self.id_codec()?;
        Ok(bytes_for(
            Header::size_bits(id_codec.as_ref()) + loaded.min_body_bits,
        ))
    }

    // ─── Informational ──────────────────────────────────────────────────

    /// Human-readable per-field size breakdown for one loaded schema.
    pub fn info(&self, id: u16) -> Result<String, DcclError> {
        let loaded = self.schemas.get(&id).ok_or(DcclError::UnknownId(id))?;
        let id_codec = self.id_codec()?;
        let cx = CodecCtx::new(&self.registry);

        let mut out = format!(
            "{} (dccl id {id}): {}..{} bytes\n",
            loaded.schema.name,
            self.min_size(id)?,
            self.max_size(id)?
        );
        out.push_str(&format!(
            "  [header] {} bits\n",
            Header::size_bits(id_codec.as_ref())
        ));
        for field in &loaded.schema.fields {
            let codec = cx.codec_for(field)?;
            let optional = field.label == crate::schema::Label::Optional;
            let min = codec.min_size(field, optional, &cx)?;
            let max = codec.max_size(field, optional, &cx)?;
            if min == max {
                out.push_str(&format!("  {} {} bits\n", field.name, max));
            } else {
                out.push_str(&format!("  {} {}..{} bits\n", field.name, min, max));
            }
        }
        Ok(out)
    }

    /// Summary of every loaded schema.
    pub fn info_all(&self) -> String {
        let mut out = format!("{} DCCL schemas loaded:\n", self.schemas.len());
        for id in self.schemas.keys() {
            if let Ok(text) = self.info(*id) {
                out.push_str(&text);
            }
        }
        out
    }

    fn id_codec(&self) -> Result<Arc<dyn IdCodec>, DcclError> {
        self.registry.lookup_id_codec(&self.cfg.id_codec)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.info_all())
    }
}

fn bytes_for(bits: u32) -> usize {
    bits.div_ceil(8) as usize
}

/// Decode symptoms consistent with a keystream mismatch.
fn is_garbage_symptom(e: &DcclError) -> bool {
    matches!(
        e,
        DcclError::FieldDecode { .. } | DcclError::ShortFrame { .. }
    )
}
