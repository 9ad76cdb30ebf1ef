//! # benthic-dccl
//!
//! Dynamic Compact Communications Library: a schema-driven, bit-level codec
//! for very low-bandwidth acoustic modems (tens to hundreds of bits per
//! transmission). Messages are described by a recursive schema with per-field
//! bounds; the codec packs each field into the minimum number of bits, MSB
//! first and without byte alignment, behind a fixed 48-bit header carrying
//! the message id, time of day, and addressing.
//!
//! ## Crate structure
//!
//! - [`bits`] — MSB-first arbitrary-width bit buffer
//! - [`schema`] — schema model, field options, dynamic messages
//! - [`registry`] — (wire class, name) → codec lookup, id-codec side table
//! - [`codecs`] — default field codecs and the schema traversal
//! - [`header`] — 48-bit wire preamble, byte-level peeks and flag patches
//! - [`crypto`] — passphrase-keyed AES-CFB body encryption
//! - [`engine`] — the [`Codec`](engine::Codec): load, encode, decode, id, size
//!
//! ## Example
//!
//! ```
//! use benthic_dccl::engine::{Codec, CodecConfig};
//! use benthic_dccl::header::Header;
//! use benthic_dccl::schema::*;
//!
//! let mut codec = Codec::new(CodecConfig::default())?;
//! codec.load(MessageSchema {
//!     name: "Ping".into(),
//!     dccl_id: Some(1),
//!     fields: vec![FieldDef {
//!         name: "range_m".into(),
//!         label: Label::Required,
//!         kind: FieldKind::Numeric(NumericType::Int32),
//!         options: FieldOptions {
//!             min: Some(0.0),
//!             max: Some(5000.0),
//!             ..Default::default()
//!         },
//!     }],
//! })?;
//!
//! let mut msg = DynamicMessage::new();
//! msg.set("range_m", Value::Integer(1200));
//! let bytes = codec.encode(&Header::new(1, 0, 2, 3), &msg)?;
//! let (_, out) = codec.decode(&bytes)?;
//! assert_eq!(out, msg);
//! # Ok::<(), benthic_dccl::error::DcclError>(())
//! ```

pub mod bits;
pub mod codecs;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod header;
pub mod registry;
pub mod schema;

pub use engine::{Codec, CodecConfig, CodecPlugin};
pub use error::DcclError;
pub use header::{Header, BROADCAST_ID, DCCL_CCL_ID, QUERY_DESTINATION_ID};
pub use schema::{DynamicMessage, MessageSchema, Value};
