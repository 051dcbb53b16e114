pub mod codec;
pub mod entity;
pub mod fingerprint;

pub use codec::{CodecError, CompressionCodec};
pub use entity::{EntityId, entity_type};
pub use fingerprint::{fingerprint, fingerprint_hex};
