//! The serializer contract between a produced value and the bytes a [`crate::backend::Backend`]
//! stores.

use serde::{de::DeserializeOwned, Serialize};

/// Converts a produced value to and from the bytes a back end persists.
///
/// `dumps` returns both the encoded bytes and a `size`, which may differ from
/// `bytes.len()` when a back end's accounting should reflect overhead the raw
/// encoding does not (e.g. on-disk block size). The engine charges `size`
/// against `max_size`, never `bytes.len()`.
pub trait Serializer<V> {
    /// The error produced by a failed encode or decode.
    type Error: std::fmt::Display;

    /// Encodes `value`, returning `(size, bytes)`.
    fn dumps(&self, value: &V) -> Result<(u64, Vec<u8>), Self::Error>;

    /// Decodes a value previously produced by [`Serializer::dumps`].
    fn loads(&self, bytes: &[u8]) -> Result<V, Self::Error>;
}

/// Reference [`Serializer`] built on `bincode`, sizing by the encoded length.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeSerializer;

impl<V> Serializer<V> for BincodeSerializer
where
    V: Serialize + DeserializeOwned,
{
    type Error = bincode::Error;

    fn dumps(&self, value: &V) -> Result<(u64, Vec<u8>), Self::Error> {
        let bytes = bincode::serialize(value)?;
        Ok((bytes.len() as u64, bytes))
    }

    fn loads(&self, bytes: &[u8]) -> Result<V, Self::Error> {
        bincode::deserialize(bytes)
    }
}
