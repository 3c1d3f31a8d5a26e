//! Pluggable key/value serialization
//!
//! The engine moves opaque bytes. Processors that want typed keys and values
//! pick a [`Serde`] and convert at their own boundary; a decode failure is a
//! [`StreamsError::Serialization`] that the task attributes to the node.

use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;

use crate::error::{Result, StreamsError};

/// Converts values of `T` to and from bytes
pub trait Serde<T>: Send + Sync {
    fn serialize(&self, value: &T) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<T>;
}

/// Identity serde for raw payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerde;

impl Serde<Vec<u8>> for BytesSerde {
    fn serialize(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// UTF-8 strings
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerde;

impl Serde<String> for StringSerde {
    fn serialize(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String> {
        Ok(std::str::from_utf8(bytes)?.to_string())
    }
}

/// 64-bit signed integers, big-endian
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerSerde;

impl Serde<i64> for IntegerSerde {
    fn serialize(&self, value: &i64) -> Result<Vec<u8>> {
        Ok(value.to_be_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<i64> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| {
            StreamsError::Serialization(format!("expected 8 bytes for i64, got {}", bytes.len()))
        })?;
        Ok(i64::from_be_bytes(raw))
    }
}

/// 64-bit floats, big-endian
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleSerde;

impl Serde<f64> for DoubleSerde {
    fn serialize(&self, value: &f64) -> Result<Vec<u8>> {
        Ok(value.to_be_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<f64> {
        let raw: [u8; 8] = bytes.try_into().map_err(|_| {
            StreamsError::Serialization(format!("expected 8 bytes for f64, got {}", bytes.len()))
        })?;
        Ok(f64::from_be_bytes(raw))
    }
}

/// JSON documents via serde_json
#[derive(Debug)]
pub struct JsonSerde<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerde<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSerde<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonSerde<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Serde<T> for JsonSerde<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: String,
        value: f64,
    }

    #[test]
    fn test_string_serde_rejects_invalid_utf8() {
        let serde = StringSerde;
        assert_eq!(serde.deserialize(b"the cat").unwrap(), "the cat");

        let err = serde.deserialize(&[0xc3, 0x28]).unwrap_err();
        assert!(matches!(err, StreamsError::Serialization(_)));
    }

    #[test]
    fn test_integer_serde_layout() {
        let serde = IntegerSerde;
        assert_eq!(serde.serialize(&1).unwrap(), vec![0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(serde.deserialize(&[0xff; 8]).unwrap(), -1);
        assert!(serde.deserialize(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_double_serde() {
        let serde = DoubleSerde;
        let bytes = serde.serialize(&2.5).unwrap();
        assert_eq!(serde.deserialize(&bytes).unwrap(), 2.5);
        assert!(serde.deserialize(&[]).is_err());
    }

    #[test]
    fn test_json_serde() {
        let serde = JsonSerde::<Reading>::new();
        let bytes = br#"{"sensor":"t1","value":21.5}"#;
        let reading = serde.deserialize(bytes).unwrap();
        assert_eq!(reading.sensor, "t1");

        assert!(serde.deserialize(b"not json").is_err());
    }
}
