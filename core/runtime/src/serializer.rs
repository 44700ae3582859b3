// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::exception::{Exception, ExceptionRecord, ExceptionRegistry, GenericException};

#[derive(Error, Debug)]
pub enum SerializerError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Text format used on the wire for arguments, results and exceptions.
///
/// Implementations work on the structured [`Value`] model so the trait
/// stays object safe and formats can be swapped by name.
pub trait Serializer: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn write(&self, value: &Value) -> Result<String, SerializerError>;

    fn read(&self, text: &str) -> Result<Value, SerializerError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &str {
        "json"
    }

    fn write(&self, value: &Value) -> Result<String, SerializerError> {
        Ok(serde_json::to_string(value)?)
    }

    fn read(&self, text: &str) -> Result<Value, SerializerError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct YamlSerializer;

impl Serializer for YamlSerializer {
    fn name(&self) -> &str {
        "yaml"
    }

    fn write(&self, value: &Value) -> Result<String, SerializerError> {
        Ok(serde_yaml::to_string(value)?)
    }

    fn read(&self, text: &str) -> Result<Value, SerializerError> {
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Typed encoding on top of a [`Serializer`], plus the exception registry
/// used to carry faults across the wire.
#[derive(Debug, Clone)]
pub struct WireCodec {
    format: Arc<dyn Serializer>,
    exceptions: Arc<ExceptionRegistry>,
}

impl Default for WireCodec {
    fn default() -> Self {
        WireCodec::new(Arc::new(JsonSerializer), Arc::new(ExceptionRegistry::default()))
    }
}

impl WireCodec {
    pub fn new(format: Arc<dyn Serializer>, exceptions: Arc<ExceptionRegistry>) -> Self {
        WireCodec { format, exceptions }
    }

    pub fn format(&self) -> &str {
        self.format.name()
    }

    pub fn exceptions(&self) -> &ExceptionRegistry {
        &self.exceptions
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, SerializerError> {
        let value = serde_json::to_value(value)?;
        self.format.write(&value)
    }

    pub fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, SerializerError> {
        let value = self.format.read(text)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn encode_exception(&self, exception: &Exception) -> Result<String, SerializerError> {
        let record = self.exceptions.marshal(exception);
        self.encode(&record)
    }

    /// Rebuilds an exception from its wire form. Payloads that cannot be
    /// parsed become a generic exception carrying the raw text.
    pub fn decode_exception(&self, text: &str) -> Exception {
        match self.decode::<ExceptionRecord>(text) {
            Ok(record) => self.exceptions.unmarshal(record),
            Err(_) => Exception::new(GenericException::new(text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
        label: Option<String>,
    }

    #[test]
    fn test_json_format() {
        let codec = WireCodec::default();
        assert_eq!(codec.format(), "json");

        let text = codec
            .encode(&Point {
                x: 1,
                y: -2,
                label: None,
            })
            .unwrap();
        assert_eq!(text, r#"{"label":null,"x":1,"y":-2}"#);

        let point: Point = codec.decode(r#"{"x":3,"y":4,"label":"a"}"#).unwrap();
        assert_eq!(point.label.as_deref(), Some("a"));
    }

    #[test]
    fn test_yaml_format() {
        let codec = WireCodec::new(
            Arc::new(YamlSerializer),
            Arc::new(ExceptionRegistry::default()),
        );
        assert_eq!(codec.format(), "yaml");

        let point: Point = codec.decode("x: 5\ny: 6\nlabel: origin\n").unwrap();
        assert_eq!(
            point,
            Point {
                x: 5,
                y: 6,
                label: Some("origin".to_string())
            }
        );

        let text = codec.encode(&vec!["a", "b"]).unwrap();
        let back: Vec<String> = codec.decode(&text).unwrap();
        assert_eq!(back, vec!["a", "b"]);
    }

    #[test]
    fn test_decode_type_mismatch() {
        let codec = WireCodec::default();
        let res = codec.decode::<i32>("\"not a number\"");
        assert!(matches!(res, Err(SerializerError::Json(_))));

        let res = codec.decode::<i32>("{");
        assert!(res.is_err());
    }

    #[test]
    fn test_unparsable_exception_payload() {
        let codec = WireCodec::default();
        let exception = codec.decode_exception("garbage");

        let generic = exception.downcast_ref::<GenericException>().unwrap();
        assert_eq!(generic.message, "garbage");
    }
}
