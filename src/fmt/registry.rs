//! Process-wide registries backing the `%{typeName[formatName]:opts}`
//! extension.
//!
//! Two registries: type name → serializer/parser pair, format name → an
//! opaque strategy handed through to the serializer. Registration is
//! process-wide and thread-safe.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::device::Device;
use crate::error::DeviceResult;
use crate::fmt::ScanValue;

/// What the format string asked for at one custom conversion site.
pub struct FormatRequest<'a> {
    /// The `[formatName]` part, if present.
    pub format: Option<&'a str>,
    /// The strategy registered under that format name.
    pub strategy: Option<FormatStrategy>,
    /// The raw `:opts` tail, empty when absent.
    pub opts: &'a str,
}

/// Writes one value to the device, returning the bytes produced.
pub type TypeSerializer =
    Arc<dyn Fn(&mut Device, &dyn Any, &FormatRequest) -> DeviceResult<usize> + Send + Sync>;

/// Reads one value from the device.
pub type TypeParser =
    Arc<dyn Fn(&mut Device, &FormatRequest) -> DeviceResult<ScanValue> + Send + Sync>;

/// Opaque per-format data; serializers downcast it.
pub type FormatStrategy = Arc<dyn Any + Send + Sync>;

lazy_static! {
    static ref SERIALIZERS: RwLock<HashMap<String, TypeSerializer>> = RwLock::new(HashMap::new());
    static ref PARSERS: RwLock<HashMap<String, TypeParser>> = RwLock::new(HashMap::new());
    static ref FORMATS: RwLock<HashMap<String, FormatStrategy>> = RwLock::new(HashMap::new());
}

pub fn register_serializer(name: &str, serializer: TypeSerializer) {
    SERIALIZERS.write().insert(name.to_string(), serializer);
}

pub fn register_parser(name: &str, parser: TypeParser) {
    PARSERS.write().insert(name.to_string(), parser);
}

pub fn register_format(name: &str, strategy: FormatStrategy) {
    FORMATS.write().insert(name.to_string(), strategy);
}

pub(crate) fn serializer(name: &str) -> Option<TypeSerializer> {
    SERIALIZERS.read().get(name).cloned()
}

pub(crate) fn parser(name: &str) -> Option<TypeParser> {
    PARSERS.read().get(name).cloned()
}

pub(crate) fn format_strategy(name: &str) -> Option<FormatStrategy> {
    FORMATS.read().get(name).cloned()
}
