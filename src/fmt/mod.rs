//! Formatted I/O over the device contract.
//!
//! [`printf`] and [`scanf`] work against any [`Device`]: a growable buffer,
//! a file, a cipher pipeline. Conversions are the classic set plus the
//! `%{typeName[formatName]:opts}` extension, which resolves two process-wide
//! registries (see [`registry`]) and lets applications plug their own
//! serializers into format strings.

pub mod printf;
pub mod registry;
pub mod scanf;

pub use printf::{printf, Value};
pub use registry::{
    register_format, register_parser, register_serializer, FormatRequest, FormatStrategy,
    TypeParser, TypeSerializer,
};
pub use scanf::{scanf, ScanValue};

use crate::device::Device;
use crate::error::DeviceResult;

impl Device {
    /// [`printf`] as a method.
    pub fn printf(&mut self, fmt: &str, args: &[Value]) -> DeviceResult<usize> {
        printf(self, fmt, args)
    }

    /// [`scanf`] as a method.
    pub fn scanf(&mut self, fmt: &str) -> DeviceResult<Vec<ScanValue>> {
        scanf(self, fmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SeekPos;
    use crate::mem::DynBuffer;

    #[test]
    fn test_printf_scanf_round_trip_through_one_buffer() {
        let mut dev = Device::open(DynBuffer::new(), "w+").unwrap();
        dev.printf(
            "id=%d name=%s ratio=%g\n",
            &[Value::Int(17), Value::Str("socket"), Value::Float(0.75)],
        )
        .unwrap();
        dev.seek(SeekPos::Start(0)).unwrap();
        let got = dev.scanf("id=%d name=%s ratio=%g").unwrap();
        assert_eq!(
            got,
            vec![
                ScanValue::Int(17),
                ScanValue::Str("socket".to_string()),
                ScanValue::Float(0.75),
            ]
        );
    }
}
