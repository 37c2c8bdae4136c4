//! Open-mode strings.
//!
//! Devices are opened with a short mode string in the `fopen` tradition. The
//! recognized characters are a closed set; anything else fails the open with
//! [`DeviceError::InvalidMode`].
//!
//! | Char | Meaning |
//! |------|---------|
//! | `r`  | readable |
//! | `w`  | writable; truncates when it is the leading character |
//! | `a`  | writable, append |
//! | `+`  | update: readable and writable, intermediate-state semantics for filters |
//! | `b`  | binary (default) |
//! | `t`  | text |
//! | `x`  | exclusive create |
//! | `<`  | disable hardware acceleration for this filter |
//!
//! The string is parsed exactly once at open into an [`OpenMode`] record;
//! nothing downstream ever re-scans characters.

use crate::error::{DeviceError, DeviceResult};

/// Parsed open mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub binary: bool,
    pub exclusive: bool,
    pub truncate: bool,
    /// `+` was present: read-write with update/intermediate semantics.
    pub update: bool,
    /// `<` was present: the filter must use its scalar code path.
    pub no_accel: bool,
}

impl OpenMode {
    /// Parse a mode string. Fails on unrecognized characters and on strings
    /// that select neither reading nor writing.
    pub fn parse(mode: &str) -> DeviceResult<OpenMode> {
        let mut m = OpenMode {
            binary: true,
            ..OpenMode::default()
        };
        for (i, c) in mode.chars().enumerate() {
            match c {
                'r' => m.read = true,
                'w' => {
                    m.write = true;
                    if i == 0 {
                        m.truncate = true;
                    }
                }
                'a' => {
                    m.write = true;
                    m.append = true;
                }
                '+' => {
                    m.update = true;
                    m.read = true;
                    m.write = true;
                }
                'b' => m.binary = true,
                't' => m.binary = false,
                'x' => m.exclusive = true,
                '<' => m.no_accel = true,
                _ => return Err(DeviceError::InvalidMode(mode.to_string())),
            }
        }
        if !m.read && !m.write {
            return Err(DeviceError::InvalidMode(mode.to_string()));
        }
        Ok(m)
    }

    pub fn readable(&self) -> bool {
        self.read
    }

    pub fn writable(&self) -> bool {
        self.write
    }
}
