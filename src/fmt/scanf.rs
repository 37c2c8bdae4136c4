//! Runtime `scanf` over the device contract.
//!
//! Matching follows the classic rules: whitespace in the format skips any
//! run of input whitespace, literal bytes must match exactly, and the first
//! mismatch stops the scan with the offending byte pushed back (one byte of
//! pushback is all the device guarantees, and all this engine uses).
//! Successfully converted values are returned in order; the count of
//! conversions is the vector's length.

use crate::device::Device;
use crate::error::DeviceResult;
use crate::fmt::registry;

/// One value produced by [`scanf`].
#[derive(Debug, Clone, PartialEq)]
pub enum ScanValue {
    Int(i64),
    Uint(u64),
    Float(f64),
    Char(u8),
    Str(String),
    Ptr(usize),
    /// Bytes consumed so far, from `%n`.
    Count(usize),
}

struct Scanner<'a> {
    dev: &'a mut Device,
    consumed: usize,
}

impl<'a> Scanner<'a> {
    fn next(&mut self) -> DeviceResult<Option<u8>> {
        match self.dev.getc()? {
            Some(b) => {
                self.consumed += 1;
                Ok(Some(b))
            }
            None => Ok(None),
        }
    }

    fn back(&mut self, byte: u8) {
        if self.dev.ungetc(byte) {
            self.consumed -= 1;
        }
    }

    fn skip_whitespace(&mut self) -> DeviceResult<()> {
        while let Some(b) = self.next()? {
            if !b.is_ascii_whitespace() {
                self.back(b);
                break;
            }
        }
        Ok(())
    }

    /// Scan an unsigned digit run in `base`, bounded by `width`. Returns
    /// None when no digit matched.
    fn digits(&mut self, base: u64, width: &mut usize) -> DeviceResult<Option<u64>> {
        let mut value: Option<u64> = None;
        while *width > 0 {
            let b = match self.next()? {
                Some(b) => b,
                None => break,
            };
            let digit = match (b as char).to_digit(base as u32) {
                Some(d) => d as u64,
                None => {
                    self.back(b);
                    break;
                }
            };
            value = Some(value.unwrap_or(0).wrapping_mul(base).wrapping_add(digit));
            *width -= 1;
        }
        Ok(value)
    }

    fn sign(&mut self, width: &mut usize) -> DeviceResult<bool> {
        if *width == 0 {
            return Ok(false);
        }
        match self.next()? {
            Some(b'-') => {
                *width -= 1;
                Ok(true)
            }
            Some(b'+') => {
                *width -= 1;
                Ok(false)
            }
            Some(b) => {
                self.back(b);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Signed integer; `base` of None is the `%i` auto-detect.
    fn integer(&mut self, base: Option<u64>, mut width: usize) -> DeviceResult<Option<(bool, u64)>> {
        self.skip_whitespace()?;
        let neg = self.sign(&mut width)?;
        let base = match base {
            Some(b) => b,
            None => {
                // %i: 0x… is hex, a leading 0 is octal, else decimal.
                match self.next()? {
                    Some(b'0') if width > 0 => {
                        width -= 1;
                        match self.next()? {
                            Some(b'x') | Some(b'X') if width > 1 => {
                                width -= 1;
                                match self.digits(16, &mut width)? {
                                    Some(v) => return Ok(Some((neg, v))),
                                    // "0x" with no digits still scanned the 0.
                                    None => return Ok(Some((neg, 0))),
                                }
                            }
                            Some(b) => {
                                self.back(b);
                                let v = self.digits(8, &mut width)?.unwrap_or(0);
                                return Ok(Some((neg, v)));
                            }
                            None => return Ok(Some((neg, 0))),
                        }
                    }
                    Some(b) => {
                        self.back(b);
                        10
                    }
                    None => return Ok(None),
                }
            }
        };
        Ok(self.digits(base, &mut width)?.map(|v| (neg, v)))
    }

    /// Float token: sign, digits, optional fraction, optional exponent.
    fn float(&mut self, mut width: usize) -> DeviceResult<Option<f64>> {
        self.skip_whitespace()?;
        let mut token = String::new();
        if self.sign(&mut width)? {
            token.push('-');
        }
        let mut any_digit = false;
        while width > 0 {
            match self.next()? {
                Some(b) if b.is_ascii_digit() => {
                    token.push(b as char);
                    any_digit = true;
                    width -= 1;
                }
                Some(b) => {
                    self.back(b);
                    break;
                }
                None => break,
            }
        }
        if width > 0 {
            if let Some(b'.') = self.peek()? {
                self.next()?;
                token.push('.');
                width -= 1;
                while width > 0 {
                    match self.next()? {
                        Some(b) if b.is_ascii_digit() => {
                            token.push(b as char);
                            any_digit = true;
                            width -= 1;
                        }
                        Some(b) => {
                            self.back(b);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
        if !any_digit {
            return Ok(None);
        }
        if width > 1 {
            if let Some(b'e') | Some(b'E') = self.peek()? {
                self.next()?;
                let mut exp = String::from("e");
                match self.next()? {
                    Some(b @ (b'-' | b'+')) => exp.push(b as char),
                    Some(b) if b.is_ascii_digit() => exp.push(b as char),
                    Some(b) => {
                        // Not an exponent after all; the 'e' is already
                        // consumed and only one byte of pushback exists.
                        self.back(b);
                        exp.clear();
                    }
                    None => exp.clear(),
                }
                if !exp.is_empty() {
                    let mut got_digit = exp.ends_with(|c: char| c.is_ascii_digit());
                    loop {
                        match self.next()? {
                            Some(b) if b.is_ascii_digit() => {
                                exp.push(b as char);
                                got_digit = true;
                            }
                            Some(b) => {
                                self.back(b);
                                break;
                            }
                            None => break,
                        }
                    }
                    if got_digit {
                        token.push_str(&exp);
                    }
                }
            }
        }
        Ok(token.parse::<f64>().ok())
    }

    fn peek(&mut self) -> DeviceResult<Option<u8>> {
        match self.next()? {
            Some(b) => {
                self.back(b);
                Ok(Some(b))
            }
            None => Ok(None),
        }
    }

    fn word(&mut self, width: usize) -> DeviceResult<Option<String>> {
        self.skip_whitespace()?;
        let mut out = String::new();
        while out.len() < width {
            match self.next()? {
                Some(b) if b.is_ascii_whitespace() => {
                    self.back(b);
                    break;
                }
                Some(b) => out.push(b as char),
                None => break,
            }
        }
        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }
}

/// Formatted input against any device. Stops at the first mismatch or EOF;
/// the returned vector holds the successful conversions in order.
pub fn scanf(dev: &mut Device, fmt: &str) -> DeviceResult<Vec<ScanValue>> {
    let mut sc = Scanner { dev, consumed: 0 };
    let mut out = Vec::new();
    let bytes = fmt.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            sc.skip_whitespace()?;
            i += 1;
            continue;
        }
        if c != b'%' {
            match sc.next()? {
                Some(b) if b == c => {
                    i += 1;
                    continue;
                }
                Some(b) => {
                    sc.back(b);
                    return Ok(out);
                }
                None => return Ok(out),
            }
        }
        i += 1;
        if i >= bytes.len() {
            return Ok(out);
        }
        if bytes[i] == b'%' {
            match sc.next()? {
                Some(b'%') => {
                    i += 1;
                    continue;
                }
                Some(b) => {
                    sc.back(b);
                    return Ok(out);
                }
                None => return Ok(out),
            }
        }
        if bytes[i] == b'{' {
            let mut j = i + 1;
            let name_start = j;
            while j < bytes.len() && !matches!(bytes[j], b'[' | b':' | b'}') {
                j += 1;
            }
            let name = String::from_utf8_lossy(&bytes[name_start..j]).into_owned();
            let mut format = None;
            if j < bytes.len() && bytes[j] == b'[' {
                j += 1;
                let fstart = j;
                while j < bytes.len() && bytes[j] != b']' {
                    j += 1;
                }
                format = Some(String::from_utf8_lossy(&bytes[fstart..j]).into_owned());
                j = (j + 1).min(bytes.len());
            }
            let mut opts = String::new();
            if j < bytes.len() && bytes[j] == b':' {
                j += 1;
                let ostart = j;
                while j < bytes.len() && bytes[j] != b'}' {
                    j += 1;
                }
                opts = String::from_utf8_lossy(&bytes[ostart..j]).into_owned();
            }
            if j >= bytes.len() || bytes[j] != b'}' {
                return Ok(out);
            }
            i = j + 1;
            let parser = match registry::parser(&name) {
                Some(p) => p,
                None => return Ok(out),
            };
            let strategy = format.as_deref().and_then(registry::format_strategy);
            let request = registry::FormatRequest {
                format: format.as_deref(),
                strategy,
                opts: &opts,
            };
            match parser(&mut *sc.dev, &request) {
                Ok(v) => out.push(v),
                Err(_) => return Ok(out),
            }
            continue;
        }

        let suppress = if bytes[i] == b'*' {
            i += 1;
            true
        } else {
            false
        };
        let mut width = 0usize;
        let wstart = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i > wstart {
            width = String::from_utf8_lossy(&bytes[wstart..i]).parse().unwrap_or(0);
        }
        let width = if width == 0 { usize::MAX } else { width };
        while matches!(
            bytes.get(i),
            Some(b'h') | Some(b'l') | Some(b'z') | Some(b't') | Some(b'j') | Some(b'L')
        ) {
            i += 1;
        }
        let conv = match bytes.get(i) {
            Some(&c) => c,
            None => return Ok(out),
        };
        i += 1;

        let value = match conv {
            b'd' => sc
                .integer(Some(10), width)?
                .map(|(neg, mag)| ScanValue::Int(apply_sign(neg, mag))),
            b'i' => sc
                .integer(None, width)?
                .map(|(neg, mag)| ScanValue::Int(apply_sign(neg, mag))),
            b'u' => sc.integer(Some(10), width)?.map(|(neg, mag)| {
                ScanValue::Uint(if neg { mag.wrapping_neg() } else { mag })
            }),
            b'o' => sc
                .integer(Some(8), width)?
                .map(|(neg, mag)| ScanValue::Uint(if neg { mag.wrapping_neg() } else { mag })),
            b'x' | b'X' => sc
                .integer(Some(16), width)?
                .map(|(neg, mag)| ScanValue::Uint(if neg { mag.wrapping_neg() } else { mag })),
            b'p' => {
                sc.skip_whitespace()?;
                // Accept an optional 0x prefix.
                let mut w = width;
                if let Some(b'0') = sc.peek()? {
                    sc.next()?;
                    w = w.saturating_sub(1);
                    match sc.peek()? {
                        Some(b'x') | Some(b'X') => {
                            sc.next()?;
                            w = w.saturating_sub(1);
                        }
                        _ => {}
                    }
                }
                sc.digits(16, &mut w)?.map(|v| ScanValue::Ptr(v as usize))
            }
            b'f' | b'e' | b'g' => sc.float(width)?.map(ScanValue::Float),
            b'c' => {
                let n = if width == usize::MAX { 1 } else { width };
                let mut got = Vec::new();
                for _ in 0..n {
                    match sc.next()? {
                        Some(b) => got.push(b),
                        None => break,
                    }
                }
                if got.len() < n {
                    None
                } else if n == 1 {
                    Some(ScanValue::Char(got[0]))
                } else {
                    Some(ScanValue::Str(
                        String::from_utf8_lossy(&got).into_owned(),
                    ))
                }
            }
            b's' => sc.word(width)?.map(ScanValue::Str),
            b'n' => Some(ScanValue::Count(sc.consumed)),
            _ => None,
        };

        match value {
            Some(v) => {
                if !suppress {
                    out.push(v);
                }
            }
            None => return Ok(out),
        }
    }
    Ok(out)
}

fn apply_sign(neg: bool, mag: u64) -> i64 {
    if neg {
        (mag as i64).wrapping_neg()
    } else {
        mag as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::str_source;

    fn scan(input: &str, fmt: &str) -> Vec<ScanValue> {
        let mut dev = str_source(input).unwrap();
        scanf(&mut dev, fmt).unwrap()
    }

    #[test]
    fn test_basic_conversions() {
        assert_eq!(
            scan("42 hello 3.5", "%d %s %f"),
            vec![
                ScanValue::Int(42),
                ScanValue::Str("hello".to_string()),
                ScanValue::Float(3.5),
            ]
        );
    }

    #[test]
    fn test_negative_and_signed() {
        assert_eq!(scan("-17", "%d"), vec![ScanValue::Int(-17)]);
        assert_eq!(scan("+8", "%d"), vec![ScanValue::Int(8)]);
    }

    #[test]
    fn test_auto_base() {
        assert_eq!(scan("0x1A", "%i"), vec![ScanValue::Int(26)]);
        assert_eq!(scan("0755", "%i"), vec![ScanValue::Int(493)]);
        assert_eq!(scan("99", "%i"), vec![ScanValue::Int(99)]);
        assert_eq!(scan("0", "%i"), vec![ScanValue::Int(0)]);
    }

    #[test]
    fn test_hex_and_octal() {
        assert_eq!(scan("ff", "%x"), vec![ScanValue::Uint(255)]);
        assert_eq!(scan("FF", "%x"), vec![ScanValue::Uint(255)]);
        assert_eq!(scan("17", "%o"), vec![ScanValue::Uint(15)]);
    }

    #[test]
    fn test_literal_match_and_mismatch() {
        assert_eq!(
            scan("x=5,y=7", "x=%d,y=%d"),
            vec![ScanValue::Int(5), ScanValue::Int(7)]
        );
        // The mismatch at ';' aborts before the second conversion.
        assert_eq!(scan("x=5;y=7", "x=%d,y=%d"), vec![ScanValue::Int(5)]);
    }

    #[test]
    fn test_pushback_after_number() {
        let mut dev = str_source("123abc").unwrap();
        assert_eq!(scanf(&mut dev, "%d").unwrap(), vec![ScanValue::Int(123)]);
        // The terminating byte went back onto the device.
        assert_eq!(dev.getc().unwrap(), Some(b'a'));
    }

    #[test]
    fn test_width_limits() {
        assert_eq!(
            scan("123456", "%3d%3d"),
            vec![ScanValue::Int(123), ScanValue::Int(456)]
        );
        assert_eq!(
            scan("abcdef", "%4s"),
            vec![ScanValue::Str("abcd".to_string())]
        );
    }

    #[test]
    fn test_char_conversions() {
        assert_eq!(scan("xyz", "%c"), vec![ScanValue::Char(b'x')]);
        assert_eq!(scan("xyz", "%2c"), vec![ScanValue::Str("xy".to_string())]);
    }

    #[test]
    fn test_floats() {
        assert_eq!(scan("2.5e3", "%f"), vec![ScanValue::Float(2500.0)]);
        assert_eq!(scan("-0.25", "%g"), vec![ScanValue::Float(-0.25)]);
        assert_eq!(scan("7", "%e"), vec![ScanValue::Float(7.0)]);
    }

    #[test]
    fn test_count_and_suppress() {
        assert_eq!(
            scan("12 34", "%*d %d%n"),
            vec![ScanValue::Int(34), ScanValue::Count(5)]
        );
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert_eq!(scan("", "%d"), vec![]);
    }

    #[test]
    fn test_percent_literal() {
        assert_eq!(scan("50% off", "%d%% %s"), vec![
            ScanValue::Int(50),
            ScanValue::Str("off".to_string())
        ]);
    }
}
