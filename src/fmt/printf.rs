//! Runtime `printf` over the device contract.
//!
//! The conversion set is the classic `d i u o x X c s p f e g n %`,
//! plus the `%{typeName[formatName]:opts}` registry hook. Integer and float
//! rendering follow C semantics: two-digit exponents for `%e`, the `%e`/`%f`
//! choice and trailing-zero stripping for `%g`, flag/width/precision
//! interactions as in the standard.

use std::cell::Cell;

use crate::device::Device;
use crate::error::{DeviceError, DeviceResult};
use crate::fmt::registry;

/// One vararg. Numeric conversions accept any numeric variant and convert.
pub enum Value<'a> {
    Int(i64),
    Uint(u64),
    Float(f64),
    Char(char),
    Str(&'a str),
    Ptr(usize),
    /// Receives the running byte count at a `%n` site.
    Counter(&'a Cell<usize>),
    /// Handed to a registered serializer at a `%{...}` site.
    Custom(&'a dyn std::any::Any),
}

#[derive(Default)]
struct Spec {
    minus: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

fn arg_error(what: &str) -> DeviceError {
    DeviceError::Unsupported(format!("printf: {}", what))
}

fn int_arg(v: &Value) -> DeviceResult<(bool, u64)> {
    match v {
        Value::Int(i) if *i < 0 => Ok((true, i.unsigned_abs())),
        Value::Int(i) => Ok((false, *i as u64)),
        Value::Uint(u) => Ok((false, *u)),
        Value::Char(c) => Ok((false, *c as u64)),
        Value::Ptr(p) => Ok((false, *p as u64)),
        _ => Err(arg_error("integer conversion needs an integer argument")),
    }
}

fn uint_arg(v: &Value) -> DeviceResult<u64> {
    match v {
        Value::Int(i) => Ok(*i as u64),
        Value::Uint(u) => Ok(*u),
        Value::Char(c) => Ok(*c as u64),
        Value::Ptr(p) => Ok(*p as u64),
        _ => Err(arg_error("unsigned conversion needs an integer argument")),
    }
}

fn float_arg(v: &Value) -> DeviceResult<f64> {
    match v {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        Value::Uint(u) => Ok(*u as f64),
        _ => Err(arg_error("float conversion needs a float argument")),
    }
}

fn to_radix(mut v: u64, base: u64, upper: bool) -> String {
    if v == 0 {
        return "0".to_string();
    }
    let digits = if upper {
        b"0123456789ABCDEF"
    } else {
        b"0123456789abcdef"
    };
    let mut out = Vec::new();
    while v > 0 {
        out.push(digits[(v % base) as usize]);
        v /= base;
    }
    out.reverse();
    String::from_utf8(out).expect("radix digits are ASCII")
}

/// Assemble sign/prefix + body under the flag, width and justification rules.
fn pad(prefix: &str, body: &str, spec: &Spec, allow_zero: bool) -> String {
    let len = prefix.len() + body.len();
    let width = spec.width.unwrap_or(0);
    if len >= width {
        return format!("{}{}", prefix, body);
    }
    let fill = width - len;
    if spec.minus {
        format!("{}{}{}", prefix, body, " ".repeat(fill))
    } else if spec.zero && allow_zero {
        format!("{}{}{}", prefix, "0".repeat(fill), body)
    } else {
        format!("{}{}{}", " ".repeat(fill), prefix, body)
    }
}

fn sign_prefix(neg: bool, spec: &Spec) -> &'static str {
    if neg {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    }
}

fn render_int(neg: bool, mag: u64, base: u64, upper: bool, signed: bool, spec: &Spec) -> String {
    let mut body = to_radix(mag, base, upper);
    if let Some(p) = spec.precision {
        if mag == 0 && p == 0 {
            body.clear();
        }
        if body.len() < p {
            body = format!("{}{}", "0".repeat(p - body.len()), body);
        }
    }
    let mut prefix = String::new();
    if signed {
        prefix.push_str(sign_prefix(neg, spec));
    }
    if spec.alt {
        match base {
            16 if mag != 0 => prefix.push_str(if upper { "0X" } else { "0x" }),
            8 if !body.starts_with('0') => prefix.push('0'),
            _ => {}
        }
    }
    // Precision disables zero-padding for integers.
    pad(&prefix, &body, spec, spec.precision.is_none())
}

/// `d.dddddd e±XX` with a two-digit minimum exponent, C style.
fn sci_body(av: f64, prec: usize) -> String {
    let s = format!("{:.*e}", prec, av);
    let (mant, exp) = s.split_once('e').expect("exponential form");
    let exp: i32 = exp.parse().expect("exponent is an integer");
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}e{}{:02}", mant, sign, exp.abs())
}

fn strip_trailing_zeros(s: &str) -> &str {
    if !s.contains('.') {
        return s;
    }
    s.trim_end_matches('0').trim_end_matches('.')
}

/// The `%g` body: `%e` or `%f` by exponent, trailing zeros stripped unless
/// the alternate flag keeps them.
fn general_body(av: f64, prec: usize, alt: bool) -> String {
    let p = prec.max(1);
    let probe = format!("{:.*e}", p - 1, av);
    let exp: i32 = probe
        .split_once('e')
        .map(|(_, e)| e.parse().unwrap_or(0))
        .unwrap_or(0);
    if exp >= -4 && (exp as i64) < p as i64 {
        let fprec = (p as i64 - 1 - exp as i64) as usize;
        let body = format!("{:.*}", fprec, av);
        if alt {
            body
        } else {
            strip_trailing_zeros(&body).to_string()
        }
    } else {
        let (mant, _) = probe.split_once('e').expect("exponential form");
        let mant = if alt {
            mant.to_string()
        } else {
            strip_trailing_zeros(mant).to_string()
        };
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mant, sign, exp.abs())
    }
}

fn render_float(conv: u8, v: f64, spec: &Spec) -> String {
    if v.is_nan() {
        return pad("", "nan", spec, false);
    }
    let neg = v.is_sign_negative();
    let prefix = sign_prefix(neg, spec);
    if v.is_infinite() {
        return pad(prefix, "inf", spec, false);
    }
    let av = v.abs();
    let prec = spec.precision.unwrap_or(6);
    let body = match conv {
        b'f' => format!("{:.*}", prec, av),
        b'e' => sci_body(av, prec),
        b'g' => general_body(av, prec, spec.alt),
        _ => unreachable!("not a float conversion"),
    };
    pad(prefix, &body, spec, true)
}

fn render_str(s: &str, spec: &Spec) -> String {
    let mut cut = s.len().min(spec.precision.unwrap_or(s.len()));
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    pad("", &s[..cut], spec, false)
}

/// Parse `%{name[format]:opts}` starting after the `{`; returns
/// (name, format, opts, next index past `}`).
fn parse_custom(bytes: &[u8], mut i: usize) -> DeviceResult<(String, Option<String>, String, usize)> {
    let name_start = i;
    while i < bytes.len() && !matches!(bytes[i], b'[' | b':' | b'}') {
        i += 1;
    }
    let name = String::from_utf8_lossy(&bytes[name_start..i]).into_owned();
    let mut format = None;
    if i < bytes.len() && bytes[i] == b'[' {
        i += 1;
        let fstart = i;
        while i < bytes.len() && bytes[i] != b']' {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(arg_error("unterminated format name"));
        }
        format = Some(String::from_utf8_lossy(&bytes[fstart..i]).into_owned());
        i += 1;
    }
    let mut opts = String::new();
    if i < bytes.len() && bytes[i] == b':' {
        i += 1;
        let ostart = i;
        while i < bytes.len() && bytes[i] != b'}' {
            i += 1;
        }
        opts = String::from_utf8_lossy(&bytes[ostart..i]).into_owned();
    }
    if i >= bytes.len() || bytes[i] != b'}' {
        return Err(arg_error("unterminated custom conversion"));
    }
    Ok((name, format, opts, i + 1))
}

/// Formatted output against any device. Returns the number of bytes written.
pub fn printf(dev: &mut Device, fmt: &str, args: &[Value]) -> DeviceResult<usize> {
    let bytes = fmt.as_bytes();
    let mut args = args.iter();
    let mut next_arg = move || args.next().ok_or_else(|| arg_error("missing argument"));
    let mut written = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            let start = i;
            while i < bytes.len() && bytes[i] != b'%' {
                i += 1;
            }
            dev.write_all(&bytes[start..i])?;
            written += i - start;
            continue;
        }
        i += 1;
        if i >= bytes.len() {
            return Err(arg_error("trailing '%'"));
        }
        if bytes[i] == b'%' {
            dev.write_all(b"%")?;
            written += 1;
            i += 1;
            continue;
        }
        if bytes[i] == b'{' {
            let (name, format, opts, next) = parse_custom(bytes, i + 1)?;
            i = next;
            let serializer = registry::serializer(&name)
                .ok_or_else(|| arg_error(&format!("no serializer for type {:?}", name)))?;
            let strategy = match &format {
                Some(f) => Some(
                    registry::format_strategy(f)
                        .ok_or_else(|| arg_error(&format!("no format named {:?}", f)))?,
                ),
                None => None,
            };
            let value = match next_arg()? {
                Value::Custom(any) => *any,
                _ => return Err(arg_error("custom conversion needs a Custom argument")),
            };
            let request = registry::FormatRequest {
                format: format.as_deref(),
                strategy,
                opts: &opts,
            };
            written += serializer(&mut *dev, value, &request)?;
            continue;
        }

        let mut spec = Spec::default();
        loop {
            match bytes.get(i) {
                Some(b'-') => spec.minus = true,
                Some(b'+') => spec.plus = true,
                Some(b' ') => spec.space = true,
                Some(b'0') => spec.zero = true,
                Some(b'#') => spec.alt = true,
                _ => break,
            }
            i += 1;
        }
        if bytes.get(i) == Some(&b'*') {
            i += 1;
            let (neg, mag) = int_arg(next_arg()?)?;
            if neg {
                spec.minus = true;
            }
            spec.width = Some(mag as usize);
        } else {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                spec.width = String::from_utf8_lossy(&bytes[start..i]).parse().ok();
            }
        }
        if bytes.get(i) == Some(&b'.') {
            i += 1;
            if bytes.get(i) == Some(&b'*') {
                i += 1;
                let (neg, mag) = int_arg(next_arg()?)?;
                // A negative precision behaves as if omitted.
                spec.precision = if neg { None } else { Some(mag as usize) };
            } else {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                spec.precision =
                    Some(String::from_utf8_lossy(&bytes[start..i]).parse().unwrap_or(0));
            }
        }
        while matches!(
            bytes.get(i),
            Some(b'h') | Some(b'l') | Some(b'z') | Some(b't') | Some(b'j') | Some(b'L')
        ) {
            i += 1;
        }

        let conv = *bytes
            .get(i)
            .ok_or_else(|| arg_error("missing conversion character"))?;
        i += 1;

        let rendered = match conv {
            b'd' | b'i' => {
                let (neg, mag) = int_arg(next_arg()?)?;
                render_int(neg, mag, 10, false, true, &spec)
            }
            b'u' => render_int(false, uint_arg(next_arg()?)?, 10, false, false, &spec),
            b'o' => render_int(false, uint_arg(next_arg()?)?, 8, false, false, &spec),
            b'x' => render_int(false, uint_arg(next_arg()?)?, 16, false, false, &spec),
            b'X' => render_int(false, uint_arg(next_arg()?)?, 16, true, false, &spec),
            b'c' => {
                let c = match next_arg()? {
                    Value::Char(c) => *c,
                    Value::Int(i) => (*i as u8) as char,
                    Value::Uint(u) => (*u as u8) as char,
                    _ => return Err(arg_error("%c needs a character argument")),
                };
                pad("", &c.to_string(), &spec, false)
            }
            b's' => match next_arg()? {
                Value::Str(s) => render_str(s, &spec),
                _ => return Err(arg_error("%s needs a string argument")),
            },
            b'p' => {
                let p = uint_arg(next_arg()?)?;
                pad("", &format!("0x{:x}", p), &spec, false)
            }
            b'f' | b'e' | b'g' => render_float(conv, float_arg(next_arg()?)?, &spec),
            b'n' => {
                match next_arg()? {
                    Value::Counter(cell) => cell.set(written),
                    _ => return Err(arg_error("%n needs a Counter argument")),
                }
                continue;
            }
            other => {
                return Err(arg_error(&format!(
                    "unknown conversion '%{}'",
                    other as char
                )))
            }
        };
        dev.write_all(rendered.as_bytes())?;
        written += rendered.len();
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::dyn_sink;

    fn fmt(fmt_str: &str, args: &[Value]) -> String {
        let (sink, bytes) = dyn_sink().unwrap();
        let mut dev = sink;
        let n = printf(&mut dev, fmt_str, args).unwrap();
        dev.close().unwrap();
        let out = bytes.lock().clone();
        assert_eq!(n, out.len());
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_plain_text_and_percent() {
        assert_eq!(fmt("hello 100%% done", &[]), "hello 100% done");
    }

    #[test]
    fn test_integer_conversions() {
        assert_eq!(fmt("%d", &[Value::Int(42)]), "42");
        assert_eq!(fmt("%d", &[Value::Int(-42)]), "-42");
        assert_eq!(fmt("%i", &[Value::Int(7)]), "7");
        assert_eq!(fmt("%u", &[Value::Uint(7)]), "7");
        assert_eq!(fmt("%x", &[Value::Uint(255)]), "ff");
        assert_eq!(fmt("%X", &[Value::Uint(255)]), "FF");
        assert_eq!(fmt("%o", &[Value::Uint(8)]), "10");
        assert_eq!(fmt("%d", &[Value::Int(i64::MIN)]), i64::MIN.to_string());
    }

    #[test]
    fn test_integer_flags_and_width() {
        assert_eq!(fmt("%05d", &[Value::Int(42)]), "00042");
        assert_eq!(fmt("%-6d|", &[Value::Int(42)]), "42    |");
        assert_eq!(fmt("%+d", &[Value::Int(42)]), "+42");
        assert_eq!(fmt("% d", &[Value::Int(42)]), " 42");
        assert_eq!(fmt("%#x", &[Value::Uint(255)]), "0xff");
        assert_eq!(fmt("%#o", &[Value::Uint(8)]), "010");
        assert_eq!(fmt("%8.5d", &[Value::Int(42)]), "   00042");
        assert_eq!(fmt("%.0d", &[Value::Int(0)]), "");
        assert_eq!(fmt("%*d", &[Value::Int(5), Value::Int(7)]), "    7");
    }

    #[test]
    fn test_char_and_str() {
        assert_eq!(fmt("%c", &[Value::Char('A')]), "A");
        assert_eq!(fmt("%s", &[Value::Str("hello")]), "hello");
        assert_eq!(fmt("%.3s", &[Value::Str("hello")]), "hel");
        assert_eq!(fmt("%8s", &[Value::Str("hi")]), "      hi");
        assert_eq!(fmt("%-8s|", &[Value::Str("hi")]), "hi      |");
    }

    #[test]
    fn test_fixed_floats_match_c() {
        assert_eq!(fmt("%f", &[Value::Float(3.14159)]), "3.141590");
        assert_eq!(fmt("%.2f", &[Value::Float(3.14159)]), "3.14");
        assert_eq!(fmt("%.0f", &[Value::Float(2.0)]), "2");
        assert_eq!(fmt("%8.2f", &[Value::Float(3.14159)]), "    3.14");
        assert_eq!(fmt("%08.2f", &[Value::Float(-3.5)]), "-0003.50");
        assert_eq!(fmt("%f", &[Value::Float(-0.5)]), "-0.500000");
    }

    #[test]
    fn test_scientific_floats_match_c() {
        assert_eq!(fmt("%e", &[Value::Float(1234.5678)]), "1.234568e+03");
        assert_eq!(fmt("%e", &[Value::Float(0.0)]), "0.000000e+00");
        assert_eq!(fmt("%.2e", &[Value::Float(0.00001)]), "1.00e-05");
        assert_eq!(fmt("%e", &[Value::Float(-2.5)]), "-2.500000e+00");
    }

    #[test]
    fn test_general_floats_match_c() {
        assert_eq!(fmt("%g", &[Value::Float(3.0)]), "3");
        assert_eq!(fmt("%g", &[Value::Float(0.0001)]), "0.0001");
        assert_eq!(fmt("%g", &[Value::Float(0.00001)]), "1e-05");
        assert_eq!(fmt("%g", &[Value::Float(100000.0)]), "100000");
        assert_eq!(fmt("%g", &[Value::Float(1234567.0)]), "1.23457e+06");
        assert_eq!(fmt("%.3g", &[Value::Float(3.14159)]), "3.14");
        assert_eq!(fmt("%g", &[Value::Float(0.5)]), "0.5");
    }

    #[test]
    fn test_nan_and_inf() {
        assert_eq!(fmt("%f", &[Value::Float(f64::NAN)]), "nan");
        assert_eq!(fmt("%f", &[Value::Float(f64::INFINITY)]), "inf");
        assert_eq!(fmt("%f", &[Value::Float(f64::NEG_INFINITY)]), "-inf");
    }

    #[test]
    fn test_pointer() {
        assert_eq!(fmt("%p", &[Value::Ptr(0xdead)]), "0xdead");
    }

    #[test]
    fn test_count_conversion() {
        let cell = std::cell::Cell::new(0usize);
        assert_eq!(fmt("abc%nde", &[Value::Counter(&cell)]), "abcde");
        assert_eq!(cell.get(), 3);
    }

    #[test]
    fn test_missing_argument_is_an_error() {
        let (mut dev, _) = dyn_sink().unwrap();
        assert!(matches!(
            printf(&mut dev, "%d", &[]),
            Err(DeviceError::Unsupported(_))
        ));
    }

    #[test]
    fn test_custom_registry_conversion() {
        #[derive(Debug)]
        struct Point {
            x: i32,
            y: i32,
        }

        registry::register_serializer(
            "point",
            std::sync::Arc::new(|dev, any, req| {
                let p = any
                    .downcast_ref::<Point>()
                    .ok_or(DeviceError::BadState)?;
                let text = if req.opts == "flat" {
                    format!("{} {}", p.x, p.y)
                } else {
                    format!("({}, {})", p.x, p.y)
                };
                dev.write_all(text.as_bytes())?;
                Ok(text.len())
            }),
        );

        let p = Point { x: 3, y: -1 };
        assert_eq!(fmt("%{point}", &[Value::Custom(&p)]), "(3, -1)");
        assert_eq!(fmt("%{point:flat}", &[Value::Custom(&p)]), "3 -1");
    }
}
