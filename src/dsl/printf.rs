use super::value::Value;

/// Upper bound on field width and precision.
const MAX_FIELD: usize = 4096;

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
    long: bool,
}

/// Render `fmt` with `args`. Missing arguments format as zero; surplus
/// arguments are ignored.
pub fn format(fmt: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(fmt.len());
    let mut args = args.iter();
    let mut chars = fmt.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '0' => spec.zero = true,
                '#' => spec.alt = true,
                _ => break,
            }
            chars.next();
        }
        if chars.peek() == Some(&'*') {
            chars.next();
            let w = args.next().map_or(0, Value::as_i64);
            spec.left |= w < 0;
            spec.width = usize::try_from(w.unsigned_abs()).map_or(MAX_FIELD, |w| w.min(MAX_FIELD));
        } else {
            spec.width = read_number(&mut chars);
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            if chars.peek() == Some(&'*') {
                chars.next();
                let p = args.next().map_or(0, Value::as_i64);
                spec.precision = usize::try_from(p).ok().map(|p| p.min(MAX_FIELD));
            } else {
                spec.precision = Some(read_number(&mut chars));
            }
        }
        while let Some(&m) = chars.peek() {
            match m {
                'l' | 'L' | 'j' | 'q' => spec.long = true,
                'h' | 'z' | 't' => {}
                _ => break,
            }
            chars.next();
        }

        let Some(conv) = chars.next() else {
            out.push('%');
            break;
        };
        let zero = Value::I32(0);
        match conv {
            '%' => out.push('%'),
            'd' | 'i' => {
                let arg = args.next().unwrap_or(&zero);
                let v = signed_arg(arg, spec.long);
                let digits = with_precision(v.unsigned_abs().to_string(), spec.precision);
                pad_number(&mut out, &spec, sign(v < 0, &spec), "", &digits, spec.precision.is_none());
            }
            'u' | 'x' | 'X' | 'o' => {
                let arg = args.next().unwrap_or(&zero);
                let v = unsigned_arg(arg, spec.long);
                let (digits, prefix) = match conv {
                    'u' => (v.to_string(), ""),
                    'x' => (format!("{v:x}"), if spec.alt && v != 0 { "0x" } else { "" }),
                    'X' => (format!("{v:X}"), if spec.alt && v != 0 { "0X" } else { "" }),
                    _ => (format!("{v:o}"), if spec.alt && v != 0 { "0" } else { "" }),
                };
                let digits = with_precision(digits, spec.precision);
                pad_number(&mut out, &spec, "", prefix, &digits, spec.precision.is_none());
            }
            'c' => {
                let code = args.next().map_or(0, Value::as_u32);
                let c = char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER);
                pad_text(&mut out, &spec, &c.to_string());
            }
            's' => {
                let text = match args.next() {
                    Some(Value::Str(s)) => s.to_string(),
                    Some(other) => other.as_i64().to_string(),
                    None => String::new(),
                };
                let text: String = match spec.precision {
                    Some(p) => text.chars().take(p).collect(),
                    None => text,
                };
                pad_text(&mut out, &spec, &text);
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let v = args.next().map_or(0.0, Value::as_f64);
                let upper = conv.is_ascii_uppercase();
                let body = if v.is_finite() {
                    let abs = v.abs();
                    let precision = spec.precision.unwrap_or(6);
                    match conv.to_ascii_lowercase() {
                        'f' => format!("{abs:.precision$}"),
                        'e' => exp_form(abs, precision, upper),
                        _ => general_form(abs, precision, spec.alt, upper),
                    }
                } else if v.is_nan() {
                    if upper { "NAN".into() } else { "nan".into() }
                } else if upper {
                    "INF".into()
                } else {
                    "inf".into()
                };
                let negative = v.is_sign_negative() && !v.is_nan();
                pad_number(&mut out, &spec, sign(negative, &spec), "", &body, v.is_finite());
            }
            other => {
                out.push('%');
                out.push(other);
            }
        }
    }
    out
}

fn read_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> usize {
    let mut n = 0usize;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = n.saturating_mul(10).saturating_add(d as usize);
        chars.next();
    }
    n.min(MAX_FIELD)
}

/// `%d` reads 32 bits unless the argument is 64-bit or `l` is given.
fn signed_arg(value: &Value, long: bool) -> i64 {
    match value {
        Value::I64(_) | Value::U64(_) => value.as_i64(),
        _ if long => value.as_i64(),
        _ => i64::from(value.as_i32()),
    }
}

fn unsigned_arg(value: &Value, long: bool) -> u64 {
    match value {
        Value::I64(_) | Value::U64(_) => value.as_u64(),
        _ if long => value.as_u64(),
        _ => u64::from(value.as_u32()),
    }
}

fn sign(negative: bool, spec: &Spec) -> &'static str {
    if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    }
}

fn with_precision(digits: String, precision: Option<usize>) -> String {
    match precision {
        Some(0) if digits == "0" => String::new(),
        Some(p) if digits.len() < p => format!("{}{digits}", "0".repeat(p - digits.len())),
        _ => digits,
    }
}

fn pad_text(out: &mut String, spec: &Spec, text: &str) {
    let len = text.chars().count();
    let fill = spec.width.saturating_sub(len);
    if spec.left {
        out.push_str(text);
        out.extend(std::iter::repeat(' ').take(fill));
    } else {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(text);
    }
}

fn pad_number(out: &mut String, spec: &Spec, sign: &str, prefix: &str, body: &str, zero_ok: bool) {
    let len = sign.len() + prefix.len() + body.len();
    let fill = spec.width.saturating_sub(len);
    if spec.left {
        out.push_str(sign);
        out.push_str(prefix);
        out.push_str(body);
        out.extend(std::iter::repeat(' ').take(fill));
    } else if spec.zero && zero_ok {
        out.push_str(sign);
        out.push_str(prefix);
        out.extend(std::iter::repeat('0').take(fill));
        out.push_str(body);
    } else {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(sign);
        out.push_str(prefix);
        out.push_str(body);
    }
}

/// Split Rust's `1.5e3` into mantissa and exponent.
fn rust_exp(v: f64, precision: usize) -> (String, i32) {
    let text = format!("{v:.precision$e}");
    match text.split_once('e') {
        Some((mantissa, exp)) => (mantissa.to_string(), exp.parse().unwrap_or(0)),
        None => (text, 0),
    }
}

fn exp_form(v: f64, precision: usize, upper: bool) -> String {
    let (mantissa, exp) = rust_exp(v, precision);
    let e = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}{e}{sign}{:02}", exp.unsigned_abs())
}

fn general_form(v: f64, precision: usize, alt: bool, upper: bool) -> String {
    let p = precision.max(1);
    let exp = if v == 0.0 { 0 } else { rust_exp(v, p - 1).1 };
    let p_i = i32::try_from(p).unwrap_or(i32::MAX);
    if exp >= -4 && exp < p_i {
        let decimals = usize::try_from(p_i - 1 - exp).unwrap_or(0);
        let text = format!("{v:.decimals$}");
        if alt {
            text
        } else {
            strip_zeros(&text)
        }
    } else {
        let text = exp_form(v, p - 1, upper);
        if alt {
            return text;
        }
        match text.find(['e', 'E']) {
            Some(at) => {
                let (mantissa, exponent) = text.split_at(at);
                format!("{}{exponent}", strip_zeros(mantissa))
            }
            None => text,
        }
    }
}

fn strip_zeros(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn s(text: &str) -> Value {
        Value::Str(Rc::from(text))
    }

    #[test]
    fn integers() {
        assert_eq!(format("%d|%5d|%-5d|%05d", &[Value::I32(-42), Value::I32(7), Value::I32(7), Value::I32(-7)]),
            "-42|    7|7    |-0007");
        assert_eq!(format("%+d % d", &[Value::I32(3), Value::I32(3)]), "+3  3");
        assert_eq!(format("%.3d", &[Value::I32(5)]), "005");
    }

    #[test]
    fn int_width_follows_argument_kind() {
        assert_eq!(format("%d", &[Value::U32(u32::MAX)]), "-1");
        assert_eq!(format("%u", &[Value::I32(-1)]), "4294967295");
        assert_eq!(format("%lu", &[Value::U64(u64::MAX)]), "18446744073709551615");
        assert_eq!(format("%d", &[Value::I64(1 << 40)]), "1099511627776");
    }

    #[test]
    fn hex_and_octal() {
        assert_eq!(format("%x %X %#x %o %08x", &[
            Value::U32(255), Value::U32(255), Value::U32(255), Value::U32(8), Value::I32(-1),
        ]), "ff FF 0xff 10 ffffffff");
    }

    #[test]
    fn floats() {
        assert_eq!(format("%f", &[Value::F64(1.5)]), "1.500000");
        assert_eq!(format("%.2f|%8.3f|%-8.1f|", &[Value::F64(3.14159), Value::F64(-2.5), Value::F32(0.25)]),
            "3.14|  -2.500|0.2     |");
        assert_eq!(format("%e", &[Value::F64(12345.678)]), "1.234568e+04");
        assert_eq!(format("%.2E", &[Value::F64(0.000123)]), "1.23E-04");
    }

    #[test]
    fn general_float() {
        assert_eq!(format("%g", &[Value::F64(100000.0)]), "100000");
        assert_eq!(format("%g", &[Value::F64(1_000_000.0)]), "1e+06");
        assert_eq!(format("%g", &[Value::F64(0.0001)]), "0.0001");
        assert_eq!(format("%g", &[Value::F64(0.00001)]), "1e-05");
        assert_eq!(format("%g", &[Value::F64(2.5)]), "2.5");
        assert_eq!(format("%g", &[Value::F64(0.0)]), "0");
    }

    #[test]
    fn non_finite_floats() {
        assert_eq!(format("%f %F", &[Value::F64(f64::INFINITY), Value::F64(f64::NEG_INFINITY)]), "inf -INF");
        assert_eq!(format("%f", &[Value::F64(f64::NAN)]), "nan");
    }

    #[test]
    fn strings_chars_and_percent() {
        assert_eq!(format("%s=%c%%", &[s("x"), Value::I32(65)]), "x=A%");
        assert_eq!(format("[%5s][%-3s][%.2s]", &[s("ab"), s("c"), s("hello")]), "[   ab][c  ][he]");
    }

    #[test]
    fn star_width_and_missing_arguments() {
        assert_eq!(format("%*d|", &[Value::I32(4), Value::I32(9)]), "   9|");
        assert_eq!(format("%d %d", &[Value::I32(1)]), "1 0");
        assert_eq!(format("100%", &[]), "100%");
    }

    #[test]
    fn huge_width_and_precision_are_clamped() {
        let huge = Value::I64(35_184_372_088_832);
        let padded = format("%.*d", &[huge.clone(), Value::I32(1)]);
        assert_eq!(padded.len(), MAX_FIELD);
        assert!(padded.ends_with("01"));
        assert_eq!(format("%*d", &[huge, Value::I32(1)]).len(), MAX_FIELD);
        assert_eq!(format("%99999999999999999999999d", &[Value::I32(1)]).len(), MAX_FIELD);
        assert_eq!(format("%.99999f", &[Value::F64(1.0)]).len(), MAX_FIELD + 2);
        assert_eq!(format("%.99999e", &[Value::F64(1.0)]).len(), MAX_FIELD + 6);
        assert!(format("%.99999g", &[Value::F64(0.5)]).starts_with("0.5"));
    }
}
