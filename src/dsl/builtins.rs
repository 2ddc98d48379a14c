use std::io::Write;

use tracing::{debug, warn};

use super::error::RuntimeError;
use super::pow;
use super::printf;
use super::types::{NumKind, Type};
use super::value::{ArrayValue, Value};
use crate::computation::{ComputationResult, PERSONALIZED_LEN};

/// A builtin parameter as lowering checks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSig {
    /// Any numeric or bool argument, converted to this kind.
    Num(NumKind),
    Str,
    /// A numeric array, passed by reference.
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetSig {
    Num(NumKind),
    Void,
}

impl RetSig {
    pub fn ty(self) -> Type {
        match self {
            RetSig::Num(kind) => Type::Num(kind),
            RetSig::Void => Type::Void,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinOp {
    Sin,
    Cos,
    Tan,
    Exp,
    Exp2,
    Log,
    Log2,
    Log10,
    Sqrt,
    Floor,
    Ceil,
    Fabs,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Acos,
    Pow,
    Fmod,
    Atan2,
    Abs,
    Gcd,
    Rotl32,
    Rotr32,
    Rotl64,
    Rotr64,
    Printf,
    Puts,
    Putc,
    Fwrite,
    CheckPow,
    SyncR,
    PullTheRest,
}

/// Built-in function: name, signature and the operation it runs. Lowering,
/// the evaluator and `cover builtins` all read this table.
#[derive(Debug, Clone)]
pub struct BuiltinFn {
    pub name: &'static str,
    pub params: &'static [(&'static str, ParamSig)],
    /// Extra arguments after `params` are accepted.
    pub variadic: bool,
    pub ret: RetSig,
    pub op: BuiltinOp,
    pub category: &'static str,
    pub description: &'static str,
}

const F64: ParamSig = ParamSig::Num(NumKind::F64);
const I32: ParamSig = ParamSig::Num(NumKind::I32);
const I64: ParamSig = ParamSig::Num(NumKind::I64);
const U32: ParamSig = ParamSig::Num(NumKind::U32);
const U64: ParamSig = ParamSig::Num(NumKind::U64);

/// All built-in functions available to scripts.
pub static BUILTINS: &[BuiltinFn] = &[
    // ── Math (1-arg) ────────────────────────────────────────────
    BuiltinFn {
        name: "sin", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Sin, category: "math", description: "Sine",
    },
    BuiltinFn {
        name: "cos", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Cos, category: "math", description: "Cosine",
    },
    BuiltinFn {
        name: "tan", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Tan, category: "math", description: "Tangent",
    },
    BuiltinFn {
        name: "exp", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Exp, category: "math", description: "e^x",
    },
    BuiltinFn {
        name: "exp2", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Exp2, category: "math", description: "2^x",
    },
    BuiltinFn {
        name: "log", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Log, category: "math", description: "Natural logarithm",
    },
    BuiltinFn {
        name: "log2", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Log2, category: "math", description: "Base-2 logarithm",
    },
    BuiltinFn {
        name: "log10", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Log10, category: "math", description: "Base-10 logarithm",
    },
    BuiltinFn {
        name: "sqrt", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Sqrt, category: "math", description: "Square root",
    },
    BuiltinFn {
        name: "floor", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Floor, category: "math", description: "Round down",
    },
    BuiltinFn {
        name: "ceil", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Ceil, category: "math", description: "Round up",
    },
    BuiltinFn {
        name: "fabs", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Fabs, category: "math", description: "Absolute value of a float",
    },
    BuiltinFn {
        name: "atan", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Atan, category: "math", description: "Arctangent",
    },
    BuiltinFn {
        name: "sinh", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Sinh, category: "math", description: "Hyperbolic sine",
    },
    BuiltinFn {
        name: "cosh", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Cosh, category: "math", description: "Hyperbolic cosine",
    },
    BuiltinFn {
        name: "tanh", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Tanh, category: "math", description: "Hyperbolic tangent",
    },
    BuiltinFn {
        name: "acos", params: &[("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Acos, category: "math", description: "Arccosine",
    },
    // ── Math (2-arg) ────────────────────────────────────────────
    BuiltinFn {
        name: "pow", params: &[("base", F64), ("exp", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Pow, category: "math", description: "Power",
    },
    BuiltinFn {
        name: "fmod", params: &[("a", F64), ("b", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Fmod, category: "math", description: "Float remainder with the sign of a",
    },
    BuiltinFn {
        name: "atan2", params: &[("y", F64), ("x", F64)], variadic: false, ret: RetSig::Num(NumKind::F64),
        op: BuiltinOp::Atan2, category: "math", description: "Arctangent of y/x",
    },
    // ── Integer ─────────────────────────────────────────────────
    BuiltinFn {
        name: "abs", params: &[("x", I64)], variadic: false, ret: RetSig::Num(NumKind::I64),
        op: BuiltinOp::Abs, category: "integer", description: "Absolute value (wraps at i64::MIN)",
    },
    BuiltinFn {
        name: "gcd", params: &[("a", I64), ("b", I64)], variadic: false, ret: RetSig::Num(NumKind::I64),
        op: BuiltinOp::Gcd, category: "integer", description: "Greatest common divisor, never negative",
    },
    BuiltinFn {
        name: "rotl32", params: &[("x", U32), ("n", I32)], variadic: false, ret: RetSig::Num(NumKind::U32),
        op: BuiltinOp::Rotl32, category: "integer", description: "Rotate 32 bits left",
    },
    BuiltinFn {
        name: "rotr32", params: &[("x", U32), ("n", I32)], variadic: false, ret: RetSig::Num(NumKind::U32),
        op: BuiltinOp::Rotr32, category: "integer", description: "Rotate 32 bits right",
    },
    BuiltinFn {
        name: "rotl64", params: &[("x", U64), ("n", I32)], variadic: false, ret: RetSig::Num(NumKind::U64),
        op: BuiltinOp::Rotl64, category: "integer", description: "Rotate 64 bits left",
    },
    BuiltinFn {
        name: "rotr64", params: &[("x", U64), ("n", I32)], variadic: false, ret: RetSig::Num(NumKind::U64),
        op: BuiltinOp::Rotr64, category: "integer", description: "Rotate 64 bits right",
    },
    // ── Output ──────────────────────────────────────────────────
    BuiltinFn {
        name: "printf", params: &[("format", ParamSig::Str)], variadic: true, ret: RetSig::Num(NumKind::I32),
        op: BuiltinOp::Printf, category: "io", description: "Formatted output. Returns bytes written",
    },
    BuiltinFn {
        name: "puts", params: &[("s", ParamSig::Str)], variadic: false, ret: RetSig::Num(NumKind::I32),
        op: BuiltinOp::Puts, category: "io", description: "Write a string and a newline",
    },
    BuiltinFn {
        name: "putc", params: &[("ch", I32), ("stream", I32)], variadic: false, ret: RetSig::Num(NumKind::I32),
        op: BuiltinOp::Putc, category: "io", description: "Write one byte. Returns the byte",
    },
    BuiltinFn {
        name: "fwrite", params: &[("buf", ParamSig::Array), ("size", I64), ("count", I64), ("stream", I32)],
        variadic: false, ret: RetSig::Num(NumKind::I64),
        op: BuiltinOp::Fwrite, category: "io", description: "Write the low `size` bytes of `count` elements, little-endian",
    },
    // ── Computation result ──────────────────────────────────────
    BuiltinFn {
        name: "check_pow", params: &[("a", I32), ("b", I32), ("c", I32), ("d", I32)], variadic: false,
        ret: RetSig::Num(NumKind::I32),
        op: BuiltinOp::CheckPow, category: "result", description: "Hash the nonce, store the hash, 1 if it beats the target",
    },
    BuiltinFn {
        name: "sync_r", params: &[], variadic: false, ret: RetSig::Void,
        op: BuiltinOp::SyncR, category: "result", description: "Copy isPow/isBounty from the variable `r` into the result",
    },
    BuiltinFn {
        name: "pull_the_rest", params: &[("m", ParamSig::Array), ("s", ParamSig::Array)], variadic: false,
        ret: RetSig::Void,
        op: BuiltinOp::PullTheRest, category: "result", description: "Copy personalized ints into m and storage into s",
    },
];

/// Predefined stream handles for `putc`/`fwrite`.
pub static STREAMS: &[(&str, i32)] = &[("stdout", 1), ("stderr", 2)];

pub fn lookup_builtin(name: &str) -> Option<&'static BuiltinFn> {
    BUILTINS.iter().find(|b| b.name == name)
}

impl BuiltinFn {
    /// C-style prototype, e.g. `f64 pow(f64 base, f64 exp)`.
    pub fn signature(&self) -> String {
        let mut params: Vec<String> = self
            .params
            .iter()
            .map(|(name, sig)| match sig {
                ParamSig::Num(kind) => format!("{} {name}", kind.name()),
                ParamSig::Str => format!("string {name}"),
                ParamSig::Array => format!("array {name}"),
            })
            .collect();
        if self.variadic {
            params.push("...".into());
        }
        format!("{} {}({})", self.ret.ty(), self.name, params.join(", "))
    }
}

/// Host side of a run: the output sink and the computation result, if the
/// host supplied one.
pub struct HostIo<'a> {
    pub out: &'a mut dyn Write,
    pub result: Option<&'a mut ComputationResult>,
}

impl<'a> HostIo<'a> {
    pub fn new(out: &'a mut dyn Write, result: Option<&'a mut ComputationResult>) -> Self {
        Self { out, result }
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Void)
}

fn f64_arg(args: &[Value], index: usize) -> f64 {
    arg(args, index).as_f64()
}

/// Run a builtin. Arguments arrive converted to the declared parameter kinds.
pub fn invoke(op: BuiltinOp, args: &[Value], io: &mut HostIo<'_>) -> Result<Value, RuntimeError> {
    let unary = |f: fn(f64) -> f64| Value::F64(f(f64_arg(args, 0)));
    let value = match op {
        BuiltinOp::Sin => unary(f64::sin),
        BuiltinOp::Cos => unary(f64::cos),
        BuiltinOp::Tan => unary(f64::tan),
        BuiltinOp::Exp => unary(f64::exp),
        BuiltinOp::Exp2 => unary(f64::exp2),
        BuiltinOp::Log => unary(f64::ln),
        BuiltinOp::Log2 => unary(f64::log2),
        BuiltinOp::Log10 => unary(f64::log10),
        BuiltinOp::Sqrt => unary(f64::sqrt),
        BuiltinOp::Floor => unary(f64::floor),
        BuiltinOp::Ceil => unary(f64::ceil),
        BuiltinOp::Fabs => unary(f64::abs),
        BuiltinOp::Atan => unary(f64::atan),
        BuiltinOp::Sinh => unary(f64::sinh),
        BuiltinOp::Cosh => unary(f64::cosh),
        BuiltinOp::Tanh => unary(f64::tanh),
        BuiltinOp::Acos => unary(f64::acos),
        BuiltinOp::Pow => Value::F64(f64_arg(args, 0).powf(f64_arg(args, 1))),
        BuiltinOp::Fmod => Value::F64(f64_arg(args, 0) % f64_arg(args, 1)),
        BuiltinOp::Atan2 => Value::F64(f64_arg(args, 0).atan2(f64_arg(args, 1))),
        BuiltinOp::Abs => Value::I64(arg(args, 0).as_i64().wrapping_abs()),
        BuiltinOp::Gcd => Value::I64(gcd(arg(args, 0).as_i64(), arg(args, 1).as_i64())),
        BuiltinOp::Rotl32 => Value::U32(arg(args, 0).as_u32().rotate_left(arg(args, 1).as_u32())),
        BuiltinOp::Rotr32 => Value::U32(arg(args, 0).as_u32().rotate_right(arg(args, 1).as_u32())),
        BuiltinOp::Rotl64 => Value::U64(arg(args, 0).as_u64().rotate_left(arg(args, 1).as_u32())),
        BuiltinOp::Rotr64 => Value::U64(arg(args, 0).as_u64().rotate_right(arg(args, 1).as_u32())),
        BuiltinOp::Printf => {
            let text = match args.first() {
                Some(Value::Str(fmt)) => printf::format(fmt, args.get(1..).unwrap_or_default()),
                _ => String::new(),
            };
            io.out.write_all(text.as_bytes())?;
            Value::I32(i32::try_from(text.len()).unwrap_or(i32::MAX))
        }
        BuiltinOp::Puts => {
            if let Some(Value::Str(s)) = args.first() {
                io.out.write_all(s.as_bytes())?;
            }
            io.out.write_all(b"\n")?;
            Value::I32(1)
        }
        BuiltinOp::Putc => {
            let ch = arg(args, 0).as_i32();
            io.out.write_all(&[ch as u8])?;
            Value::I32(ch & 0xFF)
        }
        BuiltinOp::Fwrite => Value::I64(fwrite(args, io)?),
        BuiltinOp::CheckPow => {
            let words = [
                arg(args, 0).as_i32(),
                arg(args, 1).as_i32(),
                arg(args, 2).as_i32(),
                arg(args, 3).as_i32(),
            ];
            Value::I32(pow::check_pow(words, io.result.as_deref_mut()))
        }
        BuiltinOp::SyncR => {
            sync_r(args.first(), io);
            Value::Void
        }
        BuiltinOp::PullTheRest => {
            pull_the_rest(&arg(args, 0), &arg(args, 1), io);
            Value::Void
        }
    };
    Ok(value)
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a as i64
}

/// Raw little-endian bits of an element, floats included.
fn element_bits(value: &Value) -> u64 {
    match value {
        Value::F32(v) => u64::from(v.to_bits()),
        Value::F64(v) => v.to_bits(),
        other => other.as_u64(),
    }
}

fn fwrite(args: &[Value], io: &mut HostIo<'_>) -> Result<i64, RuntimeError> {
    let Value::Array(buf) = arg(args, 0) else {
        return Ok(0);
    };
    let size = arg(args, 1).as_i64().clamp(0, 8) as usize;
    let count = usize::try_from(arg(args, 2).as_i64()).unwrap_or(0);
    if size == 0 {
        return Ok(0);
    }
    let buf = buf.borrow();
    let mut bytes = Vec::with_capacity(size * count.min(buf.len()));
    let mut written = 0i64;
    for element in buf.elements.iter().take(count) {
        bytes.extend_from_slice(&element_bits(element).to_le_bytes()[..size]);
        written += 1;
    }
    io.out.write_all(&bytes)?;
    Ok(written)
}

fn sync_r(r: Option<&Value>, io: &mut HostIo<'_>) {
    let Some(result) = io.result.as_deref_mut() else {
        debug!("sync_r: no computation result attached");
        return;
    };
    let flags = match r {
        Some(Value::Struct(st)) => {
            let st = st.borrow();
            st.field("isPow")
                .zip(st.field("isBounty"))
                .map(|(pow, bounty)| (pow.as_bool(), bounty.as_bool()))
        }
        Some(Value::Array(arr)) => {
            let arr = arr.borrow();
            arr.elements
                .first()
                .zip(arr.elements.get(1))
                .map(|(pow, bounty)| (pow.as_bool(), bounty.as_bool()))
        }
        _ => None,
    };
    if let Some((is_pow, is_bounty)) = flags {
        result.is_pow = is_pow;
        result.is_bounty = is_bounty;
    }
}

fn pull_the_rest(m: &Value, s: &Value, io: &mut HostIo<'_>) {
    let (Value::Array(m), Value::Array(s)) = (m, s) else {
        return;
    };
    let Some(result) = io.result.as_deref() else {
        debug!("pull_the_rest: no computation result attached");
        return;
    };
    let (m_len, s_len) = (m.borrow().len(), s.borrow().len());
    if m_len != PERSONALIZED_LEN || s_len != result.storage.len() {
        warn!(
            m_len,
            s_len,
            expected_m = PERSONALIZED_LEN,
            expected_s = result.storage.len(),
            "pull_the_rest: array length mismatch, nothing copied"
        );
        return;
    }
    copy_ints(&mut m.borrow_mut(), &result.personalized_ints);
    copy_ints(&mut s.borrow_mut(), &result.storage);
}

fn copy_ints(dst: &mut ArrayValue, src: &[i32]) {
    let kind = dst.kind;
    for (slot, v) in dst.elements.iter_mut().zip(src) {
        *slot = Value::I32(*v).convert(kind);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn call(op: BuiltinOp, args: &[Value]) -> (Value, Vec<u8>) {
        let mut out = Vec::new();
        let value = {
            let mut io = HostIo::new(&mut out, None);
            invoke(op, args, &mut io).unwrap()
        };
        (value, out)
    }

    #[test]
    fn table_names_are_unique() {
        for (i, a) in BUILTINS.iter().enumerate() {
            assert!(BUILTINS.iter().skip(i + 1).all(|b| b.name != a.name), "{}", a.name);
        }
        assert!(lookup_builtin("check_pow").is_some());
        assert!(lookup_builtin("main").is_none());
    }

    #[test]
    fn signatures_render() {
        assert_eq!(lookup_builtin("pow").unwrap().signature(), "f64 pow(f64 base, f64 exp)");
        assert_eq!(lookup_builtin("printf").unwrap().signature(), "i32 printf(string format, ...)");
        assert_eq!(lookup_builtin("sync_r").unwrap().signature(), "void sync_r()");
    }

    #[test]
    fn integer_helpers() {
        assert_eq!(call(BuiltinOp::Gcd, &[Value::I64(-12), Value::I64(18)]).0, Value::I64(6));
        assert_eq!(call(BuiltinOp::Gcd, &[Value::I64(0), Value::I64(0)]).0, Value::I64(0));
        assert_eq!(call(BuiltinOp::Abs, &[Value::I64(-5)]).0, Value::I64(5));
        assert_eq!(
            call(BuiltinOp::Rotl32, &[Value::U32(0x8000_0001), Value::I32(1)]).0,
            Value::U32(3)
        );
        assert_eq!(
            call(BuiltinOp::Rotr64, &[Value::U64(1), Value::I32(1)]).0,
            Value::U64(1 << 63)
        );
    }

    #[test]
    fn math_helpers() {
        assert_eq!(call(BuiltinOp::Exp2, &[Value::F64(10.0)]).0, Value::F64(1024.0));
        assert_eq!(call(BuiltinOp::Fmod, &[Value::F64(-7.0), Value::F64(3.0)]).0, Value::F64(-1.0));
    }

    #[test]
    fn printf_writes_and_counts() {
        let (n, out) = call(
            BuiltinOp::Printf,
            &[Value::Str(Rc::from("%d-%s\n")), Value::I32(4), Value::Str(Rc::from("ok"))],
        );
        assert_eq!(out, b"4-ok\n");
        assert_eq!(n, Value::I32(5));
    }

    #[test]
    fn putc_and_puts() {
        let (_, out) = call(BuiltinOp::Putc, &[Value::I32(65), Value::I32(1)]);
        assert_eq!(out, b"A");
        let (_, out) = call(BuiltinOp::Puts, &[Value::Str(Rc::from("hi"))]);
        assert_eq!(out, b"hi\n");
    }

    #[test]
    fn fwrite_writes_low_bytes_little_endian() {
        let buf = Value::new_array(NumKind::U32, 3);
        if let Value::Array(arr) = &buf {
            arr.borrow_mut().elements[0] = Value::U32(0x0102_0304);
            arr.borrow_mut().elements[1] = Value::U32(0xAABB_CCDD);
        }
        let (n, out) = call(
            BuiltinOp::Fwrite,
            &[buf, Value::I64(2), Value::I64(10), Value::I32(1)],
        );
        assert_eq!(n, Value::I64(3));
        assert_eq!(out, vec![0x04, 0x03, 0xDD, 0xCC, 0, 0]);
    }

    #[test]
    fn pull_the_rest_copies_on_matching_lengths() {
        let mut result = ComputationResult::new([0; 16], [7; 12], vec![1, 2, 3]);
        let m = Value::new_array(NumKind::I32, 12);
        let s = Value::new_array(NumKind::I64, 3);
        let mut out = Vec::new();
        let mut io = HostIo::new(&mut out, Some(&mut result));
        invoke(BuiltinOp::PullTheRest, &[m.clone(), s.clone()], &mut io).unwrap();

        let Value::Array(m) = m else { panic!() };
        let Value::Array(s) = s else { panic!() };
        assert!(m.borrow().elements.iter().all(|v| *v == Value::I32(7)));
        assert_eq!(s.borrow().elements, vec![Value::I64(1), Value::I64(2), Value::I64(3)]);
    }

    #[test]
    fn pull_the_rest_mismatch_copies_nothing() {
        let mut result = ComputationResult::new([0; 16], [7; 12], vec![1, 2, 3]);
        let m = Value::new_array(NumKind::I32, 11);
        let s = Value::new_array(NumKind::I32, 3);
        let mut out = Vec::new();
        let mut io = HostIo::new(&mut out, Some(&mut result));
        invoke(BuiltinOp::PullTheRest, &[m.clone(), s.clone()], &mut io).unwrap();

        let Value::Array(m) = m else { panic!() };
        let Value::Array(s) = s else { panic!() };
        assert!(m.borrow().elements.iter().all(|v| *v == Value::I32(0)));
        assert!(s.borrow().elements.iter().all(|v| *v == Value::I32(0)));
    }

    #[test]
    fn sync_r_reads_array_flags() {
        let mut result = ComputationResult::default();
        let r = Value::new_array(NumKind::I32, 2);
        if let Value::Array(arr) = &r {
            arr.borrow_mut().elements[0] = Value::I32(1);
        }
        let mut out = Vec::new();
        let mut io = HostIo::new(&mut out, Some(&mut result));
        invoke(BuiltinOp::SyncR, &[r], &mut io).unwrap();
        drop(io);
        assert!(result.is_pow);
        assert!(!result.is_bounty);
    }
}
