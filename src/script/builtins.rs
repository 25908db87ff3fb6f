//! The capability table: every function a script may call.

use super::interp::{loose_eq, number};
use super::{RuntimeError, Value};

type Func = fn(&[Value]) -> Result<Value, RuntimeError>;

pub struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` for variadic functions
    pub max_args: Option<usize>,
    pub(crate) func: Func,
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}()", self.name)
    }
}

const fn f(name: &'static str, min_args: usize, max_args: Option<usize>, func: Func) -> Builtin {
    Builtin {
        name,
        min_args,
        max_args,
        func,
    }
}

pub static FUNCTIONS: &[Builtin] = &[
    f("abs", 1, Some(1), |a| math1(a, "abs", f64::abs)),
    f("round", 1, Some(2), round),
    f("floor", 1, Some(1), |a| math1(a, "floor", f64::floor)),
    f("ceil", 1, Some(1), |a| math1(a, "ceil", f64::ceil)),
    f("trunc", 1, Some(1), |a| math1(a, "trunc", f64::trunc)),
    f("sign", 1, Some(1), |a| math1(a, "sign", sign)),
    f("sqrt", 1, Some(1), |a| math1(a, "sqrt", f64::sqrt)),
    f("exp", 1, Some(1), |a| math1(a, "exp", f64::exp)),
    f("ln", 1, Some(1), |a| math1(a, "ln", f64::ln)),
    f("log10", 1, Some(1), |a| math1(a, "log10", f64::log10)),
    f("log", 1, Some(2), log),
    f("pow", 2, Some(2), |a| math2(a, "pow", f64::powf)),
    f("min", 1, None, |a| extreme(a, "min", f64::min)),
    f("max", 1, None, |a| extreme(a, "max", f64::max)),
    f("clamp", 3, Some(3), clamp),
    f("between", 3, Some(3), between),
    f("coalesce", 1, None, coalesce),
    f("ifnull", 2, Some(2), coalesce),
    f("isnull", 1, Some(1), |a| Ok(Value::Bool(a[0].is_null()))),
    f("isnum", 1, Some(1), |a| {
        Ok(Value::Bool(a[0].as_number().is_some_and(f64::is_finite)))
    }),
    f("isfinite", 1, Some(1), |a| {
        Ok(Value::Bool(matches!(a[0], Value::Num(n) if n.is_finite())))
    }),
    f("num", 1, Some(1), |a| {
        Ok(a[0].as_number().map(Value::Num).unwrap_or(Value::Null))
    }),
    f("str", 1, Some(1), |a| Ok(text_of(&a[0]).map(Value::Text).unwrap_or(Value::Null))),
    f("lower", 1, Some(1), |a| map_text(&a[0], |s| s.to_lowercase())),
    f("upper", 1, Some(1), |a| map_text(&a[0], |s| s.to_uppercase())),
    f("trim", 1, Some(1), |a| map_text(&a[0], |s| s.trim().to_string())),
    f("len", 1, Some(1), |a| {
        Ok(text_of(&a[0])
            .map(|s| Value::Num(s.chars().count() as f64))
            .unwrap_or(Value::Null))
    }),
    f("contains", 2, Some(2), |a| text_test(a, |s, t| s.contains(t))),
    f("startswith", 2, Some(2), |a| text_test(a, |s, t| s.starts_with(t))),
    f("endswith", 2, Some(2), |a| text_test(a, |s, t| s.ends_with(t))),
    f("remap", 3, None, remap),
    f("iif", 3, Some(3), |a| {
        Ok(if a[0].truthy() { a[1].clone() } else { a[2].clone() })
    }),
];

pub(crate) fn lookup(name: &str) -> Option<&'static Builtin> {
    FUNCTIONS.iter().find(|b| b.name == name)
}

fn arg(a: &[Value], i: usize, name: &str) -> Result<Option<f64>, RuntimeError> {
    match &a[i] {
        Value::Null => Ok(None),
        v => number(v, name).map(Some),
    }
}

fn math1(a: &[Value], name: &str, op: fn(f64) -> f64) -> Result<Value, RuntimeError> {
    Ok(arg(a, 0, name)?.map(|x| Value::Num(op(x))).unwrap_or(Value::Null))
}

fn math2(a: &[Value], name: &str, op: fn(f64, f64) -> f64) -> Result<Value, RuntimeError> {
    match (arg(a, 0, name)?, arg(a, 1, name)?) {
        (Some(x), Some(y)) => Ok(Value::Num(op(x, y))),
        _ => Ok(Value::Null),
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        x
    }
}

fn round(a: &[Value]) -> Result<Value, RuntimeError> {
    let Some(x) = arg(a, 0, "round")? else {
        return Ok(Value::Null);
    };
    let digits = if a.len() > 1 { arg(a, 1, "round")?.unwrap_or(0.0) } else { 0.0 };
    let scale = 10f64.powi(digits as i32);
    Ok(Value::Num((x * scale).round() / scale))
}

fn log(a: &[Value]) -> Result<Value, RuntimeError> {
    if a.len() == 1 {
        return math1(a, "log", f64::ln);
    }
    math2(a, "log", f64::log)
}

fn extreme(a: &[Value], name: &str, pick: fn(f64, f64) -> f64) -> Result<Value, RuntimeError> {
    let mut best: Option<f64> = None;
    for i in 0..a.len() {
        if let Some(x) = arg(a, i, name)? {
            best = Some(best.map_or(x, |b| pick(b, x)));
        }
    }
    Ok(best.map(Value::Num).unwrap_or(Value::Null))
}

fn clamp(a: &[Value]) -> Result<Value, RuntimeError> {
    let x = arg(a, 0, "clamp")?;
    let lo = arg(a, 1, "clamp")?;
    let hi = arg(a, 2, "clamp")?;
    Ok(match (x, lo, hi) {
        (Some(x), Some(lo), Some(hi)) => Value::Num(x.max(lo).min(hi)),
        (Some(x), _, _) => Value::Num(x),
        _ => Value::Null,
    })
}

fn between(a: &[Value]) -> Result<Value, RuntimeError> {
    let x = arg(a, 0, "between")?;
    let lo = arg(a, 1, "between")?;
    let hi = arg(a, 2, "between")?;
    Ok(Value::Bool(matches!(
        (x, lo, hi),
        (Some(x), Some(lo), Some(hi)) if x >= lo && x <= hi
    )))
}

fn coalesce(a: &[Value]) -> Result<Value, RuntimeError> {
    Ok(a.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null))
}

/// `remap(value, from1, to1, from2, to2, …, [default])`
///
/// Without a default, an unmatched value passes through unchanged.
fn remap(a: &[Value]) -> Result<Value, RuntimeError> {
    let (value, pairs) = (&a[0], &a[1..]);
    for pair in pairs.chunks_exact(2) {
        if loose_eq(value, &pair[0]) {
            return Ok(pair[1].clone());
        }
    }
    if pairs.len() % 2 == 1 {
        return Ok(pairs[pairs.len() - 1].clone());
    }
    Ok(value.clone())
}

fn text_of(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::Text(t) => Some(t.clone()),
        other => Some(other.to_string()),
    }
}

fn map_text(v: &Value, op: fn(&str) -> String) -> Result<Value, RuntimeError> {
    Ok(text_of(v).map(|s| Value::Text(op(&s))).unwrap_or(Value::Null))
}

fn text_test(a: &[Value], op: fn(&str, &str) -> bool) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(match (text_of(&a[0]), text_of(&a[1])) {
        (Some(s), Some(t)) => op(&s, &t),
        _ => false,
    }))
}
