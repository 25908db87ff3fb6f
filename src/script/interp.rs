use super::{BinaryOp, Expr, RuntimeError, Stmt, Value};
use std::cmp::Ordering;

pub(crate) fn exec(
    stmts: &[Stmt],
    row: &mut [Value],
    locals: &mut [Value],
) -> Result<(), RuntimeError> {
    for stmt in stmts {
        match stmt {
            Stmt::SetLocal(slot, e) => {
                let v = eval(e, row, locals)?;
                locals[*slot] = v;
            }
            Stmt::SetField(slot, e) => {
                let v = eval(e, row, locals)?;
                row[*slot] = v;
            }
            Stmt::If(cond, then, otherwise) => {
                if eval(cond, row, locals)?.truthy() {
                    exec(then, row, locals)?;
                } else {
                    exec(otherwise, row, locals)?;
                }
            }
            Stmt::Eval(e) => {
                eval(e, row, locals)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn eval(expr: &Expr, row: &[Value], locals: &[Value]) -> Result<Value, RuntimeError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Field(slot) => Ok(row.get(*slot).cloned().unwrap_or(Value::Null)),
        Expr::Local(slot) => Ok(locals.get(*slot).cloned().unwrap_or(Value::Null)),
        Expr::Neg(e) => match eval(e, row, locals)? {
            Value::Null => Ok(Value::Null),
            v => Ok(Value::Num(-number(&v, "-")?)),
        },
        Expr::Not(e) => Ok(Value::Bool(!eval(e, row, locals)?.truthy())),
        Expr::And(a, b) => {
            if !eval(a, row, locals)?.truthy() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(b, row, locals)?.truthy()))
        }
        Expr::Or(a, b) => {
            if eval(a, row, locals)?.truthy() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(b, row, locals)?.truthy()))
        }
        Expr::Coalesce(a, b) => {
            let v = eval(a, row, locals)?;
            if v.is_null() {
                eval(b, row, locals)
            } else {
                Ok(v)
            }
        }
        Expr::Cond(c, a, b) => {
            if eval(c, row, locals)?.truthy() {
                eval(a, row, locals)
            } else {
                eval(b, row, locals)
            }
        }
        Expr::Binary(op, a, b) => {
            let l = eval(a, row, locals)?;
            let r = eval(b, row, locals)?;
            binary(*op, l, r)
        }
        Expr::Call(builtin, args) => {
            let values = args
                .iter()
                .map(|a| eval(a, row, locals))
                .collect::<Result<Vec<_>, _>>()?;
            (builtin.func)(&values)
        }
    }
}

/// Coerce to a number for arithmetic; non-numeric text and booleans fail the row.
pub(crate) fn number(v: &Value, context: &str) -> Result<f64, RuntimeError> {
    v.as_number().ok_or_else(|| {
        RuntimeError(format!(
            "'{context}' expects a number, got {} '{v}'",
            v.type_name()
        ))
    })
}

pub(crate) fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Num(a), Value::Num(b)) => a == b,
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Num(a), t @ Value::Text(_)) | (t @ Value::Text(_), Value::Num(a)) => {
            t.as_number() == Some(*a)
        }
        _ => false,
    }
}

fn order(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Num(a), Value::Num(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Num(a), t @ Value::Text(_)) => t.as_number().and_then(|b| a.partial_cmp(&b)),
        (t @ Value::Text(_), Value::Num(b)) => t.as_number().and_then(|a| a.partial_cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, RuntimeError> {
    let sym = op.symbol();
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(loose_eq(&l, &r))),
        BinaryOp::Ne => return Ok(Value::Bool(!loose_eq(&l, &r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = order(&l, &r);
            let b = match (op, ord) {
                (_, None) => false,
                (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
                (BinaryOp::Le, Some(o)) => o != Ordering::Greater,
                (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
                (_, Some(o)) => o != Ordering::Less,
            };
            return Ok(Value::Bool(b));
        }
        _ => {}
    }

    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    if op == BinaryOp::Add {
        if let (Value::Text(_), _) | (_, Value::Text(_)) = (&l, &r) {
            if !matches!(l, Value::Bool(_)) && !matches!(r, Value::Bool(_)) {
                return Ok(Value::Text(format!("{l}{r}")));
            }
        }
    }
    let a = number(&l, sym)?;
    let b = number(&r, sym)?;
    Ok(Value::Num(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => a.powf(b),
    }))
}
