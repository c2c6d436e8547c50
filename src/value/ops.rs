//! Operator semantics over `Value`.

use super::Value;
use crate::error::ValueError;

fn operands(op: &'static str, a: &Value, b: &Value) -> ValueError {
    ValueError::Operands {
        op,
        left: a.type_name(),
        right: b.type_name(),
    }
}

/// Float if either side is Float, Int otherwise. Both sides must be numeric.
fn arithmetic(
    op: &'static str,
    a: &Value,
    b: &Value,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, ValueError> {
    if !a.is_numeric() || !b.is_numeric() {
        return Err(operands(op, a, b));
    }
    if matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)) {
        Ok(Value::Float(float_op(a.as_float()?, b.as_float()?)))
    } else {
        Ok(Value::Int(int_op(a.as_int()?, b.as_int()?)))
    }
}

pub fn add(a: Value, b: Value) -> Result<Value, ValueError> {
    match (a, b) {
        (Value::Str(mut s), b) => {
            s.push_str(&b.to_string());
            Ok(Value::Str(s))
        }
        (a, Value::Str(s)) => Ok(Value::Str(format!("{}{}", a, s))),
        (Value::List(mut items), Value::List(rest)) => {
            items.extend(rest);
            Ok(Value::List(items))
        }
        (Value::List(mut items), b) => {
            items.push(b);
            Ok(Value::List(items))
        }
        (a, Value::List(mut items)) => {
            items.insert(0, a);
            Ok(Value::List(items))
        }
        (a, b) => arithmetic("+", &a, &b, i64::wrapping_add, |x, y| x + y),
    }
}

pub fn subtract(a: Value, b: Value) -> Result<Value, ValueError> {
    arithmetic("-", &a, &b, i64::wrapping_sub, |x, y| x - y)
}

pub fn multiply(a: Value, b: Value) -> Result<Value, ValueError> {
    arithmetic("*", &a, &b, i64::wrapping_mul, |x, y| x * y)
}

/// Always Float. Division by zero follows IEEE.
pub fn divide(a: Value, b: Value) -> Result<Value, ValueError> {
    if !a.is_numeric() || !b.is_numeric() {
        return Err(operands("/", &a, &b));
    }
    Ok(Value::Float(a.as_float()? / b.as_float()?))
}

fn compare(
    op: &'static str,
    a: &Value,
    b: &Value,
    str_cmp: fn(&str, &str) -> bool,
    num_cmp: fn(f64, f64) -> bool,
) -> Result<bool, ValueError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(str_cmp(x, y)),
        (a, b) if a.is_numeric() && b.is_numeric() => Ok(num_cmp(a.as_float()?, b.as_float()?)),
        (a, b) => Err(operands(op, a, b)),
    }
}

pub fn less(a: &Value, b: &Value) -> Result<bool, ValueError> {
    compare("<", a, b, |x, y| x < y, |x, y| x < y)
}

pub fn less_equal(a: &Value, b: &Value) -> Result<bool, ValueError> {
    compare("<=", a, b, |x, y| x <= y, |x, y| x <= y)
}

pub fn greater(a: &Value, b: &Value) -> Result<bool, ValueError> {
    compare(">", a, b, |x, y| x > y, |x, y| x > y)
}

pub fn greater_equal(a: &Value, b: &Value) -> Result<bool, ValueError> {
    compare(">=", a, b, |x, y| x >= y, |x, y| x >= y)
}

pub fn negate(a: Value) -> Result<Value, ValueError> {
    match a {
        Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
        Value::Float(f) => Ok(Value::Float(-f)),
        Value::Bool(b) => Ok(Value::Int(-i64::from(b))),
        other => Err(ValueError::Operand {
            op: "-",
            operand: other.type_name(),
        }),
    }
}

pub fn not(a: &Value) -> Value {
    Value::Bool(!a.as_bool())
}

fn checked_index(index: &Value, len: usize) -> Result<usize, ValueError> {
    let i = index.as_int()?;
    if i < 0 || i as u64 >= len as u64 {
        return Err(ValueError::Index { index: i, len });
    }
    Ok(i as usize)
}

/// `container[index]`: a list element, or a one-character string.
pub fn index(container: &Value, index: &Value) -> Result<Value, ValueError> {
    match container {
        Value::List(items) => {
            let i = checked_index(index, items.len())?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let len = s.chars().count();
            let i = checked_index(index, len)?;
            Ok(Value::Str(s.chars().skip(i).take(1).collect()))
        }
        other => Err(ValueError::Operand {
            op: "[]",
            operand: other.type_name(),
        }),
    }
}

fn slice_bounds(start: &Value, end: &Value, len: usize) -> Result<(usize, usize), ValueError> {
    let from = start.as_int()?;
    let to = end.as_int()?;
    if from < 0 || from as u64 > len as u64 {
        return Err(ValueError::Index { index: from, len });
    }
    if to < from || to as u64 > len as u64 {
        return Err(ValueError::Index { index: to, len });
    }
    Ok((from as usize, to as usize))
}

/// `container[start:end]`, end exclusive.
pub fn slice(container: &Value, start: &Value, end: &Value) -> Result<Value, ValueError> {
    match container {
        Value::List(items) => {
            let (from, to) = slice_bounds(start, end, items.len())?;
            Ok(Value::List(items[from..to].to_vec()))
        }
        Value::Str(s) => {
            let (from, to) = slice_bounds(start, end, s.chars().count())?;
            Ok(Value::Str(s.chars().skip(from).take(to - from).collect()))
        }
        other => Err(ValueError::Operand {
            op: "[:]",
            operand: other.type_name(),
        }),
    }
}

/// `container[index] = value` on a list held in a variable.
pub fn set_index(container: &mut Value, index: &Value, value: Value) -> Result<(), ValueError> {
    match container {
        Value::List(items) => {
            let i = checked_index(index, items.len())?;
            items[i] = value;
            Ok(())
        }
        other => Err(ValueError::Operand {
            op: "[]=",
            operand: other.type_name(),
        }),
    }
}
