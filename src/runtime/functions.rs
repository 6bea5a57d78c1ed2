//! Pure value operations used by the evaluator.

use serde_json::{json, Value};
use std::cmp::Ordering;

use crate::domain::expr::format_number;
use crate::domain::{BinaryOp, Literal};

use super::error::RuntimeError;

pub fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(n) => number(*n),
        Literal::String(s) => Value::String(s.clone()),
    }
}

/// Integral numbers are kept as JSON integers.
pub fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

/// Text a value contributes to an include path. Null and compound values do not bind.
pub fn path_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n.as_f64().map(format_number),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Gate truthiness: only boolean `true` opens a gate.
pub fn is_true(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

/// `bool(x)`: coerce any value to a boolean, null being false.
pub fn to_bool(value: &Value) -> Value {
    let b = match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    };
    Value::Bool(b)
}

pub fn not(value: &Value) -> Result<Value, RuntimeError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => Err(RuntimeError::Type(format!("NOT expects a boolean, got {}", other))),
    }
}

pub fn negate(value: &Value) -> Result<Value, RuntimeError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) => Ok(number(-n.as_f64().unwrap_or(0.0))),
        other => Err(RuntimeError::Type(format!("cannot negate {}", other))),
    }
}

/// Three-valued `AND` / `OR`.
pub fn logical(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let as_bool = |value: &Value| match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(RuntimeError::Type(format!(
            "{} expects booleans, got {}",
            op.as_str(),
            other
        ))),
    };

    let result = match (op, as_bool(left)?, as_bool(right)?) {
        (BinaryOp::And, Some(false), _) | (BinaryOp::And, _, Some(false)) => Value::Bool(false),
        (BinaryOp::And, Some(true), Some(true)) => Value::Bool(true),
        (BinaryOp::Or, Some(true), _) | (BinaryOp::Or, _, Some(true)) => Value::Bool(true),
        (BinaryOp::Or, Some(false), Some(false)) => Value::Bool(false),
        _ => Value::Null,
    };
    Ok(result)
}

/// Comparison operators. A null operand yields null.
pub fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().partial_cmp(&b.as_f64()),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    };

    let result = match (op, ordering) {
        (BinaryOp::Eq, ordering) => ordering == Some(Ordering::Equal),
        (BinaryOp::NotEq, ordering) => ordering != Some(Ordering::Equal),
        (_, None) => {
            return Err(RuntimeError::Type(format!(
                "cannot compare {} {} {}",
                left,
                op.as_str(),
                right
            )))
        }
        (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
        (BinaryOp::LtEq, Some(o)) => o != Ordering::Greater,
        (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
        (BinaryOp::GtEq, Some(o)) => o != Ordering::Less,
        (op, _) => {
            return Err(RuntimeError::Type(format!("`{}` is not a comparison", op.as_str())))
        }
    };

    Ok(Value::Bool(result))
}

/// Arithmetic operators. A null operand yields null; `+` also joins strings.
pub fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    if let (BinaryOp::Add, Value::String(a), Value::String(b)) = (op, left, right) {
        return Ok(Value::String(format!("{}{}", a, b)));
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(RuntimeError::Type(format!(
            "cannot apply `{}` to {} and {}",
            op.as_str(),
            left,
            right
        )));
    };

    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => return Ok(Value::Null),
        BinaryOp::Div => a / b,
        other => {
            return Err(RuntimeError::Type(format!(
                "`{}` is not an arithmetic operator",
                other.as_str()
            )))
        }
    };

    Ok(number(result))
}

/// `concat(..)`: null when any operand is null.
pub fn concat(values: &[Value]) -> Result<Value, RuntimeError> {
    let mut out = String::new();
    for value in values {
        match value {
            Value::Null => return Ok(Value::Null),
            Value::String(s) => out.push_str(s),
            Value::Number(_) | Value::Bool(_) => out.push_str(&path_text(value).unwrap_or_default()),
            other => return Err(RuntimeError::Type(format!("cannot concat {}", other))),
        }
    }
    Ok(Value::String(out))
}
