//! Backing state for the `NEW_LIST`/`NEW_MAP`/`NEW_ACC` family of opcodes
//! (spec section 4.4, "Aggregation"/"Heap"): a LIFO stack of in-progress
//! collection/accumulator builders, paralleling the operand stack.
//!
//! `PUSH_ACC` always folds into `self.builders.last_mut()` rather than
//! inspecting the operand stack to guess which kind of builder is active,
//! so nested list/map/aggregate construction (`sum of all x in xs { [x] }`)
//! resolves correctly: each builder's own opcodes are always emitted and
//! executed as a balanced run before control returns to its enclosing one.

use std::cell::RefCell;
use std::rc::Rc;

use ouro_core::value::arith::{self, ArithOp};
use ouro_core::value::{MapKey, OrderedMap, Value};
use ouro_core::RuntimeErrorKind;

use crate::error::VmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccKind {
    Sum,
    Product,
    Min,
    Max,
    Average,
}

impl AccKind {
    pub fn from_tag(tag: i64) -> Result<AccKind, VmError> {
        Ok(match tag {
            0 => AccKind::Sum,
            1 => AccKind::Product,
            2 => AccKind::Min,
            3 => AccKind::Max,
            4 => AccKind::Average,
            other => return Err(VmError::Internal(format!("unknown aggregate kind tag {other}"))),
        })
    }
}

pub enum Builder {
    List(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<OrderedMap>>),
    Acc { kind: AccKind, count: u64, state: Option<Value> },
}

impl Builder {
    /// Fold `value` into this builder; `key` is `Some` only for the
    /// map-insert case, where `PUSH_ACC` consumes two stack values.
    pub fn push(&mut self, key: Option<Value>, value: Value) -> Result<(), VmError> {
        match self {
            Builder::List(list) => {
                list.borrow_mut().push(value);
                Ok(())
            }
            Builder::Map(map) => {
                let key = key.expect("map builder always receives a key");
                let map_key = MapKey::from_value(&key).ok_or_else(|| {
                    VmError::Runtime(RuntimeErrorKind::TypeMismatch {
                        expected: "int, string or bool map key".to_string(),
                        found: key.type_name().to_string(),
                    })
                })?;
                map.borrow_mut().insert(map_key, value);
                Ok(())
            }
            Builder::Acc { kind, count, state } => {
                *count += 1;
                let folded = match state.take() {
                    None => value,
                    Some(prev) => fold(*kind, prev, value)?,
                };
                *state = Some(folded);
                Ok(())
            }
        }
    }

    pub fn finalize(self) -> Result<Value, VmError> {
        match self {
            Builder::Acc { kind, count, state } => Ok(finalize_acc(kind, count, state)?),
            _ => Err(VmError::Internal("POP_ACC on a non-accumulator builder".to_string())),
        }
    }
}

fn fold(kind: AccKind, prev: Value, next: Value) -> Result<Value, VmError> {
    Ok(match kind {
        AccKind::Sum | AccKind::Average => arith::binary(ArithOp::Add, &prev, &next)?,
        AccKind::Product => arith::binary(ArithOp::Mul, &prev, &next)?,
        AccKind::Min => {
            if numeric_lt(&next, &prev)? {
                next
            } else {
                prev
            }
        }
        AccKind::Max => {
            if numeric_lt(&prev, &next)? {
                next
            } else {
                prev
            }
        }
    })
}

fn finalize_acc(kind: AccKind, count: u64, state: Option<Value>) -> Result<Value, VmError> {
    Ok(match kind {
        AccKind::Sum => state.unwrap_or(Value::Int(0)),
        AccKind::Product => state.unwrap_or(Value::Int(1)),
        AccKind::Min | AccKind::Max => state.unwrap_or(Value::Null),
        AccKind::Average => match state {
            None => Value::Null,
            Some(sum) => arith::binary(ArithOp::Div, &sum, &Value::Int(count as i64))?,
        },
    })
}

fn as_f64(v: &Value) -> Result<f64, VmError> {
    match v {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(n) => Ok(*n),
        other => Err(VmError::Runtime(RuntimeErrorKind::TypeMismatch {
            expected: "numeric operand".to_string(),
            found: other.type_name().to_string(),
        })),
    }
}

fn numeric_lt(a: &Value, b: &Value) -> Result<bool, VmError> {
    Ok(as_f64(a)? < as_f64(b)?)
}
