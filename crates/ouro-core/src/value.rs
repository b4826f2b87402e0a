//! The tagged `Value` union (C8), shared by the emitter's constant pool,
//! the module loader's exports, and the VM's stack/heap.
//!
//! Heap-allocated variants (`Str`, `Bytes`, `List`, `Map`, `Struct`,
//! `Instance`, `Function`, `BoundMethod`, `Foreign`) are `Rc`-backed VM-owned
//! arena handles rather than values that lean on a host garbage collector —
//! cloning a `Value` clones the handle (reference count bump), and
//! `Value::ptr_eq` exposes the identity comparison lists/maps/instances use.
//! `Int`/`Float`/`Bool`/`Null`/`Pointer` are plain `Copy` payloads.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::diagnostic::RuntimeErrorKind;

/// A unit descriptor for unit-tagged numerics, e.g. `3.0 m/s` carries
/// `Unit { symbol: "m/s" }`. Units are compared by symbol; the core engine
/// does not attempt dimensional decomposition beyond that.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Unit {
    pub symbol: Rc<str>,
}

impl Unit {
    pub fn new(symbol: impl Into<Rc<str>>) -> Self {
        Unit {
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// Hashable subset of `Value` usable as a map key: `Int`, `String`, `Bool`.
/// `Float` is excluded (NaN has no well-defined equality/hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Int(i64),
    Str(Rc<str>),
    Bool(bool),
}

impl MapKey {
    pub fn from_value(v: &Value) -> Option<MapKey> {
        match v {
            Value::Int(n) => Some(MapKey::Int(*n)),
            Value::Str(s) => Some(MapKey::Str(s.clone())),
            Value::Bool(b) => Some(MapKey::Bool(*b)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            MapKey::Int(n) => Value::Int(n),
            MapKey::Str(s) => Value::Str(s),
            MapKey::Bool(b) => Value::Bool(b),
        }
    }
}

/// A key-ordered-by-insertion map, matching the data model's requirement
/// that map iteration order follows insertion order.
#[derive(Debug, Default)]
pub struct OrderedMap {
    order: Vec<MapKey>,
    index: HashMap<MapKey, usize>,
    values: Vec<Value>,
}

impl OrderedMap {
    pub fn new() -> Self {
        OrderedMap::default()
    }

    pub fn get(&self, key: &MapKey) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.values[i])
    }

    pub fn insert(&mut self, key: MapKey, value: Value) {
        if let Some(&i) = self.index.get(&key) {
            self.values[i] = value;
        } else {
            self.index.insert(key.clone(), self.order.len());
            self.order.push(key);
            self.values.push(value);
        }
    }

    pub fn remove(&mut self, key: &MapKey) -> Option<Value> {
        let i = self.index.remove(key)?;
        self.order.remove(i);
        let removed = self.values.remove(i);
        for (_, idx) in self.index.iter_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &MapKey> {
        self.order.iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Value)> {
        self.order.iter().map(move |k| (k, self.get(k).unwrap()))
    }
}

/// A fixed-shape record: field names are compile-time known, values are
/// mutable by slot index.
#[derive(Debug)]
pub struct StructValue {
    pub type_name: Rc<str>,
    pub field_names: Rc<[Rc<str>]>,
    pub fields: RefCell<Vec<Value>>,
}

/// A class instance: a class id plus a field vector (§3 Value Model).
#[derive(Debug)]
pub struct InstanceValue {
    pub class_id: u32,
    pub class_name: Rc<str>,
    pub fields: RefCell<Vec<Value>>,
}

/// A reference to a compiled function (by function-table index), used both
/// as a first-class callable value and as the target of `NEW_INSTANCE`'s
/// implicit constructor dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRef {
    pub program_id: u32,
    pub fn_index: u32,
    pub name: Rc<str>,
}

/// A closure: a function reference plus captured upvalues.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: FunctionRef,
}

/// An opaque value supplied by an embedder (spec: "foreign opaque").
pub trait Foreign: fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &str;

    /// Release any scoped resource (file handle, socket, ...) this value
    /// holds. Called by the VM's per-frame finaliser list on every frame
    /// exit path; the default is a no-op for embedder values with nothing
    /// to release.
    fn close(&self) {}
}

/// A typed raw pointer used by low-register code: an index into the VM's
/// byte-addressable memory plus the pointee's element size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedPointer {
    pub address: usize,
    pub elem_size: u8,
}

/// State behind a `for`/`for each`/aggregate iterator: the source is
/// snapshotted into `items` at `ITER_NEW` time rather than iterated lazily,
/// so mutating a list mid-loop doesn't perturb the iteration in progress.
#[derive(Debug)]
pub struct IterState {
    pub items: Vec<Value>,
    pub pos: usize,
}

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// A unit-tagged numeric, e.g. `3.0 m/s` (spec section 4.7).
    UnitNumber(f64, Unit),
    Str(Rc<str>),
    Bytes(Rc<RefCell<Vec<u8>>>),
    List(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<OrderedMap>>),
    Struct(Rc<StructValue>),
    Instance(Rc<InstanceValue>),
    Function(Rc<FunctionRef>),
    BoundMethod(Rc<BoundMethod>),
    Foreign(Rc<dyn Foreign>),
    Pointer(TypedPointer),
    Iterator(Rc<RefCell<IterState>>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(n) => write!(f, "Float({n})"),
            Value::UnitNumber(n, u) => write!(f, "UnitNumber({n} {u})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Bytes(b) => write!(f, "Bytes(len={})", b.borrow().len()),
            Value::List(l) => write!(f, "List(len={})", l.borrow().len()),
            Value::Map(m) => write!(f, "Map(len={})", m.borrow().len()),
            Value::Struct(s) => write!(f, "Struct({})", s.type_name),
            Value::Instance(i) => write!(f, "Instance({})", i.class_name),
            Value::Function(fr) => write!(f, "Function({})", fr.name),
            Value::BoundMethod(b) => write!(f, "BoundMethod({})", b.function.name),
            Value::Foreign(x) => write!(f, "Foreign({})", x.type_name()),
            Value::Pointer(p) => write!(f, "Pointer({:#x})", p.address),
            Value::Iterator(it) => write!(f, "Iterator(pos={})", it.borrow().pos),
        }
    }
}

/// The `print`-statement rendering: unquoted strings, `,`-separated list/map
/// elements, matching what a user expects to read rather than `Debug`'s
/// Rust-literal form.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::UnitNumber(n, u) => write!(f, "{n} {u}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "{:?}", b.borrow()),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {v}", k.clone().into_value())?;
                }
                write!(f, "}}")
            }
            Value::Struct(s) => write!(f, "{}", s.type_name),
            Value::Instance(i) => write!(f, "{}", i.class_name),
            Value::Function(fr) => write!(f, "{}", fr.name),
            Value::BoundMethod(b) => write!(f, "{}", b.function.name),
            Value::Foreign(x) => write!(f, "{}", x.type_name()),
            Value::Pointer(p) => write!(f, "{:#x}", p.address),
            Value::Iterator(it) => write!(f, "iterator(pos={})", it.borrow().pos),
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::UnitNumber(_, _) => "unit-number",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Struct(_) => "struct",
            Value::Instance(_) => "instance",
            Value::Function(_) => "function",
            Value::BoundMethod(_) => "bound-method",
            Value::Foreign(_) => "foreign",
            Value::Pointer(_) => "pointer",
            Value::Iterator(_) => "iterator",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            _ => true,
        }
    }

    /// Reference identity, for the heap-allocated variants whose equality
    /// the data model defines "by reference" (list, map, instance).
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Struct(a), Value::Struct(b)) => Rc::ptr_eq(a, b),
            _ => self.structural_eq(other),
        }
    }

    /// Structural equality: strings compare by content (the language has no
    /// reference-identity operator for strings — `===` on strings is still
    /// content equality), numbers compare by value, heap containers compare
    /// element-wise.
    pub fn structural_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::UnitNumber(a, ua), Value::UnitNumber(b, ub)) => ua == ub && a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => *a.borrow() == *b.borrow(),
            (Value::List(a), Value::List(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.structural_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|bv| bv.structural_eq(v)))
            }
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            _ => false,
        }
    }
}

/// Numeric promotion and arithmetic, per spec section 4.7:
/// int-with-int stays int (wrapping on overflow, no bignum promotion),
/// int-with-float promotes to float, incompatible units raise
/// `UnitMismatch`, and any operand being `Null` raises `NullReference`.
pub mod arith {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ArithOp {
        Add,
        Sub,
        Mul,
        Div,
        Mod,
    }

    pub fn binary(op: ArithOp, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeErrorKind> {
        if matches!(lhs, Value::Null) || matches!(rhs, Value::Null) {
            return Err(RuntimeErrorKind::NullReference);
        }
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => int_op(op, *a, *b).map(Value::Int),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(op, *a, *b))),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(op, *a as f64, *b))),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(op, *a, *b as f64))),
            (Value::UnitNumber(a, ua), Value::UnitNumber(b, ub)) => {
                if ua != ub {
                    return Err(RuntimeErrorKind::UnitMismatch {
                        lhs: ua.to_string(),
                        rhs: ub.to_string(),
                    });
                }
                Ok(Value::UnitNumber(float_op(op, *a, *b), ua.clone()))
            }
            // Scaling a unit-tagged number by a dimensionless scalar is
            // permitted only for multiply/divide; add/sub require matching
            // units so `3 m + 2` cannot silently produce `5 m`.
            (Value::UnitNumber(a, u), scalar) | (scalar, Value::UnitNumber(a, u))
                if matches!(scalar, Value::Int(_) | Value::Float(_))
                    && matches!(op, ArithOp::Mul | ArithOp::Div) =>
            {
                let s = match scalar {
                    Value::Int(n) => *n as f64,
                    Value::Float(n) => *n,
                    _ => unreachable!(),
                };
                Ok(Value::UnitNumber(float_op(op, *a, s), u.clone()))
            }
            (Value::UnitNumber(_, u), other) | (other, Value::UnitNumber(_, u)) => {
                Err(RuntimeErrorKind::UnitMismatch {
                    lhs: u.to_string(),
                    rhs: other.type_name().to_string(),
                })
            }
            (Value::Str(a), Value::Str(b)) if op == ArithOp::Add => {
                Ok(Value::Str(Rc::from(format!("{a}{b}"))))
            }
            (a, b) => Err(RuntimeErrorKind::TypeMismatch {
                expected: "numeric operands".to_string(),
                found: format!("{}, {}", a.type_name(), b.type_name()),
            }),
        }
    }

    fn int_op(op: ArithOp, a: i64, b: i64) -> Result<i64, RuntimeErrorKind> {
        Ok(match op {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div => {
                if b == 0 {
                    return Err(RuntimeErrorKind::DivideByZero);
                }
                a.wrapping_div(b)
            }
            ArithOp::Mod => {
                if b == 0 {
                    return Err(RuntimeErrorKind::DivideByZero);
                }
                a.wrapping_rem(b)
            }
        })
    }

    fn float_op(op: ArithOp, a: f64, b: f64) -> f64 {
        match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Mod => a % b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::arith::{binary, ArithOp};
    use super::*;

    #[test]
    fn int_overflow_wraps() {
        let max = Value::Int(i64::MAX);
        let one = Value::Int(1);
        let result = binary(ArithOp::Add, &max, &one).unwrap();
        assert!(matches!(result, Value::Int(n) if n == i64::MIN));
    }

    #[test]
    fn int_float_promotes() {
        let result = binary(ArithOp::Add, &Value::Int(1), &Value::Float(0.5)).unwrap();
        assert!(matches!(result, Value::Float(n) if n == 1.5));
    }

    #[test]
    fn null_arithmetic_is_null_reference() {
        let err = binary(ArithOp::Add, &Value::Null, &Value::Int(1)).unwrap_err();
        assert_eq!(err, RuntimeErrorKind::NullReference);
    }

    #[test]
    fn unit_mismatch_rejected() {
        let a = Value::UnitNumber(3.0, Unit::new("m/s"));
        let b = Value::UnitNumber(2.0, Unit::new("kg"));
        let err = binary(ArithOp::Add, &a, &b).unwrap_err();
        assert!(matches!(err, RuntimeErrorKind::UnitMismatch { .. }));
    }

    #[test]
    fn unit_scaling_by_scalar() {
        let a = Value::UnitNumber(3.0, Unit::new("m/s"));
        let result = binary(ArithOp::Mul, &a, &Value::Int(2)).unwrap();
        assert!(matches!(result, Value::UnitNumber(n, _) if n == 6.0));
    }

    #[test]
    fn string_identity_is_content_equality() {
        let a = Value::Str(Rc::from("hi"));
        let b = Value::Str(Rc::from("hi"));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn list_identity_is_by_reference() {
        let a = Value::List(Rc::new(RefCell::new(vec![Value::Int(1)])));
        let b = Value::List(Rc::new(RefCell::new(vec![Value::Int(1)])));
        assert!(!a.ptr_eq(&b));
        assert!(a.structural_eq(&b));
        let c = a.clone();
        assert!(a.ptr_eq(&c));
    }

    #[test]
    fn ordered_map_preserves_insertion_order() {
        let mut m = OrderedMap::new();
        m.insert(MapKey::Str(Rc::from("b")), Value::Int(2));
        m.insert(MapKey::Str(Rc::from("a")), Value::Int(1));
        let keys: Vec<_> = m.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![MapKey::Str(Rc::from("b")), MapKey::Str(Rc::from("a"))]
        );
    }
}
