//! [`ValueHost`] implementation over [`PyValue`], supplying the source
//! language's operator semantics: the numeric tower with boolean coercion,
//! floor division and modulo rounding toward negative infinity, sequence
//! concatenation and repetition, set algebra, and equality-based membership.

use std::cmp::Ordering;
use std::rc::Rc;

use pystep_code::CompareKind;
use pystep_vm::{BinaryOp, SequenceKind, UnaryOp, ValueHost};

use crate::error::ValueError;
use crate::value::{as_num, dict_upsert, IterState, ListMethod, Num, PyValue, SliceValue};

/// The stock capability host.
pub struct PyHost;

fn type_error(message: impl Into<String>) -> ValueError {
    ValueError::Type(message.into())
}

fn unsupported_operand(symbol: &str, left: &PyValue, right: &PyValue) -> ValueError {
    type_error(format!(
        "unsupported operand type(s) for {symbol}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

// === Numeric tower ===

fn int_or_float(op: &str, n: Num) -> Result<i64, ValueError> {
    match n {
        Num::Int(v) => Ok(v),
        Num::Float(_) => Err(type_error(format!(
            "unsupported operand type(s) for {op}: 'float'"
        ))),
    }
}

fn floor_div_int(a: i64, b: i64) -> Result<i64, ValueError> {
    if b == 0 {
        return Err(ValueError::ZeroDivision("integer division or modulo by zero"));
    }
    let q = a / b;
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn mod_int(a: i64, b: i64) -> Result<i64, ValueError> {
    if b == 0 {
        return Err(ValueError::ZeroDivision("integer division or modulo by zero"));
    }
    let r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn mod_float(a: f64, b: f64) -> Result<f64, ValueError> {
    if b == 0.0 {
        return Err(ValueError::ZeroDivision("float modulo"));
    }
    Ok(a - b * (a / b).floor())
}

/// Arithmetic on the numeric tower. Integer results that overflow `i64`
/// spill into floats rather than wrapping.
fn arith(op: BinaryOp, left: Num, right: Num) -> Result<PyValue, ValueError> {
    use BinaryOp::*;
    if let (Num::Int(a), Num::Int(b)) = (left, right) {
        match op {
            Add => {
                return Ok(a
                    .checked_add(b)
                    .map(PyValue::Int)
                    .unwrap_or(PyValue::Float(a as f64 + b as f64)))
            }
            Subtract => {
                return Ok(a
                    .checked_sub(b)
                    .map(PyValue::Int)
                    .unwrap_or(PyValue::Float(a as f64 - b as f64)))
            }
            Multiply => {
                return Ok(a
                    .checked_mul(b)
                    .map(PyValue::Int)
                    .unwrap_or(PyValue::Float(a as f64 * b as f64)))
            }
            FloorDivide => return floor_div_int(a, b).map(PyValue::Int),
            Modulo => return mod_int(a, b).map(PyValue::Int),
            Power => {
                if b >= 0 {
                    let result = u32::try_from(b)
                        .ok()
                        .and_then(|exp| a.checked_pow(exp))
                        .map(PyValue::Int)
                        .unwrap_or(PyValue::Float((a as f64).powf(b as f64)));
                    return Ok(result);
                }
                return Ok(PyValue::Float((a as f64).powf(b as f64)));
            }
            TrueDivide => {
                if b == 0 {
                    return Err(ValueError::ZeroDivision("division by zero"));
                }
                return Ok(PyValue::Float(a as f64 / b as f64));
            }
            _ => {}
        }
    }

    let (a, b) = match (left, right) {
        (Num::Int(a), Num::Int(b)) => (a as f64, b as f64),
        (Num::Int(a), Num::Float(b)) => (a as f64, b),
        (Num::Float(a), Num::Int(b)) => (a, b as f64),
        (Num::Float(a), Num::Float(b)) => (a, b),
    };
    match op {
        Add => Ok(PyValue::Float(a + b)),
        Subtract => Ok(PyValue::Float(a - b)),
        Multiply => Ok(PyValue::Float(a * b)),
        Power => Ok(PyValue::Float(a.powf(b))),
        TrueDivide => {
            if b == 0.0 {
                return Err(ValueError::ZeroDivision("float division by zero"));
            }
            Ok(PyValue::Float(a / b))
        }
        FloorDivide => {
            if b == 0.0 {
                return Err(ValueError::ZeroDivision("float floor division by zero"));
            }
            Ok(PyValue::Float((a / b).floor()))
        }
        Modulo => mod_float(a, b).map(PyValue::Float),
        // Bitwise and structural operators never reach the float path.
        _ => unreachable!(),
    }
}

fn bitwise(op: BinaryOp, a: i64, b: i64) -> Result<i64, ValueError> {
    match op {
        BinaryOp::Lshift | BinaryOp::Rshift => {
            if b < 0 {
                return Err(ValueError::Domain("negative shift count".to_owned()));
            }
            if b >= 64 {
                return Ok(if matches!(op, BinaryOp::Lshift) || a >= 0 { 0 } else { -1 });
            }
            Ok(if matches!(op, BinaryOp::Lshift) {
                a << b
            } else {
                a >> b
            })
        }
        BinaryOp::And => Ok(a & b),
        BinaryOp::Xor => Ok(a ^ b),
        BinaryOp::Or => Ok(a | b),
        _ => unreachable!(),
    }
}

// === Sequences and slices ===

fn seq_index(index: i64, len: usize, what: &'static str) -> Result<usize, ValueError> {
    let len = len as i64;
    let adjusted = if index < 0 { index + len } else { index };
    if adjusted < 0 || adjusted >= len {
        return Err(ValueError::Index(what));
    }
    Ok(adjusted as usize)
}

/// Resolve a slice against a sequence length the way `slice.indices` does:
/// negative bounds count from the end, everything clamps.
fn slice_indices(s: SliceValue, len: i64) -> Result<(i64, i64, i64), ValueError> {
    let step = s.step.unwrap_or(1);
    if step == 0 {
        return Err(ValueError::Domain("slice step cannot be zero".to_owned()));
    }
    let adjust = |bound: Option<i64>, default: i64, min: i64, max: i64| match bound {
        None => default,
        Some(b) => {
            let b = if b < 0 { b + len } else { b };
            b.clamp(min, max)
        }
    };
    if step > 0 {
        Ok((
            adjust(s.start, 0, 0, len),
            adjust(s.stop, len, 0, len),
            step,
        ))
    } else {
        Ok((
            adjust(s.start, len - 1, -1, len - 1),
            adjust(s.stop, -1, -1, len - 1),
            step,
        ))
    }
}

fn slice_pick<T: Clone>(items: &[T], s: SliceValue) -> Result<Vec<T>, ValueError> {
    let (mut i, stop, step) = slice_indices(s, items.len() as i64)?;
    let mut out = Vec::new();
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(items[i as usize].clone());
        i += step;
    }
    Ok(out)
}

fn repeat<T: Clone>(items: &[T], count: i64) -> Vec<T> {
    if count <= 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(items.len() * count as usize);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

fn seq_repeat(seq: &PyValue, count: &PyValue) -> Option<Result<PyValue, ValueError>> {
    let count = match as_num(count) {
        Some(Num::Int(n)) => n,
        _ => return None,
    };
    match seq {
        PyValue::Str(s) => Some(Ok(PyValue::str(if count <= 0 {
            String::new()
        } else {
            s.repeat(count as usize)
        }))),
        PyValue::Tuple(items) => Some(Ok(PyValue::tuple(repeat(items, count)))),
        PyValue::List(items) => Some(Ok(PyValue::list(repeat(&items.borrow(), count)))),
        _ => None,
    }
}

fn set_op(op: BinaryOp, a: &[PyValue], b: &[PyValue]) -> Vec<PyValue> {
    let not_in = |items: &[PyValue], probe: &PyValue| !items.iter().any(|x| x == probe);
    match op {
        BinaryOp::And => a.iter().filter(|x| !not_in(b, x)).cloned().collect(),
        BinaryOp::Or => {
            let mut out = a.to_vec();
            out.extend(b.iter().filter(|x| not_in(a, x)).cloned());
            out
        }
        BinaryOp::Xor => {
            let mut out: Vec<PyValue> =
                a.iter().filter(|x| not_in(b, x)).cloned().collect();
            out.extend(b.iter().filter(|x| not_in(a, x)).cloned());
            out
        }
        BinaryOp::Subtract => a.iter().filter(|x| not_in(b, x)).cloned().collect(),
        _ => unreachable!(),
    }
}

fn subscript(container: &PyValue, key: &PyValue) -> Result<PyValue, ValueError> {
    match container {
        PyValue::Dict(entries) => entries
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| ValueError::Key(key.to_string())),
        PyValue::Str(s) => match key {
            PyValue::Slice(slice) => {
                let chars: Vec<char> = s.chars().collect();
                let picked = slice_pick(&chars, *slice)?;
                Ok(PyValue::str(picked.into_iter().collect::<String>()))
            }
            _ => {
                let index = subscript_index(key, container)?;
                let chars: Vec<char> = s.chars().collect();
                let at = seq_index(index, chars.len(), "string index out of range")?;
                Ok(PyValue::str(chars[at].to_string()))
            }
        },
        PyValue::Tuple(items) => match key {
            PyValue::Slice(slice) => Ok(PyValue::tuple(slice_pick(items, *slice)?)),
            _ => {
                let index = subscript_index(key, container)?;
                let at = seq_index(index, items.len(), "tuple index out of range")?;
                Ok(items[at].clone())
            }
        },
        PyValue::List(items) => {
            let items = items.borrow();
            match key {
                PyValue::Slice(slice) => Ok(PyValue::list(slice_pick(&items, *slice)?)),
                _ => {
                    let index = subscript_index(key, container)?;
                    let at = seq_index(index, items.len(), "list index out of range")?;
                    Ok(items[at].clone())
                }
            }
        }
        PyValue::Range(r) => {
            let index = subscript_index(key, container)?;
            let index = if index < 0 { index + r.len() } else { index };
            r.at(index)
                .map(PyValue::Int)
                .ok_or(ValueError::Index("range object index out of range"))
        }
        _ => Err(type_error(format!(
            "'{}' object is not subscriptable",
            container.type_name()
        ))),
    }
}

fn subscript_index(key: &PyValue, container: &PyValue) -> Result<i64, ValueError> {
    match as_num(key) {
        Some(Num::Int(n)) => Ok(n),
        _ => Err(type_error(format!(
            "{} indices must be integers, not {}",
            container.type_name(),
            key.type_name()
        ))),
    }
}

// === Ordering ===

fn num_order(a: Num, b: Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
        (Num::Int(a), Num::Float(b)) => (a as f64).partial_cmp(&b),
        (Num::Float(a), Num::Int(b)) => a.partial_cmp(&(b as f64)),
        (Num::Float(a), Num::Float(b)) => a.partial_cmp(&b),
    }
}

/// Recursive ordering. `None` means the operands are unordered (NaN was
/// involved), in which case every order comparison is false.
fn try_order(
    symbol: &str,
    left: &PyValue,
    right: &PyValue,
) -> Result<Option<Ordering>, ValueError> {
    if let (Some(a), Some(b)) = (as_num(left), as_num(right)) {
        return Ok(num_order(a, b));
    }
    match (left, right) {
        (PyValue::Str(a), PyValue::Str(b)) => Ok(Some(a.cmp(b))),
        (PyValue::Tuple(a), PyValue::Tuple(b)) => order_items(symbol, a, b),
        (PyValue::List(a), PyValue::List(b)) => order_items(symbol, &a.borrow(), &b.borrow()),
        _ => Err(type_error(format!(
            "'{symbol}' not supported between instances of '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn order_items(
    symbol: &str,
    a: &[PyValue],
    b: &[PyValue],
) -> Result<Option<Ordering>, ValueError> {
    for (x, y) in a.iter().zip(b.iter()) {
        if x == y {
            continue;
        }
        return try_order(symbol, x, y);
    }
    Ok(Some(a.len().cmp(&b.len())))
}

fn membership(probe: &PyValue, container: &PyValue) -> Result<bool, ValueError> {
    match container {
        PyValue::Str(haystack) => match probe {
            PyValue::Str(needle) => Ok(haystack.contains(needle.as_ref())),
            _ => Err(type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                probe.type_name()
            ))),
        },
        PyValue::Tuple(items) => Ok(items.iter().any(|x| x == probe)),
        PyValue::List(items) | PyValue::Set(items) => {
            Ok(items.borrow().iter().any(|x| x == probe))
        }
        PyValue::Dict(entries) => Ok(entries.borrow().iter().any(|(k, _)| k == probe)),
        PyValue::Range(r) => Ok(match as_num(probe) {
            Some(Num::Int(n)) => r.contains(n),
            Some(Num::Float(x)) => x.fract() == 0.0 && r.contains(x as i64),
            None => false,
        }),
        _ => Err(type_error(format!(
            "argument of type '{}' is not iterable",
            container.type_name()
        ))),
    }
}

// === List methods ===

fn call_list_method(
    method: ListMethod,
    items: &std::cell::RefCell<Vec<PyValue>>,
    args: Vec<PyValue>,
) -> Result<PyValue, ValueError> {
    let given = args.len();
    let mut args = args;
    match method {
        ListMethod::Append => match (args.pop(), args.pop()) {
            (Some(value), None) => {
                items.borrow_mut().push(value);
                Ok(PyValue::None)
            }
            _ => Err(ValueError::Arity(format!(
                "append() takes exactly one argument ({given} given)"
            ))),
        },
        ListMethod::Pop => match (args.pop(), args.pop()) {
            (None, None) => items
                .borrow_mut()
                .pop()
                .ok_or(ValueError::Index("pop from empty list")),
            (Some(index), None) => {
                let index = match as_num(&index) {
                    Some(Num::Int(n)) => n,
                    _ => {
                        return Err(type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            index.type_name()
                        )))
                    }
                };
                let mut items = items.borrow_mut();
                let at = seq_index(index, items.len(), "pop index out of range")?;
                Ok(items.remove(at))
            }
            _ => Err(ValueError::Arity(format!(
                "pop() takes at most 1 argument ({given} given)"
            ))),
        },
    }
}

// === Host ===

impl ValueHost for PyHost {
    type Value = PyValue;
    type Error = ValueError;

    fn unary(&self, op: UnaryOp, value: PyValue) -> Result<PyValue, ValueError> {
        match op {
            UnaryOp::Not => Ok(PyValue::Bool(!self.truthy(&value)?)),
            UnaryOp::Positive => match as_num(&value) {
                Some(Num::Int(n)) => Ok(PyValue::Int(n)),
                Some(Num::Float(x)) => Ok(PyValue::Float(x)),
                None => Err(type_error(format!(
                    "bad operand type for unary +: '{}'",
                    value.type_name()
                ))),
            },
            UnaryOp::Negative => match as_num(&value) {
                Some(Num::Int(n)) => Ok(PyValue::Int(n.wrapping_neg())),
                Some(Num::Float(x)) => Ok(PyValue::Float(-x)),
                None => Err(type_error(format!(
                    "bad operand type for unary -: '{}'",
                    value.type_name()
                ))),
            },
            UnaryOp::Invert => match as_num(&value) {
                Some(Num::Int(n)) => Ok(PyValue::Int(!n)),
                _ => Err(type_error(format!(
                    "bad operand type for unary ~: '{}'",
                    value.type_name()
                ))),
            },
        }
    }

    fn binary(&self, op: BinaryOp, left: PyValue, right: PyValue) -> Result<PyValue, ValueError> {
        use BinaryOp::*;
        match op {
            Subscript => return subscript(&left, &right),
            MatrixMultiply => return Err(unsupported_operand("@", &left, &right)),
            _ => {}
        }

        // Numeric operands take the numeric tower; anything else falls
        // through to the structural cases below.
        if let (Some(a), Some(b)) = (as_num(&left), as_num(&right)) {
            return match op {
                Lshift => bitwise(op, int_or_float("<<", a)?, int_or_float("<<", b)?)
                    .map(PyValue::Int),
                Rshift => bitwise(op, int_or_float(">>", a)?, int_or_float(">>", b)?)
                    .map(PyValue::Int),
                And => bitwise(op, int_or_float("&", a)?, int_or_float("&", b)?)
                    .map(PyValue::Int),
                Xor => bitwise(op, int_or_float("^", a)?, int_or_float("^", b)?)
                    .map(PyValue::Int),
                Or => bitwise(op, int_or_float("|", a)?, int_or_float("|", b)?)
                    .map(PyValue::Int),
                _ => arith(op, a, b),
            };
        }

        match (op, &left, &right) {
            (Add, PyValue::Str(a), PyValue::Str(b)) => {
                Ok(PyValue::str(format!("{a}{b}")))
            }
            (Add, PyValue::Tuple(a), PyValue::Tuple(b)) => {
                let mut out = a.as_ref().clone();
                out.extend(b.iter().cloned());
                Ok(PyValue::tuple(out))
            }
            (Add, PyValue::List(a), PyValue::List(b)) => {
                let mut out = a.borrow().clone();
                out.extend(b.borrow().iter().cloned());
                Ok(PyValue::list(out))
            }
            (Multiply, _, _) => seq_repeat(&left, &right)
                .or_else(|| seq_repeat(&right, &left))
                .unwrap_or_else(|| Err(unsupported_operand("*", &left, &right))),
            (And | Or | Xor | Subtract, PyValue::Set(a), PyValue::Set(b)) => {
                Ok(PyValue::set(set_op(op, &a.borrow(), &b.borrow())))
            }
            _ => Err(unsupported_operand(op_symbol(op), &left, &right)),
        }
    }

    fn inplace(
        &self,
        op: BinaryOp,
        target: PyValue,
        rhs: PyValue,
    ) -> Result<PyValue, ValueError> {
        match (&op, &target) {
            // list += any iterable extends the list in place; both names
            // bound to the handle see the growth.
            (BinaryOp::Add, PyValue::List(items)) => {
                if let Some(extra) = rhs.elements() {
                    items.borrow_mut().extend(extra);
                    return Ok(target);
                }
                Err(type_error(format!(
                    "'{}' object is not iterable",
                    rhs.type_name()
                )))
            }
            (
                BinaryOp::And | BinaryOp::Or | BinaryOp::Xor | BinaryOp::Subtract,
                PyValue::Set(items),
            ) => {
                if let PyValue::Set(other) = &rhs {
                    let merged = set_op(op, &items.borrow(), &other.borrow());
                    *items.borrow_mut() = merged;
                    return Ok(target);
                }
                self.binary(op, target, rhs)
            }
            _ => self.binary(op, target, rhs),
        }
    }

    fn compare(
        &self,
        kind: CompareKind,
        left: &PyValue,
        right: &PyValue,
    ) -> Result<bool, ValueError> {
        match kind {
            CompareKind::Eq => Ok(left == right),
            CompareKind::Ne => Ok(left != right),
            CompareKind::In => membership(left, right),
            CompareKind::NotIn => membership(left, right).map(|found| !found),
            CompareKind::Lt | CompareKind::Le | CompareKind::Gt | CompareKind::Ge => {
                let ordering = try_order(kind.symbol(), left, right)?;
                Ok(match ordering {
                    None => false,
                    Some(ord) => match kind {
                        CompareKind::Lt => ord == Ordering::Less,
                        CompareKind::Le => ord != Ordering::Greater,
                        CompareKind::Gt => ord == Ordering::Greater,
                        CompareKind::Ge => ord != Ordering::Less,
                        _ => unreachable!(),
                    },
                })
            }
        }
    }

    fn truthy(&self, value: &PyValue) -> Result<bool, ValueError> {
        Ok(match value {
            PyValue::None => false,
            PyValue::Bool(b) => *b,
            PyValue::Int(n) => *n != 0,
            PyValue::Float(x) => *x != 0.0,
            PyValue::Str(s) => !s.is_empty(),
            PyValue::Tuple(items) => !items.is_empty(),
            PyValue::List(items) | PyValue::Set(items) => !items.borrow().is_empty(),
            PyValue::Dict(entries) => !entries.borrow().is_empty(),
            PyValue::Range(r) => !r.is_empty(),
            PyValue::Slice(_) | PyValue::Iter(_) | PyValue::Builtin(_) | PyValue::Method(..) => {
                true
            }
        })
    }

    fn from_bool(&self, value: bool) -> PyValue {
        PyValue::Bool(value)
    }

    fn make_iter(&self, value: PyValue) -> Result<PyValue, ValueError> {
        match value {
            // Already an iterator: hand back the same handle.
            PyValue::Iter(_) => Ok(value),
            PyValue::Range(r) => Ok(PyValue::Iter(Rc::new(std::cell::RefCell::new(
                IterState::Range {
                    next: r.start,
                    stop: r.stop,
                    step: r.step,
                },
            )))),
            other => {
                let items = other
                    .elements()
                    .ok_or(ValueError::NotIterable(other.type_name()))?;
                Ok(PyValue::Iter(Rc::new(std::cell::RefCell::new(
                    IterState::Seq { items, index: 0 },
                ))))
            }
        }
    }

    fn iter_next(&self, iter: &mut PyValue) -> Result<Option<PyValue>, ValueError> {
        match iter {
            PyValue::Iter(state) => Ok(state.borrow_mut().advance()),
            other => Err(type_error(format!(
                "'{}' object is not an iterator",
                other.type_name()
            ))),
        }
    }

    fn get_attr(&self, object: &PyValue, name: &str) -> Result<PyValue, ValueError> {
        if let PyValue::List(items) = object {
            let method = match name {
                "append" => Some(ListMethod::Append),
                "pop" => Some(ListMethod::Pop),
                _ => None,
            };
            if let Some(method) = method {
                return Ok(PyValue::Method(method, Rc::clone(items)));
            }
        }
        Err(ValueError::Attribute(object.type_name(), name.to_owned()))
    }

    fn set_attr(&self, object: &PyValue, name: &str, _value: PyValue) -> Result<(), ValueError> {
        Err(ValueError::Attribute(object.type_name(), name.to_owned()))
    }

    fn del_attr(&self, object: &PyValue, name: &str) -> Result<(), ValueError> {
        Err(ValueError::Attribute(object.type_name(), name.to_owned()))
    }

    fn set_item(
        &self,
        container: &PyValue,
        key: PyValue,
        value: PyValue,
    ) -> Result<(), ValueError> {
        match container {
            PyValue::List(items) => {
                let mut items = items.borrow_mut();
                let index = subscript_index(&key, container)?;
                let at = seq_index(index, items.len(), "list assignment index out of range")?;
                items[at] = value;
                Ok(())
            }
            PyValue::Dict(entries) => {
                dict_upsert(&mut entries.borrow_mut(), key, value);
                Ok(())
            }
            other => Err(type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn del_item(&self, container: &PyValue, key: PyValue) -> Result<(), ValueError> {
        match container {
            PyValue::List(items) => {
                let mut items = items.borrow_mut();
                let index = subscript_index(&key, container)?;
                let at = seq_index(index, items.len(), "list assignment index out of range")?;
                items.remove(at);
                Ok(())
            }
            PyValue::Dict(entries) => {
                let mut entries = entries.borrow_mut();
                let at = entries
                    .iter()
                    .position(|(k, _)| *k == key)
                    .ok_or_else(|| ValueError::Key(key.to_string()))?;
                entries.remove(at);
                Ok(())
            }
            other => Err(type_error(format!(
                "'{}' object does not support item deletion",
                other.type_name()
            ))),
        }
    }

    fn call(
        &self,
        callee: PyValue,
        args: Vec<PyValue>,
        kwargs: Vec<(PyValue, PyValue)>,
    ) -> Result<PyValue, ValueError> {
        match callee {
            PyValue::Builtin(builtin) => {
                if !kwargs.is_empty() {
                    return Err(type_error(format!(
                        "{}() takes no keyword arguments",
                        builtin.name
                    )));
                }
                (builtin.invoke)(&args)
            }
            PyValue::Method(method, receiver) => {
                if !kwargs.is_empty() {
                    return Err(type_error(format!(
                        "{}() takes no keyword arguments",
                        method.name()
                    )));
                }
                call_list_method(method, &receiver, args)
            }
            other => Err(ValueError::NotCallable(other.type_name())),
        }
    }

    fn call_ex(
        &self,
        callee: PyValue,
        args: PyValue,
        kwargs: Option<PyValue>,
    ) -> Result<PyValue, ValueError> {
        let args = args
            .elements()
            .ok_or_else(|| type_error("argument after * must be an iterable".to_owned()))?;
        let kwargs = match kwargs {
            None => Vec::new(),
            Some(PyValue::Dict(entries)) => entries.borrow().clone(),
            Some(_) => {
                return Err(type_error("argument after ** must be a mapping".to_owned()))
            }
        };
        self.call(callee, args, kwargs)
    }

    fn make_slice(
        &self,
        start: PyValue,
        stop: PyValue,
        step: Option<PyValue>,
    ) -> Result<PyValue, ValueError> {
        let bound = |value: PyValue| match value {
            PyValue::None => Ok(None),
            other => match as_num(&other) {
                Some(Num::Int(n)) => Ok(Some(n)),
                _ => Err(type_error(format!(
                    "slice indices must be integers or None, not {}",
                    other.type_name()
                ))),
            },
        };
        Ok(PyValue::Slice(SliceValue {
            start: bound(start)?,
            stop: bound(stop)?,
            step: match step {
                None => None,
                Some(value) => bound(value)?,
            },
        }))
    }

    fn build(&self, kind: SequenceKind, items: Vec<PyValue>) -> Result<PyValue, ValueError> {
        Ok(match kind {
            SequenceKind::Tuple => PyValue::tuple(items),
            SequenceKind::List => PyValue::list(items),
            SequenceKind::Set => PyValue::set(items),
        })
    }

    fn build_map(&self, pairs: Vec<(PyValue, PyValue)>) -> Result<PyValue, ValueError> {
        Ok(PyValue::dict(pairs))
    }

    fn merge(&self, kind: SequenceKind, sources: Vec<PyValue>) -> Result<PyValue, ValueError> {
        let mut items = Vec::new();
        for source in sources {
            let elements = source
                .elements()
                .ok_or(ValueError::NotIterable(source.type_name()))?;
            items.extend(elements);
        }
        self.build(kind, items)
    }

    fn merge_maps(&self, sources: Vec<PyValue>) -> Result<PyValue, ValueError> {
        let mut entries: Vec<(PyValue, PyValue)> = Vec::new();
        for source in sources {
            match source {
                PyValue::Dict(pairs) => {
                    for (key, value) in pairs.borrow().iter() {
                        dict_upsert(&mut entries, key.clone(), value.clone());
                    }
                }
                other => {
                    return Err(type_error(format!(
                        "'{}' object is not a mapping",
                        other.type_name()
                    )))
                }
            }
        }
        Ok(PyValue::Dict(Rc::new(std::cell::RefCell::new(entries))))
    }

    fn describe(&self, value: &PyValue) -> String {
        value.to_string()
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    use BinaryOp::*;
    match op {
        Power => "**",
        Multiply => "*",
        MatrixMultiply => "@",
        FloorDivide => "//",
        TrueDivide => "/",
        Modulo => "%",
        Add => "+",
        Subtract => "-",
        Subscript => "[]",
        Lshift => "<<",
        Rshift => ">>",
        And => "&",
        Xor => "^",
        Or => "|",
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use pystep_vm::ValueHost;

    proptest! {
        /// a == b * (a // b) + (a % b) for every nonzero divisor.
        #[test]
        fn test_divmod_identity(a in any::<i32>(), b in any::<i32>()) {
            prop_assume!(b != 0);
            let (a, b) = (i64::from(a), i64::from(b));
            let q = floor_div_int(a, b).unwrap();
            let r = mod_int(a, b).unwrap();
            prop_assert_eq!(b * q + r, a);
            // The remainder takes the divisor's sign (or is zero).
            prop_assert!(r == 0 || (r < 0) == (b < 0));
        }

        /// Every element of a built list is a member of it.
        #[test]
        fn test_membership_after_build(items in proptest::collection::vec(any::<i32>(), 0..16)) {
            let host = PyHost;
            let values: Vec<PyValue> = items.iter().map(|n| PyValue::Int(i64::from(*n))).collect();
            let list = host.build(SequenceKind::List, values.clone()).unwrap();
            for value in &values {
                prop_assert!(host.compare(CompareKind::In, value, &list).unwrap());
            }
        }

        /// Range membership agrees with materializing the range.
        #[test]
        fn test_range_membership_matches_elements(
            start in -50i64..50,
            stop in -50i64..50,
            step in prop_oneof![-4i64..0, 1i64..5],
            probe in -60i64..60,
        ) {
            let range = PyValue::Range(crate::value::RangeValue { start, stop, step });
            let expanded = range.elements().unwrap();
            let expect = expanded.iter().any(|v| *v == PyValue::Int(probe));
            let got = PyHost
                .compare(CompareKind::In, &PyValue::Int(probe), &range)
                .unwrap();
            prop_assert_eq!(got, expect);
        }
    }
}
