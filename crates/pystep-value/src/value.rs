//! The value model: a dynamically typed universe of Python-flavored values
//! with shared-handle container semantics.
//!
//! Containers are reference handles (`Rc` around interior mutability), so
//! storing a list in two names aliases one underlying vector, as the source
//! language's assignment semantics require. Dictionaries are insertion-
//! ordered association vectors; sets are insertion-ordered vectors with
//! equality-based dedup. Equality follows Python: booleans are integers,
//! `1 == 1.0`, and container equality is deep.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::ValueError;

/// Signature of a native builtin function.
pub type BuiltinFn = fn(&[PyValue]) -> Result<PyValue, ValueError>;

/// A named native function installed in the builtin scope.
#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub invoke: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

/// The list methods `LOAD_ATTR` can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMethod {
    Append,
    Pop,
}

impl ListMethod {
    pub fn name(self) -> &'static str {
        match self {
            ListMethod::Append => "append",
            ListMethod::Pop => "pop",
        }
    }
}

/// An explicit slice object built by `BUILD_SLICE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceValue {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

/// A lazily-materialized arithmetic progression, as produced by `range()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    /// Element count. Widened to `i128` internally: bounds spanning most of
    /// the `i64` domain must not overflow, they describe a huge lazy range.
    pub fn len(&self) -> i64 {
        let (start, stop) = (self.start as i128, self.stop as i128);
        let span = if self.step > 0 { stop - start } else { start - stop };
        if span <= 0 {
            return 0;
        }
        let step = (self.step as i128).abs();
        let count = (span + step - 1) / step;
        count.min(i64::MAX as i128) as i64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, value: i64) -> bool {
        let (value, start, step) = (value as i128, self.start as i128, self.step as i128);
        if self.step > 0 {
            value >= start && value < self.stop as i128 && (value - start) % step == 0
        } else {
            value <= start && value > self.stop as i128 && (start - value) % (-step) == 0
        }
    }

    pub fn at(&self, index: i64) -> Option<i64> {
        if index < 0 || index >= self.len() {
            return None;
        }
        let value = self.start as i128 + index as i128 * self.step as i128;
        i64::try_from(value).ok()
    }
}

/// Mutable cursor state behind an iterator handle.
#[derive(Debug)]
pub enum IterState {
    Seq { items: Vec<PyValue>, index: usize },
    Range { next: i64, stop: i64, step: i64 },
}

impl IterState {
    pub fn advance(&mut self) -> Option<PyValue> {
        match self {
            IterState::Seq { items, index } => {
                let item = items.get(*index).cloned()?;
                *index += 1;
                Some(item)
            }
            IterState::Range { next, stop, step } => {
                let exhausted = if *step > 0 { *next >= *stop } else { *next <= *stop };
                if exhausted {
                    return None;
                }
                let item = PyValue::Int(*next);
                // An overflowing increment would have left the range anyway;
                // park the cursor on the exhaustion bound.
                *next = next.checked_add(*step).unwrap_or(*stop);
                Some(item)
            }
        }
    }
}

/// A runtime value.
#[derive(Debug, Clone)]
pub enum PyValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Tuple(Rc<Vec<PyValue>>),
    List(Rc<RefCell<Vec<PyValue>>>),
    Set(Rc<RefCell<Vec<PyValue>>>),
    Dict(Rc<RefCell<Vec<(PyValue, PyValue)>>>),
    Slice(SliceValue),
    Range(RangeValue),
    Iter(Rc<RefCell<IterState>>),
    Builtin(Builtin),
    /// A list method bound to its receiver, e.g. `k.append`.
    Method(ListMethod, Rc<RefCell<Vec<PyValue>>>),
}

impl PyValue {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        PyValue::Str(s.into())
    }

    pub fn tuple(items: Vec<PyValue>) -> Self {
        PyValue::Tuple(Rc::new(items))
    }

    pub fn list(items: Vec<PyValue>) -> Self {
        PyValue::List(Rc::new(RefCell::new(items)))
    }

    /// Build a set value, deduplicating by equality and keeping first
    /// occurrences in insertion order.
    pub fn set(items: Vec<PyValue>) -> Self {
        let mut unique: Vec<PyValue> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.iter().any(|u| *u == item) {
                unique.push(item);
            }
        }
        PyValue::Set(Rc::new(RefCell::new(unique)))
    }

    pub fn dict(pairs: Vec<(PyValue, PyValue)>) -> Self {
        let mut entries: Vec<(PyValue, PyValue)> = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            dict_upsert(&mut entries, key, value);
        }
        PyValue::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PyValue::None => "NoneType",
            PyValue::Bool(_) => "bool",
            PyValue::Int(_) => "int",
            PyValue::Float(_) => "float",
            PyValue::Str(_) => "str",
            PyValue::Tuple(_) => "tuple",
            PyValue::List(_) => "list",
            PyValue::Set(_) => "set",
            PyValue::Dict(_) => "dict",
            PyValue::Slice(_) => "slice",
            PyValue::Range(_) => "range",
            PyValue::Iter(_) => "iterator",
            PyValue::Builtin(_) | PyValue::Method(..) => "builtin_function_or_method",
        }
    }

    /// Snapshot of the elements an iteration over this value would yield,
    /// or `None` when the value is not iterable. Strings yield one-character
    /// strings; dictionaries yield their keys.
    pub fn elements(&self) -> Option<Vec<PyValue>> {
        match self {
            PyValue::Str(s) => Some(s.chars().map(|c| PyValue::str(c.to_string())).collect()),
            PyValue::Tuple(items) => Some(items.as_ref().clone()),
            PyValue::List(items) | PyValue::Set(items) => Some(items.borrow().clone()),
            PyValue::Dict(entries) => {
                Some(entries.borrow().iter().map(|(k, _)| k.clone()).collect())
            }
            PyValue::Range(r) => {
                let mut state = IterState::Range {
                    next: r.start,
                    stop: r.stop,
                    step: r.step,
                };
                let mut out = Vec::new();
                while let Some(item) = state.advance() {
                    out.push(item);
                }
                Some(out)
            }
            _ => None,
        }
    }
}

/// Insert or replace a key in an association vector, keeping the position
/// of a replaced key.
pub(crate) fn dict_upsert(entries: &mut Vec<(PyValue, PyValue)>, key: PyValue, value: PyValue) {
    for (existing, slot) in entries.iter_mut() {
        if *existing == key {
            *slot = value;
            return;
        }
    }
    entries.push((key, value));
}

// === Equality ===

/// Numeric view of a value, with booleans coerced to integers.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

pub(crate) fn as_num(value: &PyValue) -> Option<Num> {
    match value {
        PyValue::Bool(b) => Some(Num::Int(i64::from(*b))),
        PyValue::Int(n) => Some(Num::Int(*n)),
        PyValue::Float(x) => Some(Num::Float(*x)),
        _ => None,
    }
}

fn num_eq(left: Num, right: Num) -> bool {
    match (left, right) {
        (Num::Int(a), Num::Int(b)) => a == b,
        (Num::Float(a), Num::Float(b)) => a == b,
        (Num::Int(a), Num::Float(b)) | (Num::Float(b), Num::Int(a)) => a as f64 == b,
    }
}

impl PartialEq for PyValue {
    fn eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (as_num(self), as_num(other)) {
            return num_eq(a, b);
        }
        match (self, other) {
            (PyValue::None, PyValue::None) => true,
            (PyValue::Str(a), PyValue::Str(b)) => a == b,
            (PyValue::Tuple(a), PyValue::Tuple(b)) => a == b,
            (PyValue::List(a), PyValue::List(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (PyValue::Set(a), PyValue::Set(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|item| b.contains(item))
            }
            (PyValue::Dict(a), PyValue::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(key, value)| {
                        b.iter().any(|(k, v)| k == key && v == value)
                    })
            }
            (PyValue::Slice(a), PyValue::Slice(b)) => a == b,
            (PyValue::Range(a), PyValue::Range(b)) => a == b,
            (PyValue::Iter(a), PyValue::Iter(b)) => Rc::ptr_eq(a, b),
            (PyValue::Builtin(a), PyValue::Builtin(b)) => std::ptr::eq(
                a.invoke as *const (),
                b.invoke as *const (),
            ),
            (PyValue::Method(ma, ra), PyValue::Method(mb, rb)) => {
                ma == mb && Rc::ptr_eq(ra, rb)
            }
            _ => false,
        }
    }
}

// === Repr ===

pub(crate) fn fmt_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

fn fmt_items(f: &mut fmt::Formatter<'_>, items: &[PyValue]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for PyValue {
    /// Renders the value the way the source language's `repr` would.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PyValue::None => write!(f, "None"),
            PyValue::Bool(true) => write!(f, "True"),
            PyValue::Bool(false) => write!(f, "False"),
            PyValue::Int(n) => write!(f, "{n}"),
            PyValue::Float(x) => write!(f, "{}", fmt_float(*x)),
            PyValue::Str(s) => write!(f, "'{s}'"),
            PyValue::Tuple(items) => {
                write!(f, "(")?;
                fmt_items(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            PyValue::List(items) => {
                write!(f, "[")?;
                fmt_items(f, &items.borrow())?;
                write!(f, "]")
            }
            PyValue::Set(items) => {
                let items = items.borrow();
                if items.is_empty() {
                    return write!(f, "set()");
                }
                write!(f, "{{")?;
                fmt_items(f, &items)?;
                write!(f, "}}")
            }
            PyValue::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            PyValue::Slice(s) => {
                let part = |bound: Option<i64>| match bound {
                    Some(n) => n.to_string(),
                    None => "None".to_owned(),
                };
                write!(
                    f,
                    "slice({}, {}, {})",
                    part(s.start),
                    part(s.stop),
                    part(s.step)
                )
            }
            PyValue::Range(r) => {
                if r.step == 1 {
                    write!(f, "range({}, {})", r.start, r.stop)
                } else {
                    write!(f, "range({}, {}, {})", r.start, r.stop, r.step)
                }
            }
            PyValue::Iter(_) => write!(f, "<iterator>"),
            PyValue::Builtin(b) => write!(f, "<built-in function {}>", b.name),
            PyValue::Method(m, _) => {
                write!(f, "<built-in method {} of list object>", m.name())
            }
        }
    }
}
