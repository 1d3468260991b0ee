//! Native builtin functions and the scope they are installed in.

use indexmap::IndexMap;

use crate::error::ValueError;
use crate::value::{as_num, Builtin, Num, PyValue, RangeValue};

/// The stock builtin scope: every function a default run can reach through
/// `LOAD_NAME` fallback.
pub fn registry() -> IndexMap<String, PyValue> {
    let mut scope = IndexMap::new();
    let mut install = |name: &'static str, invoke: fn(&[PyValue]) -> Result<PyValue, ValueError>| {
        scope.insert(name.to_owned(), PyValue::Builtin(Builtin { name, invoke }));
    };
    install("range", builtin_range);
    install("len", builtin_len);
    install("abs", builtin_abs);
    install("min", builtin_min);
    install("max", builtin_max);
    install("sum", builtin_sum);
    install("list", builtin_list);
    install("reversed", builtin_reversed);
    scope
}

fn arity(name: &str, args: &[PyValue], min: usize, max: usize) -> Result<(), ValueError> {
    if args.len() < min || args.len() > max {
        return Err(ValueError::Arity(format!(
            "{name}() takes {min} to {max} arguments ({} given)",
            args.len()
        )));
    }
    Ok(())
}

fn want_int(name: &str, value: &PyValue) -> Result<i64, ValueError> {
    match as_num(value) {
        Some(Num::Int(n)) => Ok(n),
        _ => Err(ValueError::Type(format!(
            "{name}() argument must be an integer, not '{}'",
            value.type_name()
        ))),
    }
}

fn want_iterable(name: &str, value: &PyValue) -> Result<Vec<PyValue>, ValueError> {
    value.elements().ok_or_else(|| {
        ValueError::Type(format!(
            "{name}() argument must be iterable, not '{}'",
            value.type_name()
        ))
    })
}

fn builtin_range(args: &[PyValue]) -> Result<PyValue, ValueError> {
    arity("range", args, 1, 3)?;
    let (start, stop, step) = match args {
        [stop] => (0, want_int("range", stop)?, 1),
        [start, stop] => (want_int("range", start)?, want_int("range", stop)?, 1),
        [start, stop, step] => (
            want_int("range", start)?,
            want_int("range", stop)?,
            want_int("range", step)?,
        ),
        _ => unreachable!(),
    };
    if step == 0 {
        return Err(ValueError::Domain("range() arg 3 must not be zero".to_owned()));
    }
    Ok(PyValue::Range(RangeValue { start, stop, step }))
}

fn builtin_len(args: &[PyValue]) -> Result<PyValue, ValueError> {
    arity("len", args, 1, 1)?;
    let len = match &args[0] {
        PyValue::Str(s) => s.chars().count() as i64,
        PyValue::Tuple(items) => items.len() as i64,
        PyValue::List(items) | PyValue::Set(items) => items.borrow().len() as i64,
        PyValue::Dict(entries) => entries.borrow().len() as i64,
        PyValue::Range(r) => r.len(),
        other => {
            return Err(ValueError::Type(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(PyValue::Int(len))
}

fn builtin_abs(args: &[PyValue]) -> Result<PyValue, ValueError> {
    arity("abs", args, 1, 1)?;
    match as_num(&args[0]) {
        Some(Num::Int(n)) => Ok(PyValue::Int(n.wrapping_abs())),
        Some(Num::Float(x)) => Ok(PyValue::Float(x.abs())),
        None => Err(ValueError::Type(format!(
            "bad operand type for abs(): '{}'",
            args[0].type_name()
        ))),
    }
}

/// Shared body of `min` and `max`: one iterable argument or two-plus
/// scalars, ordered by `<`.
fn extremum(
    name: &str,
    args: &[PyValue],
    keep_left: fn(std::cmp::Ordering) -> bool,
) -> Result<PyValue, ValueError> {
    let candidates = match args {
        [] => {
            return Err(ValueError::Arity(format!(
                "{name}() expected 1 arguments, got 0"
            )))
        }
        [only] => {
            let items = want_iterable(name, only)?;
            if items.is_empty() {
                return Err(ValueError::Domain(format!("{name}() arg is an empty sequence")));
            }
            items
        }
        many => many.to_vec(),
    };
    let mut best = candidates[0].clone();
    for candidate in &candidates[1..] {
        let (a, b) = match (as_num(&best), as_num(candidate)) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(ValueError::Type(format!(
                    "'{name}' not supported between these operand types"
                )))
            }
        };
        let ordering = match (a, b) {
            (Num::Int(a), Num::Int(b)) => a.cmp(&b),
            (Num::Int(a), Num::Float(b)) => (a as f64).total_cmp(&b),
            (Num::Float(a), Num::Int(b)) => a.total_cmp(&(b as f64)),
            (Num::Float(a), Num::Float(b)) => a.total_cmp(&b),
        };
        if !keep_left(ordering) {
            best = candidate.clone();
        }
    }
    Ok(best)
}

fn builtin_min(args: &[PyValue]) -> Result<PyValue, ValueError> {
    extremum("min", args, |ord| ord != std::cmp::Ordering::Greater)
}

fn builtin_max(args: &[PyValue]) -> Result<PyValue, ValueError> {
    extremum("max", args, |ord| ord != std::cmp::Ordering::Less)
}

fn builtin_sum(args: &[PyValue]) -> Result<PyValue, ValueError> {
    arity("sum", args, 1, 2)?;
    let items = want_iterable("sum", &args[0])?;
    let mut acc = match args.get(1) {
        None => Num::Int(0),
        Some(start) => as_num(start).ok_or_else(|| {
            ValueError::Type(format!(
                "sum() start must be a number, not '{}'",
                start.type_name()
            ))
        })?,
    };
    for item in &items {
        let n = as_num(item).ok_or_else(|| {
            ValueError::Type(format!(
                "unsupported operand type(s) for +: '{}'",
                item.type_name()
            ))
        })?;
        acc = match (acc, n) {
            (Num::Int(a), Num::Int(b)) => match a.checked_add(b) {
                Some(total) => Num::Int(total),
                None => Num::Float(a as f64 + b as f64),
            },
            (Num::Int(a), Num::Float(b)) | (Num::Float(b), Num::Int(a)) => {
                Num::Float(a as f64 + b)
            }
            (Num::Float(a), Num::Float(b)) => Num::Float(a + b),
        };
    }
    Ok(match acc {
        Num::Int(n) => PyValue::Int(n),
        Num::Float(x) => PyValue::Float(x),
    })
}

fn builtin_list(args: &[PyValue]) -> Result<PyValue, ValueError> {
    arity("list", args, 0, 1)?;
    match args {
        [] => Ok(PyValue::list(Vec::new())),
        [source] => Ok(PyValue::list(want_iterable("list", source)?)),
        _ => unreachable!(),
    }
}

fn builtin_reversed(args: &[PyValue]) -> Result<PyValue, ValueError> {
    arity("reversed", args, 1, 1)?;
    let mut items = want_iterable("reversed", &args[0])?;
    items.reverse();
    Ok(PyValue::list(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_arities() {
        assert_eq!(
            builtin_range(&[PyValue::Int(5)]).unwrap(),
            PyValue::Range(RangeValue { start: 0, stop: 5, step: 1 })
        );
        assert_eq!(
            builtin_range(&[PyValue::Int(2), PyValue::Int(8), PyValue::Int(3)]).unwrap(),
            PyValue::Range(RangeValue { start: 2, stop: 8, step: 3 })
        );
        assert!(matches!(
            builtin_range(&[PyValue::Int(0), PyValue::Int(5), PyValue::Int(0)]),
            Err(ValueError::Domain(_))
        ));
        assert!(matches!(builtin_range(&[]), Err(ValueError::Arity(_))));
    }

    #[test]
    fn test_len() {
        assert_eq!(builtin_len(&[PyValue::str("abc")]).unwrap(), PyValue::Int(3));
        assert_eq!(
            builtin_len(&[PyValue::Range(RangeValue { start: 0, stop: 10, step: 3 })]).unwrap(),
            PyValue::Int(4)
        );
        assert!(matches!(
            builtin_len(&[PyValue::Int(3)]),
            Err(ValueError::Type(_))
        ));
    }

    #[test]
    fn test_min_max_over_iterable_and_scalars() {
        let list = PyValue::list(vec![PyValue::Int(4), PyValue::Int(1), PyValue::Int(3)]);
        assert_eq!(builtin_min(&[list.clone()]).unwrap(), PyValue::Int(1));
        assert_eq!(builtin_max(&[list]).unwrap(), PyValue::Int(4));
        assert_eq!(
            builtin_max(&[PyValue::Int(2), PyValue::Float(2.5)]).unwrap(),
            PyValue::Float(2.5)
        );
        assert!(matches!(
            builtin_min(&[PyValue::list(Vec::new())]),
            Err(ValueError::Domain(_))
        ));
    }

    #[test]
    fn test_sum() {
        let r = PyValue::Range(RangeValue { start: 1, stop: 5, step: 1 });
        assert_eq!(builtin_sum(&[r]).unwrap(), PyValue::Int(10));
        let floats = PyValue::list(vec![PyValue::Float(0.5), PyValue::Int(1)]);
        assert_eq!(
            builtin_sum(&[floats, PyValue::Int(1)]).unwrap(),
            PyValue::Float(2.5)
        );
    }

    #[test]
    fn test_list_materializes_range() {
        let r = PyValue::Range(RangeValue { start: 0, stop: 3, step: 1 });
        assert_eq!(
            builtin_list(&[r]).unwrap(),
            PyValue::list(vec![PyValue::Int(0), PyValue::Int(1), PyValue::Int(2)])
        );
    }

    #[test]
    fn test_reversed() {
        let list = PyValue::list(vec![PyValue::Int(1), PyValue::Int(2), PyValue::Int(3)]);
        assert_eq!(
            builtin_reversed(&[list]).unwrap(),
            PyValue::list(vec![PyValue::Int(3), PyValue::Int(2), PyValue::Int(1)])
        );
    }

    #[test]
    fn test_registry_contents() {
        let scope = registry();
        for name in ["range", "len", "abs", "min", "max", "sum", "list", "reversed"] {
            assert!(scope.contains_key(name), "missing builtin {name}");
        }
    }
}
