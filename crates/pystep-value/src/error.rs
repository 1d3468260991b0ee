//! Failures raised by value operations, named after the Python exception
//! each one would surface as.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("TypeError: {0}")]
    Type(String),

    #[error("TypeError: '{0}' object is not iterable")]
    NotIterable(&'static str),

    #[error("TypeError: '{0}' object is not callable")]
    NotCallable(&'static str),

    #[error("TypeError: {0}")]
    Arity(String),

    #[error("ZeroDivisionError: {0}")]
    ZeroDivision(&'static str),

    #[error("IndexError: {0}")]
    Index(&'static str),

    #[error("KeyError: {0}")]
    Key(String),

    #[error("AttributeError: '{0}' object has no attribute '{1}'")]
    Attribute(&'static str, String),

    #[error("ValueError: {0}")]
    Domain(String),
}
