//! Interpreter values as seen by the persistence core.
//!
//! Scalars are carried inline. Everything with identity is an opaque host handle `H`; comparing
//! two handles compares identity, never contents.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value<H> {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
    Object(H),
}

impl<H> Value<H> {
    pub fn string(s: impl Into<Vec<u8>>) -> Self {
        Value::String(s.into())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_object(&self) -> Option<&H> {
        match self {
            Value::Object(h) => Some(h),
            _ => None,
        }
    }

    /// Kind of a scalar value, or `None` for heap objects whose kind only the host knows.
    pub fn scalar_kind(&self) -> Option<Kind> {
        match self {
            Value::Nil => Some(Kind::Nil),
            Value::Boolean(_) => Some(Kind::Boolean),
            Value::Integer(_) => Some(Kind::Integer),
            Value::Float(_) => Some(Kind::Float),
            Value::String(_) => Some(Kind::String),
            Value::Object(_) => None,
        }
    }
}

impl<H> Default for Value<H> {
    fn default() -> Self {
        Value::Nil
    }
}

impl<H> From<bool> for Value<H> {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl<H> From<i64> for Value<H> {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl<H> From<f64> for Value<H> {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl<H> From<&str> for Value<H> {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Nil,
    Boolean,
    Integer,
    Float,
    String,
    Table,
    Closure,
    /// Captured variable cell shared between closures.
    Upvalue,
    Userdata,
    /// Host object with no content encoding (native functions); persistable only when
    /// registered as permanent.
    Permanent,
    /// Host object that must never be persisted (files, sockets, ...).
    Unsupported(&'static str),
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Nil => "nil",
            Kind::Boolean => "boolean",
            Kind::Integer => "integer",
            Kind::Float => "float",
            Kind::String => "string",
            Kind::Table => "table",
            Kind::Closure => "closure",
            Kind::Upvalue => "upvalue",
            Kind::Userdata => "userdata",
            Kind::Permanent => "unregistered permanent",
            Kind::Unsupported(name) => name,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
