//! Runtime values and the type tags shared by the compiler, the module
//! format and the VM.

pub mod ops;

use std::fmt;

use crate::error::ValueError;

/// A runtime value. The tag always matches the payload.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    List(Vec<Value>),
    Null,
}

/// Declared type of a variable or function return, as written in bytecode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int = 0,
    Float = 1,
    Bool = 2,
    Str = 3,
    List = 4,
    Null = 5,
    /// Accepts any value without conversion.
    Auto = 0xFF,
}

impl TypeTag {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TypeTag::Int),
            1 => Some(TypeTag::Float),
            2 => Some(TypeTag::Bool),
            3 => Some(TypeTag::Str),
            4 => Some(TypeTag::List),
            5 => Some(TypeTag::Null),
            0xFF => Some(TypeTag::Auto),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Bool => "bool",
            TypeTag::Str => "str",
            TypeTag::List => "list",
            TypeTag::Null => "null",
            TypeTag::Auto => "auto",
        }
    }

    /// Value given to `let T x;` when no initializer is written.
    pub fn default_value(self) -> Value {
        match self {
            TypeTag::Int => Value::Int(0),
            TypeTag::Float => Value::Float(0.0),
            TypeTag::Bool => Value::Bool(false),
            TypeTag::Str => Value::Str(String::new()),
            TypeTag::List => Value::List(Vec::new()),
            TypeTag::Null | TypeTag::Auto => Value::Null,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::Bool(_) => TypeTag::Bool,
            Value::Str(_) => TypeTag::Str,
            Value::List(_) => TypeTag::List,
            Value::Null => TypeTag::Null,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.tag().name()
    }

    /// Int, Float and Bool: the numeric tower.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    /// Float truncates toward zero.
    pub fn as_int(&self) -> Result<i64, ValueError> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(f) => Ok(f.trunc() as i64),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(other.conversion_error(TypeTag::Int)),
        }
    }

    pub fn as_float(&self) -> Result<f64, ValueError> {
        match self {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(f) => Ok(*f),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(other.conversion_error(TypeTag::Float)),
        }
    }

    /// Truthiness. Never fails: Str and List are true when non-empty, Null is false.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Null => false,
        }
    }

    pub fn as_str(&self) -> Result<&str, ValueError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(other.conversion_error(TypeTag::Str)),
        }
    }

    /// Convert a value for storage in a slot declared as `ty`.
    pub fn coerce_to(self, ty: TypeTag) -> Result<Value, ValueError> {
        match ty {
            TypeTag::Auto => Ok(self),
            TypeTag::Int => self.as_int().map(Value::Int),
            TypeTag::Float => self.as_float().map(Value::Float),
            TypeTag::Bool => Ok(Value::Bool(self.as_bool())),
            _ if self.tag() == ty => Ok(self),
            _ => Err(self.conversion_error(ty)),
        }
    }

    fn conversion_error(&self, to: TypeTag) -> ValueError {
        ValueError::Conversion {
            from: self.type_name(),
            to: to.name(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (a, b) if a.is_numeric() && b.is_numeric() => {
                matches!((a.as_float(), b.as_float()), (Ok(x), Ok(y)) if x == y)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) if n.is_finite() && n.fract() == 0.0 => write!(f, "{:.1}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, val) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", val)?;
                }
                write!(f, "]")
            }
            Value::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}
