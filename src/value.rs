use std::fmt::Display;

use crate::{object::Object, typ::Typ};

/// A Java value as seen outside of a frame: by natives, fields, arrays and the host
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Ref(Option<Object>),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

/// IEEE-754 single precision rounding of a double, used for float value-set conversion
pub fn fround(value: f64) -> f32 {
    value as f32
}

impl Value {
    pub fn null() -> Self {
        Value::Ref(None)
    }

    /// Zero value a field or array element of this type starts out with
    pub fn default_for(typ: &Typ) -> Self {
        match typ {
            Typ::Long => Value::Long(0),
            Typ::Float => Value::Float(0.0),
            Typ::Double => Value::Double(0.0),
            Typ::Ref(_) => Value::Ref(None),
            _ => Value::Int(0),
        }
    }

    pub fn slots(&self) -> usize {
        match self {
            Value::Long(_) | Value::Double(_) => 2,
            _ => 1,
        }
    }

    /// Converts a value to the representation of `typ`: ints narrowed to
    /// boolean/byte/char/short are truncated, floats and doubles pass through value-set conversion.
    /// Returns None if the value can't represent the type at all.
    pub fn convert_to(self, typ: &Typ) -> Option<Self> {
        Some(match (typ, self) {
            (Typ::Boolean, Value::Int(v)) => Value::Int(v & 1),
            (Typ::Byte, Value::Int(v)) => Value::Int(v as i8 as i32),
            (Typ::Char, Value::Int(v)) => Value::Int(v as u16 as i32),
            (Typ::Short, Value::Int(v)) => Value::Int(v as i16 as i32),
            (Typ::Int, Value::Int(v)) => Value::Int(v),
            (Typ::Long, Value::Long(v)) => Value::Long(v),
            (Typ::Float, Value::Float(v)) => Value::Float(v),
            (Typ::Float, Value::Double(v)) => Value::Float(fround(v)),
            (Typ::Double, Value::Double(v)) => Value::Double(v),
            (Typ::Double, Value::Float(v)) => Value::Double(v as f64),
            (Typ::Ref(_), Value::Ref(v)) => Value::Ref(v),
            _ => return None,
        })
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// The reference, or None if this is null or not a reference
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Ref(v) => v.as_ref(),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ref(None) => write!(f, "null"),
            Self::Ref(Some(obj)) => write!(f, "{:?}", obj),
            Self::Int(v) => write!(f, "{}", v),
            Self::Long(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
        }
    }
}

impl From<Option<Object>> for Value {
    fn from(val: Option<Object>) -> Self {
        Self::Ref(val)
    }
}

impl From<Object> for Value {
    fn from(val: Object) -> Self {
        Self::Ref(Some(val))
    }
}

impl From<i32> for Value {
    fn from(val: i32) -> Self {
        Self::Int(val)
    }
}

impl From<bool> for Value {
    fn from(val: bool) -> Self {
        Self::Int(val as i32)
    }
}

impl From<i64> for Value {
    fn from(val: i64) -> Self {
        Self::Long(val)
    }
}

impl From<f32> for Value {
    fn from(val: f32) -> Self {
        Self::Float(val)
    }
}

impl From<f64> for Value {
    fn from(val: f64) -> Self {
        Self::Double(val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowing_truncates() {
        assert_eq!(Value::Int(128).convert_to(&Typ::Byte), Some(Value::Int(-128)));
        assert_eq!(Value::Int(32768).convert_to(&Typ::Short), Some(Value::Int(-32768)));
        assert_eq!(Value::Int(0x11111).convert_to(&Typ::Char), Some(Value::Int(0x1111)));
        assert_eq!(Value::Int(2).convert_to(&Typ::Boolean), Some(Value::Int(0)));
        assert_eq!(Value::Int(-1).convert_to(&Typ::Char), Some(Value::Int(0xffff)));
    }

    #[test]
    fn float_value_set_conversion() {
        assert_eq!(Value::Double(1.3).convert_to(&Typ::Float), Some(Value::Float(1.3f32)));
        assert_eq!(fround(1.3), 1.3f32);
        assert_eq!(Value::Long(1).convert_to(&Typ::Int), None);
    }
}
