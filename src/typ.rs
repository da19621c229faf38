use std::sync::Arc;

use crate::error::FatalError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Typ {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    /// Classes are represented unresolved so we can talk about classes without
    /// having all classes resolved already (which wouldn't work as the graph can be cyclic).
    /// Holds the internal class name, e.g. `java/lang/String` or `[I`.
    Ref(Arc<str>),
}

impl Typ {
    /// Parses a complete field descriptor such as `I` or `[Ljava/lang/Object;`
    pub fn parse(descriptor: &str) -> Result<Self, FatalError> {
        let (typ, end) = Self::parse_at(descriptor, 0)?;
        if end != descriptor.len() {
            return Err(FatalError::BadDescriptor(descriptor.into()));
        }
        Ok(typ)
    }

    /// Parses one field descriptor starting at byte `start`, returning the type and the index after it
    pub(crate) fn parse_at(descriptor: &str, start: usize) -> Result<(Self, usize), FatalError> {
        let bad = || FatalError::BadDescriptor(descriptor.into());
        let bytes = descriptor.as_bytes();
        let typ = match bytes.get(start).ok_or_else(bad)? {
            b'Z' => Typ::Boolean,
            b'B' => Typ::Byte,
            b'S' => Typ::Short,
            b'C' => Typ::Char,
            b'I' => Typ::Int,
            b'J' => Typ::Long,
            b'F' => Typ::Float,
            b'D' => Typ::Double,
            b'L' => {
                let end = descriptor[start..].find(';').ok_or_else(bad)? + start;
                if end == start + 1 {
                    return Err(bad());
                }
                return Ok((Typ::Ref(descriptor[start + 1..end].into()), end + 1));
            }
            b'[' => {
                let mut end = start;
                while bytes.get(end) == Some(&b'[') {
                    end += 1;
                }
                if end - start > 255 {
                    return Err(bad());
                }
                let (_, end) = Self::parse_at(descriptor, end)?;
                return Ok((Typ::Ref(descriptor[start..end].into()), end));
            }
            _ => return Err(bad()),
        };
        Ok((typ, start + 1))
    }

    /// Number of local variable / operand stack slots a value of this type occupies
    pub fn slots(&self) -> usize {
        match self {
            Typ::Long | Typ::Double => 2,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Typ::Ref(_))
    }

    /// The field descriptor for this type
    pub fn descriptor(&self) -> String {
        match self {
            Typ::Boolean => "Z".into(),
            Typ::Byte => "B".into(),
            Typ::Short => "S".into(),
            Typ::Char => "C".into(),
            Typ::Int => "I".into(),
            Typ::Long => "J".into(),
            Typ::Float => "F".into(),
            Typ::Double => "D".into(),
            Typ::Ref(name) if name.starts_with('[') => name.to_string(),
            Typ::Ref(name) => format!("L{name};"),
        }
    }

    /// Element type of arrays created by `newarray`
    pub fn from_atype(atype: u8) -> Option<Self> {
        use crate::instructions::atype::*;
        Some(match atype {
            BOOLEAN => Typ::Boolean,
            CHAR => Typ::Char,
            FLOAT => Typ::Float,
            DOUBLE => Typ::Double,
            BYTE => Typ::Byte,
            SHORT => Typ::Short,
            INT => Typ::Int,
            LONG => Typ::Long,
            _ => return None,
        })
    }

    pub fn array_dimensions(&self) -> usize {
        match self {
            Self::Ref(name) => name.find(|c| c != '[').unwrap_or(0),
            _ => 0,
        }
    }
}

impl std::fmt::Display for Typ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Typ::Boolean => write!(f, "boolean"),
            Typ::Byte => write!(f, "byte"),
            Typ::Short => write!(f, "short"),
            Typ::Char => write!(f, "char"),
            Typ::Int => write!(f, "int"),
            Typ::Long => write!(f, "long"),
            Typ::Float => write!(f, "float"),
            Typ::Double => write!(f, "double"),
            Typ::Ref(name) => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_field_descriptors() {
        assert_eq!(Typ::parse("I").unwrap(), Typ::Int);
        assert_eq!(
            Typ::parse("Ljava/lang/String;").unwrap(),
            Typ::Ref("java/lang/String".into())
        );
        assert_eq!(
            Typ::parse("[[Ljava/lang/Object;").unwrap(),
            Typ::Ref("[[Ljava/lang/Object;".into())
        );
        assert_eq!(Typ::parse("[J").unwrap().array_dimensions(), 1);
    }

    #[test]
    fn rejects_malformed_descriptors() {
        assert!(Typ::parse("").is_err());
        assert!(Typ::parse("L;").is_err());
        assert!(Typ::parse("Ljava/lang/String").is_err());
        assert!(Typ::parse("II").is_err());
        assert!(Typ::parse("[").is_err());
        assert!(Typ::parse("V").is_err());
    }

    #[test]
    fn descriptor_is_inverse_of_parse() {
        for descriptor in ["Z", "C", "D", "[I", "Ljava/lang/Object;", "[[Lfoo/Bar;"] {
            assert_eq!(Typ::parse(descriptor).unwrap().descriptor(), descriptor);
        }
    }
}
