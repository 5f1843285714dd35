use std::fmt;

/// Closed set of semantic kinds a Host reference classifies into.
///
/// The discriminants are a stable numeric contract shared with Host code and
/// exported to scripts as `<NAME>_ID` constants; `-1` stands for null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum JavaKind {
    Boolean = 0,
    Int = 1,
    Long = 2,
    Object = 3,
    String = 4,
    Void = 5,
    Double = 6,
    Short = 7,
    Float = 8,
    Array = 9,
    Char = 10,
    Byte = 11,
    Class = 12,
}

impl JavaKind {
    pub const NULL_ID: i32 = -1;

    pub const ALL: [JavaKind; 13] = [
        JavaKind::Boolean,
        JavaKind::Int,
        JavaKind::Long,
        JavaKind::Object,
        JavaKind::String,
        JavaKind::Void,
        JavaKind::Double,
        JavaKind::Short,
        JavaKind::Float,
        JavaKind::Array,
        JavaKind::Char,
        JavaKind::Byte,
        JavaKind::Class,
    ];

    pub fn id(self) -> i32 {
        self as i32
    }

    /// `Ok(None)` for the null id, `Err(id)` for anything outside the set.
    pub fn from_id(id: i32) -> Result<Option<JavaKind>, i32> {
        if id == Self::NULL_ID {
            return Ok(None);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.id() == id)
            .map(Some)
            .ok_or(id)
    }

    pub fn name(self) -> &'static str {
        match self {
            JavaKind::Boolean => "BOOLEAN",
            JavaKind::Int => "INT",
            JavaKind::Long => "LONG",
            JavaKind::Object => "OBJECT",
            JavaKind::String => "STRING",
            JavaKind::Void => "VOID",
            JavaKind::Double => "DOUBLE",
            JavaKind::Short => "SHORT",
            JavaKind::Float => "FLOAT",
            JavaKind::Array => "ARRAY",
            JavaKind::Char => "CHAR",
            JavaKind::Byte => "BYTE",
            JavaKind::Class => "CLASS",
        }
    }

    /// Lower-case primitive spelling used in coercion messages.
    pub fn primitive_name(self) -> Option<&'static str> {
        match self {
            JavaKind::Boolean => Some("boolean"),
            JavaKind::Int => Some("int"),
            JavaKind::Long => Some("long"),
            JavaKind::Double => Some("double"),
            JavaKind::Short => Some("short"),
            JavaKind::Float => Some("float"),
            JavaKind::Char => Some("char"),
            JavaKind::Byte => Some("byte"),
            _ => None,
        }
    }

    pub fn is_reference(self) -> bool {
        matches!(
            self,
            JavaKind::Object | JavaKind::String | JavaKind::Array | JavaKind::Class
        )
    }
}

impl fmt::Display for JavaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable() {
        assert_eq!(JavaKind::Boolean.id(), 0);
        assert_eq!(JavaKind::Object.id(), 3);
        assert_eq!(JavaKind::Array.id(), 9);
        assert_eq!(JavaKind::Class.id(), 12);
    }

    #[test]
    fn from_id_distinguishes_null_and_unknown() {
        assert_eq!(JavaKind::from_id(-1), Ok(None));
        assert_eq!(JavaKind::from_id(4), Ok(Some(JavaKind::String)));
        assert_eq!(JavaKind::from_id(42), Err(42));
    }

    #[test]
    fn reference_kinds_exclude_primitives() {
        assert!(JavaKind::String.is_reference());
        assert!(JavaKind::Array.is_reference());
        assert!(!JavaKind::Int.is_reference());
        assert!(!JavaKind::Void.is_reference());
    }
}
