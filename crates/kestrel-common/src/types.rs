//! Attribute types and scan operators for Kestrel indexes.

use serde::{Deserialize, Serialize};

/// Type of the attribute over which an index is built.
///
/// Stored in the index meta page. Only `Int` is supported by the B+ tree
/// core; the other variants exist for meta-page validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum AttrType {
    /// 4-byte signed integer.
    Int = 0,
    /// 8-byte IEEE-754 double.
    Double = 1,
    /// Fixed-width character string.
    String = 2,
}

impl AttrType {
    /// Decodes an attribute type from its on-disk representation.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(AttrType::Int),
            1 => Some(AttrType::Double),
            2 => Some(AttrType::String),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AttrType::Int => "INT",
            AttrType::Double => "DOUBLE",
            AttrType::String => "STRING",
        };
        write!(f, "{}", name)
    }
}

/// Comparison operator for a range-scan bound.
///
/// The low bound accepts `Gt`/`Gte`, the high bound accepts `Lt`/`Lte`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanOp {
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Greater than or equal.
    Gte,
    /// Greater than.
    Gt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_type_repr() {
        assert_eq!(AttrType::Int as u32, 0);
        assert_eq!(AttrType::Double as u32, 1);
        assert_eq!(AttrType::String as u32, 2);
    }

    #[test]
    fn test_attr_type_from_u32() {
        assert_eq!(AttrType::from_u32(0), Some(AttrType::Int));
        assert_eq!(AttrType::from_u32(1), Some(AttrType::Double));
        assert_eq!(AttrType::from_u32(2), Some(AttrType::String));
        assert_eq!(AttrType::from_u32(3), None);
    }

    #[test]
    fn test_attr_type_display() {
        assert_eq!(AttrType::Int.to_string(), "INT");
        assert_eq!(AttrType::Double.to_string(), "DOUBLE");
        assert_eq!(AttrType::String.to_string(), "STRING");
    }

    #[test]
    fn test_attr_type_roundtrip() {
        for ty in [AttrType::Int, AttrType::Double, AttrType::String] {
            assert_eq!(AttrType::from_u32(ty as u32), Some(ty));
        }
    }

    #[test]
    fn test_scan_op_serde_roundtrip() {
        for op in [ScanOp::Lt, ScanOp::Lte, ScanOp::Gte, ScanOp::Gt] {
            let serialized = serde_json::to_string(&op).unwrap();
            let deserialized: ScanOp = serde_json::from_str(&serialized).unwrap();
            assert_eq!(op, deserialized);
        }
    }
}
