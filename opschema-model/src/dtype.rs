#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Element type of a data tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float16,
    Float32,
    Float64,
    Bfloat16,
    Qint8,
    Qint16,
    Qint32,
    Bool,
    Complex64,
    Complex128,
}

/// Families and their widths. `bool` is the only family without a width.
const FAMILIES: &[(&str, &[u32])] = &[
    ("int", &[8, 16, 32, 64]),
    ("uint", &[8, 16, 32, 64]),
    ("float", &[16, 32, 64]),
    ("qint", &[8, 16, 32]),
    ("bfloat", &[16]),
    ("bool", &[]),
    ("complex", &[64, 128]),
];

impl DType {
    pub const ALL: [DType; 18] = [
        DType::Int8,
        DType::Int16,
        DType::Int32,
        DType::Int64,
        DType::Uint8,
        DType::Uint16,
        DType::Uint32,
        DType::Uint64,
        DType::Float16,
        DType::Float32,
        DType::Float64,
        DType::Bfloat16,
        DType::Qint8,
        DType::Qint16,
        DType::Qint32,
        DType::Bool,
        DType::Complex64,
        DType::Complex128,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Uint8 => "uint8",
            DType::Uint16 => "uint16",
            DType::Uint32 => "uint32",
            DType::Uint64 => "uint64",
            DType::Float16 => "float16",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Bfloat16 => "bfloat16",
            DType::Qint8 => "qint8",
            DType::Qint16 => "qint16",
            DType::Qint32 => "qint32",
            DType::Bool => "bool",
            DType::Complex64 => "complex64",
            DType::Complex128 => "complex128",
        }
    }

    pub fn from_name(name: &str) -> Option<DType> {
        DType::ALL.iter().copied().find(|d| d.name() == name)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::Int8
                | DType::Int16
                | DType::Int32
                | DType::Int64
                | DType::Uint8
                | DType::Uint16
                | DType::Uint32
                | DType::Uint64
        )
    }

    /// Parses a dtype expression into the set of dtypes it denotes.
    ///
    /// `float` is every float width, `int32` is exactly int32, `int32+` is
    /// int32 and wider, `int32-` is int32 and narrower.
    pub fn parse_expr(expr: &str) -> Result<Vec<DType>, SchemaError> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let invalid = |reason: &str| SchemaError::InvalidDTypeExpr {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };
        let re = PATTERN
            .get_or_init(|| Regex::new(r"^([a-z]+)(8|16|32|64|128)?([+-])?$").ok())
            .as_ref()
            .ok_or_else(|| invalid("expression pattern unavailable"))?;

        let caps = re
            .captures(expr)
            .ok_or_else(|| invalid("does not match the expression pattern"))?;
        let family = &caps[1];
        let widths = FAMILIES
            .iter()
            .find(|(f, _)| *f == family)
            .map(|(_, w)| *w)
            .ok_or_else(|| {
                invalid("family must be one of int, uint, float, qint, bfloat, bool, complex")
            })?;
        let width = caps.get(2).map(|m| m.as_str().parse::<u32>());
        let range = caps.get(3).map(|m| m.as_str());

        let selected: Vec<u32> = match (width, range) {
            (None, Some(_)) => return Err(invalid("a '+' or '-' suffix requires a width")),
            (None, None) => {
                if widths.is_empty() {
                    return Ok(vec![DType::Bool]);
                }
                widths.to_vec()
            }
            (Some(w), range) => {
                let w = w.map_err(|_| invalid("width is not a number"))?;
                if !widths.contains(&w) {
                    return Err(invalid(&format!("'{family}' has no width {w}")));
                }
                match range {
                    None => vec![w],
                    Some("+") => widths.iter().copied().filter(|&x| x >= w).collect(),
                    Some(_) => widths.iter().copied().filter(|&x| x <= w).collect(),
                }
            }
        };

        selected
            .into_iter()
            .map(|w| {
                let name = format!("{family}{w}");
                DType::from_name(&name).ok_or_else(|| invalid(&format!("unknown dtype '{name}'")))
            })
            .collect()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::from_name(s).ok_or_else(|| format!("unknown dtype '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_alone_selects_every_width() {
        let floats = DType::parse_expr("float").unwrap();
        assert_eq!(floats, vec![DType::Float16, DType::Float32, DType::Float64]);
        assert!(!floats.contains(&DType::Int32));
    }

    #[test]
    fn test_plus_and_minus_ranges() {
        let wide = DType::parse_expr("int32+").unwrap();
        assert_eq!(wide, vec![DType::Int32, DType::Int64]);
        assert!(!wide.contains(&DType::Int8));
        assert!(!wide.contains(&DType::Int16));

        let narrow = DType::parse_expr("uint16-").unwrap();
        assert_eq!(narrow, vec![DType::Uint8, DType::Uint16]);
    }

    #[test]
    fn test_exact_width_and_bool() {
        assert_eq!(DType::parse_expr("bfloat16").unwrap(), vec![DType::Bfloat16]);
        assert_eq!(DType::parse_expr("bool").unwrap(), vec![DType::Bool]);
        assert_eq!(
            DType::parse_expr("complex").unwrap(),
            vec![DType::Complex64, DType::Complex128]
        );
    }

    #[test]
    fn test_invalid_expressions() {
        for bad in ["float+", "int12", "float8", "decimal", "Int32", "int32*", ""] {
            assert!(
                matches!(
                    DType::parse_expr(bad),
                    Err(SchemaError::InvalidDTypeExpr { .. })
                ),
                "expected '{bad}' to be rejected"
            );
        }
    }

    #[test]
    fn test_names_roundtrip() {
        for d in DType::ALL {
            assert_eq!(d.name().parse::<DType>(), Ok(d));
        }
    }
}
