#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dtype::DType;

/// A concrete argument value at the call boundary.
///
/// Data tensors carry only their shape and dtype; shape-describing
/// arguments carry their integer contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArgValue {
    Tensor { shape: Vec<i64>, dtype: DType },
    List { values: Vec<i64> },
    IntTensor { values: Vec<i64> },
    #[serde(rename = "int_tensor_2d")]
    IntTensor2D { rows: Vec<Vec<i64>> },
    Int { value: i64 },
    Str { value: String },
    None,
}

impl ArgValue {
    pub fn tensor(shape: &[i64], dtype: DType) -> Self {
        ArgValue::Tensor {
            shape: shape.to_vec(),
            dtype,
        }
    }

    pub fn list(values: &[i64]) -> Self {
        ArgValue::List {
            values: values.to_vec(),
        }
    }

    pub fn int(value: i64) -> Self {
        ArgValue::Int { value }
    }

    pub fn str(value: &str) -> Self {
        ArgValue::Str {
            value: value.to_string(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ArgValue::Tensor { .. } => "tensor",
            ArgValue::List { .. } => "list",
            ArgValue::IntTensor { .. } => "integer tensor",
            ArgValue::IntTensor2D { .. } => "2D integer tensor",
            ArgValue::Int { .. } => "integer",
            ArgValue::Str { .. } => "string",
            ArgValue::None => "none",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int { value } => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str { value } => Some(value),
            _ => None,
        }
    }

    /// Integer contents of a 1D shape-bearing value.
    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            ArgValue::List { values } | ArgValue::IntTensor { values } => Some(values),
            _ => None,
        }
    }

    /// One-line rendering used in call summaries, e.g. `input.shape=[2, 3]`.
    pub fn summary(&self, name: &str) -> String {
        match self {
            ArgValue::Tensor { shape, .. } => format!("{name}.shape={}", join(shape)),
            ArgValue::IntTensor { values } => format!("{name}.numpy()={}", join(values)),
            ArgValue::IntTensor2D { rows } => {
                let inner: Vec<String> = rows.iter().map(|r| join(r)).collect();
                format!("{name}.numpy()=[{}]", inner.join(", "))
            }
            ArgValue::List { values } => format!("{name}={}", join(values)),
            ArgValue::Int { value } => format!("{name}={value}"),
            ArgValue::Str { value } => format!("{name}={value}"),
            ArgValue::None => format!("{name}=None"),
        }
    }
}

fn join(xs: &[i64]) -> String {
    let parts: Vec<String> = xs.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

fn compact(xs: &[i64]) -> String {
    let parts: Vec<String> = xs.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(","))
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Tensor { shape, dtype } => write!(f, "tensor:{dtype}:{}", compact(shape)),
            ArgValue::List { values } => write!(f, "{}", compact(values)),
            ArgValue::IntTensor { values } => write!(f, "itensor:{}", compact(values)),
            ArgValue::IntTensor2D { rows } => {
                let inner: Vec<String> = rows.iter().map(|r| compact(r)).collect();
                write!(f, "itensor2d:[{}]", inner.join(","))
            }
            ArgValue::Int { value } => write!(f, "{value}"),
            ArgValue::Str { value } => write!(f, "\"{value}\""),
            ArgValue::None => f.write_str("none"),
        }
    }
}

fn parse_list(text: &str) -> Result<Vec<i64>, String> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| format!("expected '[...]', got '{text}'"))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<i64>()
                .map_err(|_| format!("'{}' is not an integer", p.trim()))
        })
        .collect()
}

fn parse_rows(text: &str) -> Result<Vec<Vec<i64>>, String> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| format!("expected '[[...],...]', got '{text}'"))?;
    let mut rows = Vec::new();
    let mut rest = inner.trim();
    while !rest.is_empty() {
        let end = rest
            .find(']')
            .ok_or_else(|| format!("unterminated row in '{text}'"))?;
        rows.push(parse_list(&rest[..=end])?);
        rest = rest[end + 1..].trim_start().trim_start_matches(',').trim_start();
    }
    Ok(rows)
}

/// Parses the command-line value syntax:
/// `tensor:int32:[4,5,2]`, `itensor:[1,2]`, `itensor2d:[[1,2],[3,4]]`,
/// `[1,2,3]`, `7`, `"SAME"`, `none`. A bare word is read as a string.
impl FromStr for ArgValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("tensor:") {
            let (dtype, shape) = rest
                .split_once(':')
                .ok_or_else(|| format!("expected 'tensor:<dtype>:[...]', got '{s}'"))?;
            return Ok(ArgValue::Tensor {
                shape: parse_list(shape)?,
                dtype: dtype.parse()?,
            });
        }
        if let Some(rest) = s.strip_prefix("itensor2d:") {
            return Ok(ArgValue::IntTensor2D {
                rows: parse_rows(rest)?,
            });
        }
        if let Some(rest) = s.strip_prefix("itensor:") {
            return Ok(ArgValue::IntTensor {
                values: parse_list(rest)?,
            });
        }
        if s.starts_with('[') {
            return Ok(ArgValue::List {
                values: parse_list(s)?,
            });
        }
        if s.eq_ignore_ascii_case("none") {
            return Ok(ArgValue::None);
        }
        if let Ok(value) = s.parse::<i64>() {
            return Ok(ArgValue::Int { value });
        }
        let unquoted = s
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(s);
        Ok(ArgValue::str(unquoted))
    }
}

/// Bound argument name to value pairs of one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallArgs(BTreeMap<String, ArgValue>);

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: ArgValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: ArgValue) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the call in the order given by `params`, skipping absent ones.
    pub fn summary(&self, params: &[String]) -> String {
        params
            .iter()
            .filter_map(|p| self.get(p).map(|v| v.summary(p)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromIterator<(String, ArgValue)> for CallArgs {
    fn from_iter<I: IntoIterator<Item = (String, ArgValue)>>(iter: I) -> Self {
        CallArgs(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_line_values() {
        assert_eq!(
            "tensor:int32:[4,5,2]".parse::<ArgValue>(),
            Ok(ArgValue::tensor(&[4, 5, 2], DType::Int32))
        );
        assert_eq!("[1, 2,3]".parse::<ArgValue>(), Ok(ArgValue::list(&[1, 2, 3])));
        assert_eq!("[]".parse::<ArgValue>(), Ok(ArgValue::list(&[])));
        assert_eq!("7".parse::<ArgValue>(), Ok(ArgValue::int(7)));
        assert_eq!("\"SAME\"".parse::<ArgValue>(), Ok(ArgValue::str("SAME")));
        assert_eq!("NHWC".parse::<ArgValue>(), Ok(ArgValue::str("NHWC")));
        assert_eq!("none".parse::<ArgValue>(), Ok(ArgValue::None));
        assert_eq!(
            "itensor2d:[[1,2], [3,4]]".parse::<ArgValue>(),
            Ok(ArgValue::IntTensor2D {
                rows: vec![vec![1, 2], vec![3, 4]]
            })
        );
        assert!("tensor:int33:[1]".parse::<ArgValue>().is_err());
        assert!("[1,x]".parse::<ArgValue>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        let values = [
            ArgValue::tensor(&[2, 3], DType::Float32),
            ArgValue::IntTensor { values: vec![5] },
            ArgValue::IntTensor2D {
                rows: vec![vec![1], vec![2]],
            },
            ArgValue::str("VALID"),
            ArgValue::None,
        ];
        for v in values {
            assert_eq!(v.to_string().parse::<ArgValue>(), Ok(v));
        }
    }

    #[test]
    fn test_call_summary_follows_param_order() {
        let args = CallArgs::new()
            .with("params", ArgValue::tensor(&[4, 10], DType::Float32))
            .with("indices", ArgValue::tensor(&[4, 5, 2], DType::Int32))
            .with("batch_dims", ArgValue::int(1))
            .with("out", ArgValue::IntTensor { values: vec![3, 4] });
        let params: Vec<String> = ["indices", "params", "batch_dims", "out"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            args.summary(&params),
            "indices.shape=[4, 5, 2], params.shape=[4, 10], batch_dims=1, out.numpy()=[3, 4]"
        );
    }
}
