#![allow(dead_code)]

use std::sync::Arc;

use opschema_core::{ArgValue, CallArgs, DType, Schema, SchemaBuilder, SchemaError};

/// `a[b, m, k] @ b[b, k, n] -> [b, m, n]` with up to two batch dims.
pub fn batch_matmul() -> Result<Schema, SchemaError> {
    let mut sb = SchemaBuilder::new("batch_matmul", &["a", "b", "name"]);
    sb.add_index("b", "batch", Some(0), Some(2))?;
    sb.add_index("m", "rows", Some(1), Some(1))?;
    sb.add_index("k", "contracted", Some(1), Some(1))?;
    sb.add_index("n", "columns", Some(1), Some(1))?;
    sb.arg_tensor("a", &["bmk"])?;
    sb.arg_tensor("b", &["bkn"])?;
    sb.arg_unchecked("name")?;
    sb.valid_dtypes("a", &["float"])?;
    sb.equate_dtypes("b", "a")?;
    sb.return_tensor(&["bmn"])?;
    sb.finish()
}

/// Shape function the batch_matmul schema describes.
pub fn batch_matmul_op(args: &CallArgs) -> Result<Vec<ArgValue>, String> {
    let (Some(ArgValue::Tensor { shape: a, dtype: da }), Some(ArgValue::Tensor { shape: b, dtype: db })) =
        (args.get("a"), args.get("b"))
    else {
        return Err("a and b must be tensors".to_string());
    };
    if da != db || !matches!(da, DType::Float16 | DType::Float32 | DType::Float64) {
        return Err("dtype mismatch".to_string());
    }
    let n = a.len();
    if n != b.len() || !(2..=4).contains(&n) {
        return Err("rank mismatch".to_string());
    }
    if a[..n - 2] != b[..n - 2] || a[n - 1] != b[n - 2] {
        return Err("dimension mismatch".to_string());
    }
    let mut out = a[..n - 1].to_vec();
    out.push(b[n - 1]);
    Ok(vec![ArgValue::tensor(&out, *da)])
}

/// 1D or 2D pooling with a computed output size.
pub fn pool() -> Result<Schema, SchemaError> {
    let mut sb = SchemaBuilder::new("pool", &["input", "window", "padding"]);
    sb.add_index("b", "batch", Some(1), Some(1))?;
    sb.add_index("i", "input spatial", Some(1), Some(2))?;
    sb.add_index("w", "window", None, None)?;
    sb.add_index("o", "output spatial", None, None)?;
    sb.add_index("c", "channel", Some(1), Some(1))?;
    sb.equate_ranks("w", "i")?;
    sb.equate_ranks("o", "i")?;
    sb.arg_tensor("input", &["bic"])?;
    sb.arg_shape_list("window", &["w"])?;
    sb.arg_option("padding", &["VALID", "SAME"])?;
    sb.computed_index(
        "o",
        Arc::new(|dims: &[&[i64]], extra: &[ArgValue]| -> Vec<i64> {
            let same = extra.first().and_then(ArgValue::as_str) == Some("SAME");
            dims[0]
                .iter()
                .zip(dims[1])
                .map(|(i, w)| if same { *i } else { i - w + 1 })
                .collect()
        }),
        Arc::new(|inputs: &[String], extra: &[String]| -> String {
            format!("pool({}, {}; {})", inputs[0], inputs[1], extra[0])
        }),
        "iw",
        1,
        &["padding"],
    )?;
    sb.valid_dtypes("input", &["float32"])?;
    sb.return_tensor(&["boc"])?;
    sb.finish()
}

/// A tensor whose float64 variant is unavailable at rank 2 of `i`.
pub fn excluded() -> Result<Schema, SchemaError> {
    let mut sb = SchemaBuilder::new("excluded", &["x"]);
    sb.add_index("b", "batch", Some(1), Some(1))?;
    sb.add_index("i", "spatial", Some(1), Some(2))?;
    sb.arg_tensor("x", &["bi"])?;
    sb.valid_dtypes("x", &["float32", "float64"])?;
    sb.exclude_dtypes("x, i", &[&[Some("float64"), Some("2")]])?;
    sb.return_tensor(&["bi"])?;
    sb.finish()
}

pub fn tensor(shape: &[i64], dtype: DType) -> ArgValue {
    ArgValue::tensor(shape, dtype)
}

/// Channel-first and channel-last formats for one or two spatial dims, while
/// `i` itself allows up to three.
pub fn formatted() -> Result<Schema, SchemaError> {
    let mut sb = SchemaBuilder::new("formatted", &["x", "fmt"]);
    sb.add_index("b", "batch", Some(1), Some(1))?;
    sb.add_index("c", "channel", Some(1), Some(1))?;
    sb.add_index("i", "spatial", Some(1), Some(3))?;
    sb.arg_layout(
        "fmt",
        &[("NCW", 0, Some(1)), ("NCHW", 0, Some(2)), ("NWC", 1, Some(1)), ("NHWC", 1, Some(2))],
        Some("i"),
    )?;
    sb.arg_tensor("x", &["bci", "bic"])?;
    sb.valid_dtypes("x", &["float32"])?;
    sb.return_tensor(&["bci", "bic"])?;
    sb.finish()
}

/// Spatial padding given as a 2D tensor with one row per spatial dim.
pub fn padded() -> Result<Schema, SchemaError> {
    let mut sb = SchemaBuilder::new("padded", &["x", "paddings"]);
    sb.add_index("b", "batch", Some(1), Some(1))?;
    sb.add_index("i", "spatial", Some(1), Some(2))?;
    sb.add_index("l", "leading pad", None, None)?;
    sb.add_index("r", "trailing pad", None, None)?;
    sb.equate_ranks("l", "i")?;
    sb.equate_ranks("r", "i")?;
    sb.arg_tensor("x", &["bi"])?;
    sb.arg_shape_tensor2d("paddings", &[&["l"], &["r"]])?;
    sb.valid_dtypes("x", &["float32"])?;
    sb.return_tensor(&["bi"])?;
    sb.finish()
}

/// Spatial dims drawn by a generator that reads the `size` option.
pub fn sized() -> Result<Schema, SchemaError> {
    let mut sb = SchemaBuilder::new("sized", &["x", "size"]);
    sb.add_index("b", "batch", Some(1), Some(1))?;
    sb.add_index("i", "spatial", Some(1), Some(2))?;
    sb.arg_tensor("x", &["bi"])?;
    sb.arg_option("size", &["small", "large"])?;
    sb.add_index_generator(
        "i",
        Arc::new(|ranks: &[u32], extra: &[ArgValue]| -> Vec<Vec<Vec<i64>>> {
            let d = match extra.first().and_then(ArgValue::as_str) {
                Some("large") => 9,
                _ => 2,
            };
            vec![vec![vec![d; ranks[0] as usize]]]
        }),
        "i",
        &["size"],
    )?;
    sb.valid_dtypes("x", &["float32"])?;
    sb.return_tensor(&["bi"])?;
    sb.finish()
}
