#![forbid(unsafe_code)]

use std::sync::Arc;

use opschema_core::{ArgValue, CallArgs, DType, Schema, SchemaBuilder, SchemaError};

use super::tensor_arg;

/// Largest tensor rank the operation supports.
const MAX_RANK: usize = 7;

pub fn schema() -> Result<Schema, SchemaError> {
    let mut sb = SchemaBuilder::new("gather_nd", &["params", "indices", "batch_dims", "name"]);
    sb.add_index("b", "batch", None, None)?;
    sb.add_index("r", "read location", Some(1), None)?;
    sb.add_index("w", "write location", Some(1), None)?;
    sb.add_index("e", "slice element", None, None)?;
    sb.add_index("c", "read address component", Some(1), Some(1))?;
    sb.limit_ranks("bre", None, Some(MAX_RANK as u32))?;
    sb.limit_ranks("bwc", None, Some(MAX_RANK as u32))?;

    sb.arg_tensor("params", &["bre"])?;
    sb.arg_tensor("indices", &["bwc"])?;
    sb.arg_rank("batch_dims", "b")?;
    sb.arg_unchecked("name")?;

    // the last axis of indices addresses the read location
    sb.rank_dims_constraint(
        "rank of read location",
        Arc::new(|shape: &[i64]| shape.last().copied()),
        "r",
        "c",
        "indices",
    )?;

    sb.valid_dtypes("indices", &["int32", "int64"])?;
    sb.valid_dtypes("params", &["int32", "float32"])?;
    sb.return_tensor(&["bwe"])?;
    sb.finish()
}

/// Output shape `indices.shape[:-1] + params.shape[batch_dims + indices.shape[-1]:]`.
pub fn reference(args: &CallArgs) -> Result<Vec<ArgValue>, String> {
    let (params, params_dtype) = tensor_arg(args, "params")?;
    let (indices, indices_dtype) = tensor_arg(args, "indices")?;
    let batch_dims = match args.get("batch_dims") {
        Some(ArgValue::Int { value }) if *value >= 0 => *value as usize,
        _ => return Err("batch_dims must be a non-negative integer".to_string()),
    };
    if !matches!(indices_dtype, DType::Int32 | DType::Int64) {
        return Err(format!("indices must be int32 or int64, got {indices_dtype}"));
    }
    if !matches!(params_dtype, DType::Int32 | DType::Float32) {
        return Err(format!("unsupported params dtype {params_dtype}"));
    }
    if params.len() > MAX_RANK || indices.len() > MAX_RANK {
        return Err("rank too large".to_string());
    }
    if indices.len() < batch_dims + 2 {
        return Err("indices must have a write location and an address axis".to_string());
    }
    let Some(&depth) = indices.last() else {
        return Err("indices must not be a scalar".to_string());
    };
    if depth < 1 {
        return Err("the address axis must be at least 1".to_string());
    }
    let depth = depth as usize;
    if batch_dims + depth > params.len() {
        return Err(format!(
            "address depth {depth} exceeds the rank of params after {batch_dims} batch dims"
        ));
    }
    if params[..batch_dims] != indices[..batch_dims] {
        return Err("batch dimensions differ".to_string());
    }
    let mut out = indices[..indices.len() - 1].to_vec();
    out.extend_from_slice(&params[batch_dims + depth..]);
    Ok(vec![ArgValue::tensor(&out, params_dtype)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(indices: &[i64], params: &[i64], batch_dims: i64) -> CallArgs {
        CallArgs::new()
            .with("indices", ArgValue::tensor(indices, DType::Int32))
            .with("params", ArgValue::tensor(params, DType::Float32))
            .with("batch_dims", ArgValue::int(batch_dims))
    }

    #[test]
    fn test_reference_shape() {
        let out = reference(&call(&[4, 5, 2], &[4, 10, 10, 3], 1));
        assert_eq!(out, Ok(vec![ArgValue::tensor(&[4, 5, 3], DType::Float32)]));
    }

    #[test]
    fn test_reference_rejects_deep_address() {
        assert!(reference(&call(&[4, 5, 3], &[4, 10, 10], 1)).is_err());
    }
}
