#![forbid(unsafe_code)]

use opschema_core::{ArgValue, CallArgs, DType, Schema, SchemaBuilder, SchemaError};

use super::tensor_arg;
use crate::complib;

const CHANNEL_FIRST: [&str; 3] = ["NCW", "NCHW", "NCDHW"];
const CHANNEL_LAST: [&str; 3] = ["NWC", "NHWC", "NDHWC"];

pub fn schema() -> Result<Schema, SchemaError> {
    let mut sb = SchemaBuilder::new(
        "conv_transpose",
        &[
            "input",
            "filters",
            "output_shape",
            "strides",
            "padding",
            "data_format",
            "dilations",
            "name",
        ],
    );
    sb.add_index("b", "batch", Some(1), Some(1))?;
    sb.add_index("k", "input channel", Some(1), Some(1))?;
    sb.add_index("l", "output channel", Some(1), Some(1))?;
    sb.add_index("i", "input spatial", Some(1), Some(3))?;
    sb.add_index("f", "filter spatial", None, None)?;
    sb.add_index("g", "dilated filter spatial", None, None)?;
    sb.add_index("s", "strides", None, None)?;
    sb.add_index("d", "dilation", None, None)?;
    sb.add_index("o", "output spatial", None, None)?;
    for id in ["f", "g", "s", "d", "o"] {
        sb.equate_ranks(id, "i")?;
    }

    let formats: Vec<(&str, usize, Option<u32>)> = CHANNEL_FIRST
        .iter()
        .map(|f| (*f, 0))
        .chain(CHANNEL_LAST.iter().map(|f| (*f, 1)))
        .zip((1..=3).cycle())
        .map(|((name, layout), rank)| (name, layout, Some(rank)))
        .collect();
    sb.arg_layout("data_format", &formats, Some("i"))?;

    sb.arg_tensor("input", &["bki", "bik"])?;
    sb.arg_tensor("filters", &["flk"])?;
    sb.arg_shape_tensor("output_shape", &["blo", "bol"])?;
    sb.arg_shape_list("strides", &["s"])?;
    sb.arg_option("padding", &["VALID", "SAME"])?;
    sb.arg_shape_int("dilations", "d")?;
    sb.arg_unchecked("name")?;

    let (compute, template) = complib::dilate();
    sb.computed_index("g", compute, template, "fd", 1, &[])?;
    let (compute, template) = complib::conv_transpose();
    sb.computed_index("o", compute, template, "igs", 1, &["padding"])?;

    sb.valid_dtypes("input", &["float"])?;
    sb.equate_dtypes("filters", "input")?;
    // no 3D float64 kernel for channel-first input
    sb.exclude_dtypes("input, i, :layout", &[&[Some("float64"), Some("3"), Some("0")]])?;

    sb.return_tensor(&["blo", "bol"])?;
    sb.finish()
}

fn spatial_rank_format(format: &str) -> Option<(usize, bool)> {
    if let Some(p) = CHANNEL_FIRST.iter().position(|f| *f == format) {
        return Some((p + 1, true));
    }
    CHANNEL_LAST
        .iter()
        .position(|f| *f == format)
        .map(|p| (p + 1, false))
}

/// Checks a transposed convolution call and returns a tensor of the
/// requested output shape.
pub fn reference(args: &CallArgs) -> Result<Vec<ArgValue>, String> {
    let (input, dtype) = tensor_arg(args, "input")?;
    let (filters, filters_dtype) = tensor_arg(args, "filters")?;
    if !matches!(dtype, DType::Float16 | DType::Float32 | DType::Float64) {
        return Err(format!("input must be a float tensor, got {dtype}"));
    }
    if filters_dtype != dtype {
        return Err("input and filters must have the same dtype".to_string());
    }
    let Some(n) = input.len().checked_sub(2).filter(|n| (1..=3).contains(n)) else {
        return Err(format!("input must have rank 3 to 5, got {}", input.len()));
    };

    let channel_first = match args.get("data_format") {
        None | Some(ArgValue::None) => true,
        Some(ArgValue::Str { value }) => match spatial_rank_format(value) {
            Some((rank, first)) if rank == n => first,
            Some(_) => return Err(format!("{value} does not match an input of rank {}", input.len())),
            None => return Err(format!("unknown data_format {value}")),
        },
        Some(_) => return Err("data_format must be a string".to_string()),
    };
    if dtype == DType::Float64 && n == 3 && channel_first {
        return Err("3D float64 convolution requires channel-last data".to_string());
    }

    let (batch, in_channels, spatial) = if channel_first {
        (input[0], input[1], &input[2..])
    } else {
        (input[0], input[n + 1], &input[1..=n])
    };
    if filters.len() != n + 2 {
        return Err(format!("filters must have rank {}", n + 2));
    }
    if filters[n + 1] != in_channels {
        return Err("filters and input disagree on input channels".to_string());
    }
    let out_channels = filters[n];

    let strides = match args.get("strides") {
        Some(ArgValue::List { values }) => values.as_slice(),
        _ => return Err("strides must be a list".to_string()),
    };
    if strides.len() != n {
        return Err(format!("strides must have {n} elements"));
    }
    let dilation = match args.get("dilations") {
        Some(ArgValue::Int { value }) => *value,
        _ => return Err("dilations must be an integer".to_string()),
    };
    let valid = match args.get("padding").and_then(ArgValue::as_str) {
        Some("VALID") => true,
        Some("SAME") => false,
        _ => return Err("padding must be VALID or SAME".to_string()),
    };

    let mut expected = Vec::with_capacity(n);
    for k in 0..n {
        let dilated = (filters[k] - 1) * dilation + 1;
        if dilated < 1 {
            return Err("dilated filter is empty".to_string());
        }
        let out = if valid {
            (spatial[k] - 1) * strides[k] + dilated
        } else {
            spatial[k] * strides[k]
        };
        if out < 1 {
            return Err("output is empty".to_string());
        }
        expected.push(out);
    }

    let output_shape = match args.get("output_shape") {
        Some(ArgValue::IntTensor { values }) => values.as_slice(),
        _ => return Err("output_shape must be an integer tensor".to_string()),
    };
    let mut want = vec![batch];
    if channel_first {
        want.push(out_channels);
        want.extend(&expected);
    } else {
        want.extend(&expected);
        want.push(out_channels);
    }
    if output_shape != want.as_slice() {
        return Err(format!("output_shape {output_shape:?} is inconsistent with {want:?}"));
    }
    Ok(vec![ArgValue::tensor(output_shape, dtype)])
}
