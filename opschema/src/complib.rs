#![forbid(unsafe_code)]

//! Dimension arithmetic shared by the bundled schemas, each paired with the
//! template that renders its derivation.

use std::sync::Arc;

use opschema_core::{ArgValue, ComputeFn, TemplateFn};

/// Effective filter size: `(f - 1) * d + 1`. Inputs: filter, dilation.
pub fn dilate() -> (ComputeFn, TemplateFn) {
    let compute: ComputeFn = Arc::new(|dims: &[&[i64]], _: &[ArgValue]| -> Vec<i64> {
        dims[0]
            .iter()
            .zip(dims[1].iter().cycle())
            .map(|(f, d)| f.saturating_sub(1).saturating_mul(*d).saturating_add(1))
            .collect()
    });
    let template: TemplateFn = Arc::new(|inputs: &[String], _: &[String]| -> String {
        format!("({} - 1) * {} + 1", inputs[0], inputs[1])
    });
    (compute, template)
}

/// Spatial output size of a transposed convolution. Inputs: input,
/// dilated filter, stride. Extra argument: padding.
///
/// VALID gives `(i - 1) * s + g`, SAME gives `i * s`.
pub fn conv_transpose() -> (ComputeFn, TemplateFn) {
    let compute: ComputeFn = Arc::new(|dims: &[&[i64]], extra: &[ArgValue]| -> Vec<i64> {
        let valid = extra.first().and_then(ArgValue::as_str) == Some("VALID");
        dims[0]
            .iter()
            .zip(dims[1])
            .zip(dims[2])
            .map(|((i, g), s)| {
                if valid {
                    i.saturating_sub(1).saturating_mul(*s).saturating_add(*g)
                } else {
                    i.saturating_mul(*s)
                }
            })
            .collect()
    });
    let template: TemplateFn = Arc::new(|inputs: &[String], extra: &[String]| -> String {
        let (i, g, s) = (&inputs[0], &inputs[1], &inputs[2]);
        match extra.first().map(String::as_str) {
            Some("VALID") => format!("({i} - 1) * {s} + {g}"),
            Some("SAME") => format!("{i} * {s}"),
            Some(padding) => {
                format!("({i} - 1) * {s} + {g} if {padding} is VALID, {i} * {s} if {padding} is SAME")
            }
            None => format!("({i} - 1) * {s} + {g}"),
        }
    });
    (compute, template)
}
