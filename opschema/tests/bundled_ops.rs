use std::collections::BTreeSet;

use miette::Result;
use opschema::ops::{conv_transpose, gather_nd};
use opschema_core::{
    ArgValue, CallArgs, CheckConfig, DType, Failure, GenCase, GenConfig, Schema, validate,
};
use proptest::{
    prelude::prop,
    test_runner::{Config, TestCaseError, TestRunner},
};

fn gather_call(indices: &[i64], params: &[i64], batch_dims: i64) -> CallArgs {
    CallArgs::new()
        .with("indices", ArgValue::tensor(indices, DType::Int32))
        .with("params", ArgValue::tensor(params, DType::Float32))
        .with("batch_dims", ArgValue::int(batch_dims))
}

fn generate_all(schema: &Schema, cfg: &GenConfig) -> Result<Vec<GenCase>> {
    Ok(schema.generate(cfg).collect::<Result<Vec<_>, _>>()?)
}

#[test]
fn gather_nd_resolves_ranks_from_the_address_axis() -> Result<()> {
    let schema = gather_nd::schema()?;
    let outcome = schema.check(&gather_call(&[4, 5, 2], &[4, 10, 10, 3], 1))?;
    assert!(outcome.is_success(), "{}", schema.explain(&outcome));
    let ranks: Vec<(char, u32)> = outcome.ranks.iter().map(|(c, r)| (*c, *r)).collect();
    assert_eq!(
        ranks,
        vec![('b', 1), ('c', 1), ('e', 1), ('r', 2), ('w', 1)]
    );
    assert_eq!(outcome.predicted, vec![vec![4, 5, 3]]);
    Ok(())
}

#[test]
fn gather_nd_rejects_an_address_deeper_than_params() -> Result<()> {
    let schema = gather_nd::schema()?;
    let outcome = schema.check(&gather_call(&[4, 5, 3], &[4, 10, 10], 1))?;
    assert!(
        matches!(
            outcome.failure(),
            Some(Failure::RankInference {
                ambiguous: false,
                ..
            })
        ),
        "{}",
        schema.explain(&outcome)
    );
    Ok(())
}

#[test]
fn gather_nd_reports_batch_disagreement() -> Result<()> {
    let schema = gather_nd::schema()?;
    let outcome = schema.check(&gather_call(&[4, 5, 2], &[5, 10, 10, 3], 1))?;
    let text = schema.explain(&outcome);
    assert_eq!(outcome.status.class(), "IndexUsageFailure", "{text}");
    assert!(
        text.contains("Index 'b' (batch) has size 4 in 'indices' and size 5 in 'params'."),
        "{text}"
    );
    Ok(())
}

#[test]
fn conv_transpose_covers_every_categorical_combination() -> Result<()> {
    let schema = conv_transpose::schema()?;
    let cases = generate_all(&schema, &GenConfig::default())?;
    let combos: BTreeSet<(String, DType, String)> = cases
        .iter()
        .map(|c| {
            let padding = c
                .args
                .get("padding")
                .and_then(ArgValue::as_str)
                .unwrap_or_default()
                .to_string();
            (
                c.data_format.clone().unwrap_or_default(),
                c.dtypes["input"],
                padding,
            )
        })
        .collect();
    // 6 formats x 3 float widths x 2 paddings, less the excluded NCDHW float64 pair
    assert_eq!(combos.len(), 34);
    assert!(!combos.iter().any(|(f, d, _)| f == "NCDHW" && *d == DType::Float64));
    assert!(combos.iter().any(|(f, d, _)| f == "NDHWC" && *d == DType::Float64));
    Ok(())
}

#[test]
fn conv_transpose_exclusion_is_reported() -> Result<()> {
    let schema = conv_transpose::schema()?;
    let call = CallArgs::new()
        .with("input", ArgValue::tensor(&[1, 2, 4, 4, 4], DType::Float64))
        .with("filters", ArgValue::tensor(&[3, 3, 3, 5, 2], DType::Float64))
        .with("output_shape", ArgValue::IntTensor { values: vec![1, 5, 6, 6, 6] })
        .with("strides", ArgValue::list(&[1, 1, 1]))
        .with("padding", ArgValue::str("VALID"))
        .with("data_format", ArgValue::str("NCDHW"))
        .with("dilations", ArgValue::int(1));
    let outcome = schema.check(&call)?;
    assert_eq!(outcome.status.class(), "DTypeExcludedCombinationFailure");

    let channel_last = call
        .with("input", ArgValue::tensor(&[1, 4, 4, 4, 2], DType::Float64))
        .with("output_shape", ArgValue::IntTensor { values: vec![1, 6, 6, 6, 5] })
        .with("data_format", ArgValue::str("NDHWC"));
    let outcome = schema.check(&channel_last)?;
    assert!(outcome.is_success(), "{}", schema.explain(&outcome));
    assert_eq!(outcome.predicted, vec![vec![1, 6, 6, 6, 5]]);
    Ok(())
}

#[test]
fn conv_transpose_output_shape_must_match_the_arithmetic() -> Result<()> {
    let schema = conv_transpose::schema()?;
    let call = CallArgs::new()
        .with("input", ArgValue::tensor(&[2, 3, 8], DType::Float32))
        .with("filters", ArgValue::tensor(&[3, 4, 3], DType::Float32))
        .with("output_shape", ArgValue::IntTensor { values: vec![2, 4, 18] })
        .with("strides", ArgValue::list(&[2]))
        .with("padding", ArgValue::str("VALID"))
        .with("dilations", ArgValue::int(1));
    let outcome = schema.check(&call)?;
    // (8 - 1) * 2 + 3
    assert_eq!(
        outcome.failure(),
        Some(&Failure::ComputedMismatch {
            index: 'o',
            computed: vec![17],
            observed: vec![18],
        }),
        "{}",
        schema.explain(&outcome)
    );
    Ok(())
}

#[test]
fn conv_transpose_huge_strides_are_a_mismatch_not_an_overflow() -> Result<()> {
    let schema = conv_transpose::schema()?;
    let call = CallArgs::new()
        .with("input", ArgValue::tensor(&[2, 3, 8], DType::Float32))
        .with("filters", ArgValue::tensor(&[3, 4, 3], DType::Float32))
        .with("output_shape", ArgValue::IntTensor { values: vec![2, 4, 18] })
        .with("strides", ArgValue::list(&[i64::MAX / 2]))
        .with("padding", ArgValue::str("VALID"))
        .with("dilations", ArgValue::int(1));
    let outcome = schema.check(&call)?;
    assert_eq!(
        outcome.failure(),
        Some(&Failure::ComputedMismatch {
            index: 'o',
            computed: vec![i64::MAX],
            observed: vec![18],
        }),
        "{}",
        schema.explain(&outcome)
    );

    let same = call.with("padding", ArgValue::str("SAME"));
    assert_eq!(
        schema.check(&same)?.status.class(),
        "ComputedDimensionMismatchFailure"
    );
    Ok(())
}

#[test]
fn repeated_checks_resolve_identically() -> Result<()> {
    let schema = gather_nd::schema()?;
    let call = gather_call(&[4, 5, 2], &[4, 10, 10, 3], 1);
    let first = schema.check(&call)?;
    let second = schema.check(&call)?;
    assert!(first.is_success());
    assert_eq!(first.ranks, second.ranks);
    assert_eq!(first.dims, second.dims);
    assert_eq!(first.dtypes, second.dtypes);
    assert_eq!(first.predicted, second.predicted);

    let schema = conv_transpose::schema()?;
    let call = CallArgs::new()
        .with("input", ArgValue::tensor(&[1, 4, 4, 2], DType::Float32))
        .with("filters", ArgValue::tensor(&[3, 3, 5, 2], DType::Float32))
        .with("output_shape", ArgValue::IntTensor { values: vec![1, 6, 6, 5] })
        .with("strides", ArgValue::list(&[1, 1]))
        .with("padding", ArgValue::str("VALID"))
        .with("data_format", ArgValue::str("NHWC"))
        .with("dilations", ArgValue::int(1));
    let first = schema.check(&call)?;
    assert!(first.is_success(), "{}", schema.explain(&first));
    assert_eq!(first.data_format.as_deref(), Some("NHWC"));
    assert_eq!(first, schema.check(&call)?);
    Ok(())
}

#[test]
fn bundled_schemas_agree_with_their_reference_functions() -> Result<()> {
    let gen_cfg = GenConfig::default();
    for op in opschema::registry() {
        let schema = (op.build)()?;
        let report = validate(&schema, &op.reference, &gen_cfg, &CheckConfig::default())?;
        assert!(report.is_clean(), "{report}");
    }
    Ok(())
}

#[test]
fn generated_cases_check_successfully() -> Result<()> {
    let cfg = GenConfig {
        seed: 11,
        dims_samples: 2,
        ..GenConfig::default()
    };
    for op in opschema::registry() {
        let schema = (op.build)()?;
        for case in generate_all(&schema, &cfg)? {
            let outcome = schema.check(&case.args)?;
            assert!(outcome.is_success(), "{}", schema.explain(&outcome));
            assert_eq!(outcome.predicted, case.returns);
        }
    }
    Ok(())
}

#[test]
fn gather_nd_random_shapes_match_the_reference() {
    let schema = match gather_nd::schema() {
        Ok(s) => s,
        Err(e) => panic!("schema: {e}"),
    };
    let strategy = (
        prop::collection::vec(1i64..5, 1..5),
        prop::collection::vec(1i64..5, 0..6),
        0i64..3,
    );
    let mut runner = TestRunner::new(Config {
        cases: 256,
        ..Config::default()
    });
    let result = runner.run(&strategy, |(indices, params, batch_dims)| {
        let args = gather_call(&indices, &params, batch_dims);
        let outcome = schema
            .check(&args)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let reference = gather_nd::reference(&args);
        if outcome.is_success() != reference.is_ok() {
            return Err(TestCaseError::fail(format!(
                "indices={indices:?} params={params:?} batch_dims={batch_dims}: schema says {}, operation says {reference:?}",
                outcome.status.class()
            )));
        }
        if let Ok(values) = reference {
            schema
                .check_return(&outcome, &values)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
        }
        Ok(())
    });
    if let Err(e) = result {
        panic!("{e}");
    }
}
