use miette::Result;
use opschema_core::{ArgValue, CallArgs, DType, Failure, Phase, SchemaError};

mod common;
use common::{batch_matmul, excluded, formatted, pool, tensor};

fn matmul_args(a: &[i64], b: &[i64]) -> CallArgs {
    CallArgs::new()
        .with("a", tensor(a, DType::Float32))
        .with("b", tensor(b, DType::Float32))
}

#[test]
fn success_predicts_return_shape() -> Result<()> {
    let schema = batch_matmul()?;
    let outcome = schema.check(&matmul_args(&[2, 3, 4], &[2, 4, 5]))?;
    assert!(outcome.is_success(), "{}", schema.explain(&outcome));
    assert_eq!(outcome.phase(), Phase::Success);
    assert_eq!(outcome.ranks.get(&'b'), Some(&1));
    assert_eq!(outcome.dims.get(&'k'), Some(&vec![4]));
    assert_eq!(outcome.predicted, vec![vec![2, 3, 5]]);
    assert!(schema.explain(&outcome).starts_with("Success: "));
    Ok(())
}

#[test]
fn inconsistent_ranks_report_near_misses() -> Result<()> {
    let schema = batch_matmul()?;
    let outcome = schema.check(&matmul_args(&[2, 3], &[2, 4, 5]))?;
    let Some(Failure::RankInference {
        candidates,
        ambiguous,
    }) = outcome.failure()
    else {
        panic!("expected a rank failure, got {:?}", outcome.status);
    };
    assert!(!ambiguous);
    // batch rank 0 explains `a`, batch rank 1 explains `b`
    assert_eq!(candidates.len(), 2);
    assert!(candidates.iter().all(|c| !c.suggestions.is_empty()));
    assert_eq!(outcome.status.class(), "RankInferenceFailure");
    let text = schema.explain(&outcome);
    assert!(text.contains("Candidate 1 of 2"), "{text}");
    assert!(text.contains("  => "), "{text}");
    Ok(())
}

#[test]
fn disagreeing_sizes_are_index_usage_failures() -> Result<()> {
    let schema = batch_matmul()?;
    let outcome = schema.check(&matmul_args(&[2, 3, 4], &[2, 5, 5]))?;
    let Some(Failure::IndexUsage { usage }) = outcome.failure() else {
        panic!("expected an index usage failure, got {:?}", outcome.status);
    };
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].index, 'k');
    let text = schema.explain(&outcome);
    assert!(
        text.contains("Index 'k' (contracted) has size 4 in 'a' and size 5 in 'b'."),
        "{text}"
    );
    Ok(())
}

#[test]
fn equated_dtype_mismatch_names_the_source() -> Result<()> {
    let schema = batch_matmul()?;
    let args = CallArgs::new()
        .with("a", tensor(&[3, 4], DType::Float32))
        .with("b", tensor(&[4, 5], DType::Float16));
    let outcome = schema.check(&args)?;
    let Some(failure) = outcome.failure() else {
        panic!("float16 b must be rejected");
    };
    assert_eq!(
        failure.to_string(),
        "tensor 'b' has dtype float16, but must match 'a' which has dtype float32"
    );
    assert_eq!(outcome.reached, Phase::DimsResolved);
    Ok(())
}

#[test]
fn disallowed_dtype_lists_the_allowed_set() -> Result<()> {
    let schema = batch_matmul()?;
    let args = CallArgs::new()
        .with("a", tensor(&[3, 4], DType::Int32))
        .with("b", tensor(&[4, 5], DType::Int32));
    let outcome = schema.check(&args)?;
    assert_eq!(outcome.status.class(), "DTypeNotAllowedFailure");
    assert!(schema.explain(&outcome).contains("Valid dtypes for 'a': float16, float32, float64"));
    Ok(())
}

#[test]
fn missing_and_mistyped_arguments() -> Result<()> {
    let schema = batch_matmul()?;
    let missing = CallArgs::new().with("a", tensor(&[3, 4], DType::Float32));
    let outcome = schema.check(&missing)?;
    assert!(matches!(outcome.failure(), Some(Failure::ArgType { arg, .. }) if arg == "b"));

    let mistyped = matmul_args(&[3, 4], &[4, 5]).with("a", ArgValue::int(3));
    let outcome = schema.check(&mistyped)?;
    assert_eq!(outcome.status.class(), "ArgTypeFailure");
    Ok(())
}

#[test]
fn computed_dims_below_minimum() -> Result<()> {
    let schema = pool()?;
    let args = CallArgs::new()
        .with("input", tensor(&[1, 3, 2], DType::Float32))
        .with("window", ArgValue::list(&[5]))
        .with("padding", ArgValue::str("VALID"));
    let outcome = schema.check(&args)?;
    assert_eq!(
        outcome.failure(),
        Some(&Failure::ComputedBelowMinimum {
            index: 'o',
            dims: vec![-1],
            min: 1,
        })
    );
    let text = schema.explain(&outcome);
    assert!(text.contains("o = pool(input spatial, window; padding)"), "{text}");
    assert!(text.contains("o = pool([3], [5]; VALID)"), "{text}");

    let same = args.with("padding", ArgValue::str("SAME"));
    let outcome = schema.check(&same)?;
    assert!(outcome.is_success(), "{}", schema.explain(&outcome));
    assert_eq!(outcome.predicted, vec![vec![1, 3, 2]]);
    Ok(())
}

#[test]
fn option_outside_the_set() -> Result<()> {
    let schema = pool()?;
    let args = CallArgs::new()
        .with("input", tensor(&[1, 3, 2], DType::Float32))
        .with("window", ArgValue::list(&[2]))
        .with("padding", ArgValue::str("FULL"));
    let outcome = schema.check(&args)?;
    let failure = outcome.failure().map(ToString::to_string);
    assert_eq!(
        failure.as_deref(),
        Some("argument 'padding' = 'FULL' is not one of VALID, SAME")
    );
    Ok(())
}

#[test]
fn exclusions_apply_after_valid_dtypes() -> Result<()> {
    let schema = excluded()?;
    let rank2 = CallArgs::new().with("x", tensor(&[2, 3, 4], DType::Float64));
    let outcome = schema.check(&rank2)?;
    assert_eq!(outcome.status.class(), "DTypeExcludedCombinationFailure");
    let text = schema.explain(&outcome);
    assert!(text.contains("Received unavailable configuration:"), "{text}");
    assert!(text.contains("'spatial' # dims"), "{text}");

    let rank1 = CallArgs::new().with("x", tensor(&[2, 3], DType::Float64));
    assert!(schema.check(&rank1)?.is_success());

    let float32 = CallArgs::new().with("x", tensor(&[2, 3, 4], DType::Float32));
    assert!(schema.check(&float32)?.is_success());
    Ok(())
}

#[test]
fn returned_shapes_are_compared_with_predictions() -> Result<()> {
    let schema = batch_matmul()?;
    let outcome = schema.check(&matmul_args(&[2, 3, 4], &[2, 4, 5]))?;

    let right = [tensor(&[2, 3, 5], DType::Float32)];
    assert_eq!(schema.check_return(&outcome, &right), Ok(()));

    let wrong = [tensor(&[2, 3, 6], DType::Float32)];
    assert!(matches!(
        schema.check_return(&outcome, &wrong),
        Err(SchemaError::OutputShapeMismatch { index: 0, .. })
    ));
    assert!(matches!(
        schema.check_return(&outcome, &[]),
        Err(SchemaError::ReturnCount {
            got: 0,
            expected: 1
        })
    ));
    Ok(())
}

#[test]
fn omitted_layout_needs_a_format_for_the_rank() -> Result<()> {
    let schema = formatted()?;
    let deep = CallArgs::new().with("x", tensor(&[2, 3, 4, 4, 4], DType::Float32));
    let outcome = schema.check(&deep)?;
    assert_eq!(
        outcome.failure(),
        Some(&Failure::NoDataFormat {
            arg: "fmt".to_string(),
            index: 'i',
            rank: 3,
            layout: 0,
            formats: vec!["NCW".to_string(), "NCHW".to_string()],
        }),
        "{}",
        schema.explain(&outcome)
    );
    assert_eq!(outcome.status.class(), "DataFormatRankFailure");
    let text = schema.explain(&outcome);
    assert!(
        text.contains("Index 'i' (spatial) has rank 3; the default layout offers NCW and NCHW."),
        "{text}"
    );

    let explicit = deep.clone().with("fmt", ArgValue::str("NCHW"));
    assert_eq!(schema.check(&explicit)?.status.class(), "RankInferenceFailure");

    let planar = CallArgs::new().with("x", tensor(&[2, 3, 4, 4], DType::Float32));
    let outcome = schema.check(&planar)?;
    assert!(outcome.is_success(), "{}", schema.explain(&outcome));
    assert_eq!(outcome.data_format.as_deref(), Some("NCHW"));
    Ok(())
}

#[test]
fn checking_a_call_twice_resolves_the_same_configuration() -> Result<()> {
    let schema = formatted()?;
    let call = CallArgs::new()
        .with("x", tensor(&[2, 5, 5, 3], DType::Float32))
        .with("fmt", ArgValue::str("NHWC"));
    let first = schema.check(&call)?;
    assert!(first.is_success(), "{}", schema.explain(&first));
    assert_eq!(first, schema.check(&call)?);

    let schema = batch_matmul()?;
    let call = matmul_args(&[2, 3, 4], &[2, 4, 5]);
    assert_eq!(schema.check(&call)?, schema.check(&call)?);
    Ok(())
}

#[test]
fn negative_dimensions_are_rejected() -> Result<()> {
    let schema = batch_matmul()?;
    let outcome = schema.check(&matmul_args(&[2, -3, 4], &[2, 4, 5]))?;
    let failure = outcome.failure().map(ToString::to_string);
    assert_eq!(
        failure.as_deref(),
        Some("argument 'a' expected a tensor of non-negative dimensions, got dimension -3")
    );
    assert_eq!(outcome.status.class(), "ArgTypeFailure");

    let schema = pool()?;
    let args = CallArgs::new()
        .with("input", tensor(&[1, 3, 2], DType::Float32))
        .with("window", ArgValue::list(&[-2]))
        .with("padding", ArgValue::str("VALID"));
    assert_eq!(schema.check(&args)?.status.class(), "ArgTypeFailure");
    Ok(())
}
