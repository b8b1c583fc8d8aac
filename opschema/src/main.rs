#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{Diagnostic, IntoDiagnostic};
use thiserror::Error;
use tracing::info;

use opschema::{BundledOp, FileConfig};
use opschema_core::{ArgValue, CallArgs, tabulate, validate};

#[derive(Debug, Error, Diagnostic)]
enum CliError {
    #[error("unknown operation '{name}'")]
    #[diagnostic(code(opschema::cli), help("bundled operations: {known}"))]
    UnknownOp { name: String, known: String },

    #[error("invalid argument '{text}': {reason}")]
    #[diagnostic(
        code(opschema::cli),
        help("use name=value with values like tensor:int32:[4,5,2], itensor:[1,2], [1,2,3], 7 or SAME")
    )]
    BadArg { text: String, reason: String },

    #[error("call rejected with {class}")]
    #[diagnostic(code(opschema::cli))]
    Rejected { class: String },

    #[error("{disagreements} configurations disagree with the operation")]
    #[diagnostic(code(opschema::cli))]
    ValidationFailed { disagreements: usize },
}

#[derive(Parser, Debug)]
#[command(name = "opschema", version, about = "Check and generate calls of tensor operation schemas")]
struct Cli {
    /// TOML file with optional [gen] and [check] tables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Seed of the dims sampler. Overrides the config file.
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Dims samples per categorical combination. Overrides the config file.
    #[arg(long, global = true)]
    samples: Option<usize>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List the bundled operations.
    List,

    /// Print the index inventory of an operation.
    Indices { op: String },

    /// Print every categorical configuration an operation accepts.
    Configs { op: String },

    /// Print generated configurations.
    Generate {
        op: String,

        /// One JSON object per line.
        #[arg(long, default_value_t = false)]
        json: bool,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Check one call and print the diagnostic.
    Check {
        op: String,

        /// Argument binding, repeatable.
        #[arg(long = "arg", value_name = "NAME=VALUE")]
        args: Vec<String>,
    },

    /// Compare the schema with the bundled reference shape function.
    Validate {
        op: String,

        /// Print every disagreement.
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn find_op(name: &str) -> Result<&'static BundledOp, CliError> {
    opschema::find(name).ok_or_else(|| CliError::UnknownOp {
        name: name.to_string(),
        known: opschema::registry()
            .iter()
            .map(|op| op.name)
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn parse_call(bindings: &[String]) -> Result<CallArgs, CliError> {
    let mut args = CallArgs::new();
    for text in bindings {
        let bad = |reason: String| CliError::BadArg {
            text: text.clone(),
            reason,
        };
        let (name, value) = text
            .split_once('=')
            .ok_or_else(|| bad("expected name=value".to_string()))?;
        let value: ArgValue = value.parse().map_err(bad)?;
        args.insert(name.trim(), value);
    }
    Ok(args)
}

fn main() -> miette::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    if let Some(seed) = cli.seed {
        cfg.r#gen.seed = seed;
    }
    if let Some(samples) = cli.samples {
        cfg.r#gen.dims_samples = samples;
    }

    match cli.cmd {
        Cmd::List => {
            let rows: Vec<Vec<String>> = opschema::registry()
                .iter()
                .map(|op| vec![op.name.to_string(), op.summary.to_string()])
                .collect();
            for line in tabulate(&rows, "  ", &[]) {
                println!("{line}");
            }
            Ok(())
        }
        Cmd::Indices { op } => {
            let schema = (find_op(&op)?.build)()?;
            println!("{}", schema.index_inventory()?);
            Ok(())
        }
        Cmd::Configs { op } => {
            let schema = (find_op(&op)?.build)()?;
            println!("{}", schema.call_inventory(&cfg.r#gen)?);
            Ok(())
        }
        Cmd::Generate { op, json, limit } => {
            let schema = (find_op(&op)?.build)()?;
            let mut count = 0usize;
            for case in schema.generate(&cfg.r#gen).take(limit.unwrap_or(usize::MAX)) {
                let case = case?;
                if json {
                    println!("{}", serde_json::to_string(&case).into_diagnostic()?);
                } else {
                    println!("{}", case.args.summary(schema.params()));
                }
                count += 1;
            }
            info!(op = %op, count, "generated configurations");
            Ok(())
        }
        Cmd::Check { op, args } => {
            let schema = (find_op(&op)?.build)()?;
            let call = parse_call(&args)?;
            let outcome = schema.check_with(&call, &cfg.check)?;
            println!("{}", schema.explain(&outcome));
            if outcome.is_success() {
                Ok(())
            } else {
                Err(CliError::Rejected {
                    class: outcome.status.class().to_string(),
                }
                .into())
            }
        }
        Cmd::Validate { op, verbose } => {
            let bundled = find_op(&op)?;
            let schema = (bundled.build)()?;
            let report = validate(&schema, &bundled.reference, &cfg.r#gen, &cfg.check)?;
            println!("{report}");
            if verbose {
                for result in report.disagreements() {
                    println!();
                    println!("{}: {}", result.verdict, result.case.args.summary(schema.params()));
                    if let Some(err) = &result.op_error {
                        println!("operation: {err}");
                    }
                    if let Some(note) = &result.note {
                        println!("{note}");
                    }
                }
            }
            if report.is_clean() {
                Ok(())
            } else {
                Err(CliError::ValidationFailed {
                    disagreements: report.disagreements().count(),
                }
                .into())
            }
        }
    }
}
