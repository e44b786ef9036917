use std::process::ExitCode;

use clap::Parser;
use error_stack::ResultExt;
use regrid_rs::{
    config::{prepare_run_directories, SmokeDustRegridConfig},
    context::{ProcessContext, SerialContext},
    describe::{describe, summary_table, DescribeParams},
    local_engine::LocalEngine,
    logging::init_logging,
    operations::{iter_operations, RegridOperation, RegridProcessor},
    settings::Environment,
};

mod cli;

fn main() -> ExitCode {
    let clargs = cli::Cli::parse();
    let ctx = SerialContext;

    if let Err(e) = setup_logging(&clargs, &ctx) {
        eprintln!("ERROR: could not set up logging:\n{e:?}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = main_inner(clargs, &ctx) {
        eprintln!("ERROR: {e:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// `-v`/`-q` take precedence over `REGRID_WRAPPER_LOG_LEVEL`. A per-rank log
/// file is added when the environment names a log directory.
fn setup_logging<C: ProcessContext>(clargs: &cli::Cli, ctx: &C) -> error_stack::Result<(), CliError> {
    let env = Environment::from_env().change_context(CliError::Setup)?;
    let log_file = env.create_log_file_path(ctx.rank());
    if let Some(dir) = log_file.as_deref().and_then(|p| p.parent()) {
        std::fs::create_dir_all(dir).change_context(CliError::Setup)?;
    }
    let cli_level = clargs
        .verbosity
        .is_present()
        .then(|| clargs.verbosity.log_level_filter());
    let level = env.resolve_level(cli_level).change_context(CliError::Setup)?;
    init_logging(level, ctx.rank(), log_file.as_deref()).change_context(CliError::Setup)
}

fn main_inner<C: ProcessContext>(clargs: cli::Cli, ctx: &C) -> error_stack::Result<(), CliError> {
    match clargs.command {
        cli::Commands::Prepare(args) => {
            let cfg = SmokeDustRegridConfig::from_toml_file(&args.config).change_context(CliError::ReadingConfig)?;
            prepare_run_directories(&cfg).change_context(CliError::Prepare)
        }
        cli::Commands::Run(args) => {
            let cfg = SmokeDustRegridConfig::from_toml_file(&args.config).change_context(CliError::ReadingConfig)?;
            run_driver(&cfg, ctx)
        }
        cli::Commands::Describe(args) => {
            let params = DescribeParams {
                namespace: args.namespace,
                files: args.files,
                varnames: args.varnames,
                csv_out: args.csv_out,
            };
            let rows = describe(&params).change_context(CliError::Describe)?;
            println!("{}", summary_table(&rows));
            Ok(())
        }
    }
}

fn run_driver<C: ProcessContext>(cfg: &SmokeDustRegridConfig, ctx: &C) -> error_stack::Result<(), CliError> {
    let engine = LocalEngine;
    for op in iter_operations(cfg, ctx, &engine) {
        let op = op.change_context(CliError::Operation)?;
        let name = op.name().to_string();
        RegridProcessor::new(op.as_ref())
            .execute()
            .change_context(CliError::Operation)
            .attach_printable_lazy(|| format!("in operation {name}"))?;
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Error setting up the program")]
    Setup,
    #[error("Error reading the run configuration")]
    ReadingConfig,
    #[error("Error preparing the run directories")]
    Prepare,
    #[error("A regrid operation failed")]
    Operation,
    #[error("Error describing the files")]
    Describe,
}
