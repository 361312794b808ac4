// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod logging;
pub mod restart;
pub mod sched;
pub mod selection;
pub mod types;

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use crate::cli::{Cli, Command, CommonArgs, RunArgs, StatusArgs};
use crate::config::{RunContext, load_metadata, load_resources};
use crate::engine::Controller;
use crate::engine::controller::RunReport;
use crate::restart::RestartSpec;
use crate::sched::SbatchBackend;

/// High-level entry point used by `main.rs`.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => run_pipeline(args),
        Command::Status(args) => run_status(args),
        Command::SelectCkpt(args) => {
            selection::run_select_ckpt(Path::new(&args.metrics), Path::new(&args.out))?;
            Ok(())
        }
    }
}

fn run_pipeline(args: RunArgs) -> Result<()> {
    let trios = load_metadata(&args.common.metadata, args.common.num_tests)?;
    let resources = load_resources(&args.common.resources)?;

    let ctx = RunContext {
        output_root: PathBuf::from(&args.common.output),
        starting_parent: args.common.parent,
        start_itr: args.start_itr,
        stop_itr: args.stop_itr,
        warm_start: args.warm_start.map(PathBuf::from),
        num_regions: args.num_regions,
        overwrite: args.overwrite,
        dry_run: args.dry_run,
    };

    let restart = args
        .restart_jobs
        .as_deref()
        .map(RestartSpec::parse)
        .transpose()?;

    let mut controller =
        Controller::new(&ctx, &resources, args.trainer, SbatchBackend::new());
    let report = controller.run(&trios, restart.as_ref())?;

    if !ctx.dry_run {
        print_report(&report);
        info!(submitted = report.total_submitted(), "invocation complete");
    }
    Ok(())
}

fn run_status(args: StatusArgs) -> Result<()> {
    let CommonArgs {
        metadata,
        resources,
        output,
        parent,
        num_tests,
    } = args.common;

    let trios = load_metadata(&metadata, num_tests)?;
    let resources = load_resources(&resources)?;

    let ctx = RunContext {
        output_root: PathBuf::from(&output),
        starting_parent: parent,
        start_itr: 1,
        stop_itr: 2,
        warm_start: None,
        num_regions: args.num_regions,
        overwrite: false,
        dry_run: false,
    };

    let mut controller =
        Controller::new(&ctx, &resources, "deeptrainer", SbatchBackend::new());
    let report = controller.status(&trios, args.poll)?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    for itr in &report.iterations {
        println!(
            "{run} itr {idx} ({parent}): {state}  submitted={sub} reused={reused}",
            run = itr.run_name,
            idx = itr.itr_index,
            parent = itr.parent,
            state = itr.state,
            sub = itr.submitted,
            reused = itr.reused,
        );
        for node in &itr.blocked {
            println!("    blocked: {node}");
        }
    }
}
