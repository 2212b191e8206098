//! `skiff up`: Create or update every resource of the stack.

use std::sync::atomic::Ordering;
use std::time::Instant;

use clap::Args;
use skiff_common::error::SkiffError;

use crate::commands::GlobalArgs;
use crate::output::{BOLD, CYAN, DIM, GREEN, RESET, YELLOW, summary_line};

/// Arguments for the `up` command.
#[derive(Args, Debug)]
pub struct UpArgs {
    /// Apply even if the plan is empty, to refresh recorded outputs.
    #[arg(long)]
    pub refresh: bool,
}

/// Executes the `up` command.
///
/// Ctrl+C stops the run before the next resource; everything created so
/// far stays recorded and the next `skiff up` continues from there.
///
/// # Errors
///
/// Returns an error if an input is missing, the platform rejects a
/// resource, or the run is interrupted.
pub fn execute(global: &GlobalArgs, args: UpArgs) -> anyhow::Result<()> {
    let start = Instant::now();
    let (engine, topology) = global.assemble()?;

    let plan = engine.plan(&topology)?;
    if plan.is_converged() && !args.refresh {
        eprintln!("  {}", summary_line(&plan.summary()));
        print_outputs(&engine.outputs()?);
        return Ok(());
    }
    eprintln!("  {}", summary_line(&plan.summary()));

    let cancel = engine.cancel_handle();
    ctrlc::set_handler(move || {
        cancel.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    match engine.converge(&topology) {
        Ok(report) => {
            eprintln!();
            eprintln!(
                "  {GREEN}{BOLD}Stack up to date{RESET} in {:.1}s",
                start.elapsed().as_secs_f64()
            );
            print_outputs(&report.outputs);
            Ok(())
        }
        Err(SkiffError::Cancelled { completed }) => {
            eprintln!();
            eprintln!("  {YELLOW}Interrupted{RESET} after {completed} step(s); state kept.");
            eprintln!("  {DIM}Run skiff up again to continue.{RESET}");
            Err(SkiffError::Cancelled { completed }.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_outputs(outputs: &std::collections::BTreeMap<String, serde_json::Value>) {
    if outputs.is_empty() {
        return;
    }
    eprintln!();
    for (name, value) in outputs {
        let value = value.as_str().map_or_else(|| value.to_string(), str::to_string);
        println!("  {CYAN}{name}{RESET} = {BOLD}{value}{RESET}");
    }
}
