//! `skiff plan`: Show what applying the stack would change.

use clap::Args;
use skiff_engine::plan::Plan;

use crate::commands::GlobalArgs;
use crate::output::{BOLD, DIM, RESET, changed_fields, marker, rule, summary_line};

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Print the plan as JSON instead of text.
    #[arg(long)]
    pub json: bool,

    /// Also list resources that will not change.
    #[arg(long)]
    pub all: bool,
}

/// Executes the `plan` command.
///
/// Resolves the inputs, assembles the topology and diffs it against the
/// recorded state. Never calls the provider.
///
/// # Errors
///
/// Returns an error if an input is missing, the topology is invalid, or the
/// state file cannot be read.
pub fn execute(global: &GlobalArgs, args: PlanArgs) -> anyhow::Result<()> {
    let (engine, topology) = global.assemble()?;
    let plan = engine.plan(&topology)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Plan for {BOLD}{}{RESET}:{}", topology.inputs.service_name(), topology.inputs.image_tag());
    println!("{}", rule(40));
    print_steps(&plan, args.all);
    print_waves(&plan);
    println!();
    println!("  {}", summary_line(&plan.summary()));
    Ok(())
}

fn print_steps(plan: &Plan, all: bool) {
    println!();
    for step in &plan.steps {
        if !all && !step.action.is_change() {
            continue;
        }
        let (mark, color) = marker(&step.action);
        println!(
            "  {color}{mark}{RESET} {BOLD}{}{RESET} {DIM}[{}]{RESET}{}",
            step.name,
            step.kind,
            changed_fields(&step.action)
        );
    }
}

fn print_waves(plan: &Plan) {
    println!();
    println!("  Waves:");
    for (i, wave) in plan.waves.iter().enumerate() {
        let names: Vec<&str> = wave.iter().map(|n| n.as_str()).collect();
        println!("    {DIM}{:>2}{RESET} {}", i + 1, names.join(", "));
    }
}
