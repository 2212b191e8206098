//! `skiff graph`: Print the resource dependency graph.

use clap::Args;

use crate::commands::GlobalArgs;

/// Arguments for the `graph` command.
#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Emit Graphviz DOT instead of an indented list.
    #[arg(long)]
    pub dot: bool,
}

/// Executes the `graph` command.
///
/// # Errors
///
/// Returns an error if an input is missing or the topology is invalid.
pub fn execute(global: &GlobalArgs, args: GraphArgs) -> anyhow::Result<()> {
    let (_engine, topology) = global.assemble()?;
    let graph = topology.graph()?;
    let order = graph.resolve_order()?;

    if args.dot {
        println!("digraph skiff {{");
        for name in &order {
            println!("  \"{name}\";");
            for dep in graph.dependencies_of(name) {
                println!("  \"{dep}\" -> \"{name}\";");
            }
        }
        println!("}}");
        return Ok(());
    }

    for name in &order {
        let deps: Vec<String> = graph
            .dependencies_of(name)
            .iter()
            .map(ToString::to_string)
            .collect();
        if deps.is_empty() {
            println!("{name}");
        } else {
            println!("{name} <- {}", deps.join(", "));
        }
    }
    Ok(())
}
