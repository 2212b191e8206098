//! `skiff outputs`: Print the outputs of the last successful apply.

use clap::Args;

use crate::commands::GlobalArgs;

/// Arguments for the `outputs` command.
#[derive(Args, Debug)]
pub struct OutputsArgs {
    /// Print a single output by name, unquoted.
    pub name: Option<String>,
}

/// Executes the `outputs` command.
///
/// # Errors
///
/// Returns an error if the state file cannot be read or the named output
/// does not exist.
pub fn execute(global: &GlobalArgs, args: OutputsArgs) -> anyhow::Result<()> {
    let config = global.config()?;
    let outputs = GlobalArgs::engine(&config).outputs()?;

    match args.name {
        Some(name) => {
            let value = outputs
                .get(&name)
                .ok_or_else(|| anyhow::anyhow!("no output named {name:?}"))?;
            println!("{}", value.as_str().map_or_else(|| value.to_string(), str::to_string));
        }
        None => println!("{}", serde_json::to_string_pretty(&outputs)?),
    }
    Ok(())
}
