//! `skiff destroy`: Delete every recorded resource.

use clap::Args;
use skiff_common::config::DeployConfig;

use crate::commands::GlobalArgs;
use crate::output::{GREEN, RESET};

/// Arguments for the `destroy` command.
#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Confirm the teardown.
    #[arg(long)]
    pub yes: bool,
}

/// Executes the `destroy` command.
///
/// Works from recorded state alone, so a stack can be torn down even when
/// its inputs are no longer available.
///
/// # Errors
///
/// Returns an error if `--yes` is missing or the platform refuses a deletion.
pub fn execute(global: &GlobalArgs, args: DestroyArgs) -> anyhow::Result<()> {
    let config: DeployConfig = global.config()?;
    let engine = GlobalArgs::engine(&config);
    let recorded = engine.state()?.resources.len();
    if recorded == 0 {
        eprintln!("  Nothing to destroy.");
        return Ok(());
    }
    if !args.yes {
        anyhow::bail!("refusing to delete {recorded} resource(s) without --yes");
    }

    let cancel = engine.cancel_handle();
    ctrlc::set_handler(move || {
        cancel.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let report = engine.destroy()?;
    eprintln!("  {GREEN}Deleted {} resource(s).{RESET}", report.summary.delete);
    Ok(())
}
