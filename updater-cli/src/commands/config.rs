//! `swarm-updater config` — validate and print the effective settings.

use anyhow::{Context, Result};

use crate::settings::GlobalArgs;

pub fn run(global: &GlobalArgs) -> Result<()> {
    let (settings, _) = global.engine_config()?;
    let rendered = serde_yaml::to_string(&settings.effective()).context("failed to render settings")?;
    print!("{rendered}");
    Ok(())
}
