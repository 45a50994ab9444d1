use std::path::Path;

use anyhow::{Context, Result};
use essdist_core::DistributionConfig;
use tracing::info;

pub fn handle(out: Option<&Path>) -> Result<()> {
    let config = DistributionConfig::default();
    match out {
        Some(path) => {
            config
                .save_to(path)
                .with_context(|| format!("writing default configuration to {}", path.display()))?;
            info!("Wrote default configuration to {}", path.display());
        }
        None => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}
