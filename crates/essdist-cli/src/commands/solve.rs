use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use essdist_algo::DistributionSolver;
use essdist_cli::cli::OutputFormat;
use essdist_core::{Allocation, DistributionConfig, SolveRequest};
use tabwriter::TabWriter;
use tracing::{info, warn};

pub fn handle(
    request_path: &Path,
    config_path: Option<&Path>,
    format: OutputFormat,
    out: Option<&Path>,
) -> Result<()> {
    let contents = fs::read_to_string(request_path)
        .with_context(|| format!("reading request {}", request_path.display()))?;
    let request: SolveRequest = serde_json::from_str(&contents)
        .with_context(|| format!("parsing request {}", request_path.display()))?;

    let config = match config_path {
        Some(path) => DistributionConfig::load_from(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => DistributionConfig::default(),
    };

    info!(
        "Distributing {} W over {} units ({}, weighting {})",
        request.setpoint_w,
        request.len(),
        request.direction,
        if request.weighting_enabled { "on" } else { "off" }
    );
    let allocation = DistributionSolver::new(config)
        .solve(&request)
        .context("distribution request rejected")?;
    info!(
        "Solved via {} path: total {} W, tracking error {:.3e} W",
        allocation.method,
        allocation.total_w(),
        allocation.tracking_error_w(request.setpoint_w)
    );
    for issue in &allocation.diagnostics.issues {
        warn!("{}", issue);
    }

    if let Some(path) = out {
        let json = serde_json::to_string_pretty(&allocation)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote allocation to {}", path.display());
        return Ok(());
    }

    match format {
        OutputFormat::Json => print_json(&allocation),
        OutputFormat::Table => print_table(&request, &allocation),
    }
}

fn print_json(allocation: &Allocation) -> Result<()> {
    serde_json::to_writer_pretty(io::stdout(), allocation)
        .map_err(|err| anyhow::anyhow!("serializing allocation to JSON: {err}"))?;
    println!();
    Ok(())
}

fn print_table(request: &SolveRequest, allocation: &Allocation) -> Result<()> {
    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "UNIT\tLOWER_W\tUPPER_W\tSOC_PCT\tSETPOINT_W")?;
    for (index, (unit, value)) in request
        .units
        .iter()
        .zip(&allocation.setpoints_w)
        .enumerate()
    {
        writeln!(
            writer,
            "{}\t{:.3}\t{:.3}\t{:.1}\t{:.3}",
            index, unit.lower_w, unit.upper_w, unit.soc_pct, value
        )?;
    }
    writer.flush()?;

    println!(
        "method: {}  cluster: {:?}  mode: {:?}  total: {:.3} W  requested: {:.3} W",
        allocation.method,
        allocation.cluster_kind,
        allocation.operation_mode,
        allocation.total_w(),
        request.setpoint_w
    );
    println!(
        "iterations: {}  evaluations: {}  converged: {}  {}",
        allocation.iterations,
        allocation.evaluations,
        allocation.converged,
        allocation.diagnostics.summary()
    );
    Ok(())
}
