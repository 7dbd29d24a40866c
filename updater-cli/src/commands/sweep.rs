//! `swarm-updater sweep` — run one update sweep now.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use updater_core::{ServiceOutcome, SkipReason, SweepReport, SweepStatus};
use updater_daemon::request_sweep;
use updater_engine::CancellationToken;

use crate::settings::GlobalArgs;

/// Arguments for `swarm-updater sweep`.
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Run in this process instead of asking the running daemon.
    #[arg(long)]
    pub once: bool,

    /// Only update services whose image starts with this prefix (repeatable).
    #[arg(long = "image", value_name = "PREFIX")]
    pub images: Vec<String>,

    /// Emit the sweep report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SweepArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let report = if self.once {
            run_in_process(global, self.images)?
        } else {
            let state = global.state_dir()?;
            let data = request_sweep(&state, self.images).context("daemon sweep failed")?;
            serde_json::from_value(data).context("daemon returned an unreadable sweep report")?
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize sweep report")?
            );
        } else {
            print_table(&report);
        }

        let failed = report.failed();
        if failed > 0 {
            bail!("{failed} service(s) failed to update");
        }
        Ok(())
    }
}

fn run_in_process(global: &GlobalArgs, images: Vec<String>) -> Result<SweepReport> {
    let (_, guard) = global.build_guard()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Waiting for running update to be finished...");
                    cancel.cancel();
                }
            })
        };

        let report = guard.trigger_sweep(images, &cancel).await;
        interrupt.abort();
        report.context("sweep failed")
    })
}

#[derive(Tabled)]
struct SweepTableRow {
    #[tabled(rename = "service")]
    service: String,
    #[tabled(rename = "outcome")]
    outcome: String,
    #[tabled(rename = "detail")]
    detail: String,
}

fn print_table(report: &SweepReport) {
    let status = match report.status {
        SweepStatus::Completed => "completed".green().bold(),
        SweepStatus::Cancelled => "cancelled".yellow().bold(),
    };
    println!(
        "Sweep {status} in {}s | {} updated | {} current | {} skipped | {} failed",
        (report.finished_at - report.started_at).num_seconds(),
        report.updated(),
        report.current(),
        report.skipped(),
        report.failed(),
    );

    if report.services.is_empty() {
        println!("No services found.");
        return;
    }

    let rows: Vec<SweepTableRow> = report
        .services
        .iter()
        .map(|row| SweepTableRow {
            service: row.name.clone(),
            outcome: outcome_label(&row.outcome),
            detail: outcome_detail(&row.outcome),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn outcome_label(outcome: &ServiceOutcome) -> String {
    match outcome {
        ServiceOutcome::Updated { .. } => "UPDATED".green().bold().to_string(),
        ServiceOutcome::AlreadyCurrent => "CURRENT".bright_black().to_string(),
        ServiceOutcome::Skipped { .. } => "SKIPPED".yellow().to_string(),
        ServiceOutcome::Failed { .. } => "FAILED".red().bold().to_string(),
    }
}

fn outcome_detail(outcome: &ServiceOutcome) -> String {
    match outcome {
        ServiceOutcome::Updated { image } => image.clone(),
        ServiceOutcome::AlreadyCurrent => "up to date".to_string(),
        ServiceOutcome::Skipped { reason } => match reason {
            SkipReason::Ineligible => "not eligible".to_string(),
            SkipReason::FilteredOut => "image not requested".to_string(),
            SkipReason::Cancelled => "sweep cancelled".to_string(),
        },
        ServiceOutcome::Failed { error } => error.clone(),
    }
}
