use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

use updater_core::{SweepReport, SweepSchedule, SweepStatus};
use updater_engine::{CancellationToken, SweepError, SweepGuard};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Where the daemon keeps its socket and when it sweeps.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub state_dir: PathBuf,
    pub schedule: SweepSchedule,
}

/// Compact record of the most recent sweep, exposed through `status`.
#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SweepStatus>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub updated: usize,
    pub current: usize,
    pub skipped: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SweepSummary {
    fn from_report(source: &str, report: &SweepReport) -> Self {
        Self {
            source: source.to_string(),
            status: Some(report.status),
            started_at: report.started_at,
            finished_at: report.finished_at,
            updated: report.updated(),
            current: report.current(),
            skipped: report.skipped(),
            failed: report.failed(),
            error: None,
        }
    }

    fn from_error(source: &str, started_at: DateTime<Utc>, err: &SweepError) -> Self {
        Self {
            source: source.to_string(),
            status: None,
            started_at,
            finished_at: Utc::now(),
            updated: 0,
            current: 0,
            skipped: 0,
            failed: 0,
            error: Some(err.to_string()),
        }
    }
}

struct DaemonState {
    guard: Arc<SweepGuard>,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
    schedule: SweepSchedule,
    socket: PathBuf,
    next_run: RwLock<Option<DateTime<Utc>>>,
    last_sweep: RwLock<Option<SweepSummary>>,
}

impl DaemonState {
    fn new(guard: Arc<SweepGuard>, options: &DaemonOptions) -> Self {
        Self {
            guard,
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
            schedule: options.schedule.clone(),
            socket: socket_path(&options.state_dir),
            next_run: RwLock::new(None),
            last_sweep: RwLock::new(None),
        }
    }

    async fn sweep(&self, images: Vec<String>, source: &str) -> Result<SweepReport, SweepError> {
        let started_at = Utc::now();
        let result = self.guard.trigger_sweep(images, &self.cancel).await;

        let summary = match &result {
            // Gave up while queued; nothing ran.
            Ok(report) if report.status == SweepStatus::Cancelled && report.services.is_empty() => {
                None
            }
            Ok(report) => Some(SweepSummary::from_report(source, report)),
            Err(SweepError::Busy) => None,
            Err(err) => Some(SweepSummary::from_error(source, started_at, err)),
        };
        if let Some(summary) = summary {
            *self.last_sweep.write().await = Some(summary);
        }
        result
    }

    /// Deadline of the next scheduled sweep, recorded for `status`.
    ///
    /// Interval ticks stay aligned to the previous deadline and skip any
    /// that passed while a sweep ran. Cron times follow the local clock.
    async fn plan_next_run(&self, previous: Option<Instant>) -> Option<Instant> {
        let now = Instant::now();
        let wall_now = Local::now();
        let deadline = match (&self.schedule, previous) {
            (SweepSchedule::Every(period), Some(previous)) => {
                let mut deadline = previous + *period;
                while deadline <= now {
                    deadline += *period;
                }
                Some(deadline)
            }
            (SweepSchedule::Every(period), None) => Some(now + *period),
            (schedule @ SweepSchedule::Cron { .. }, _) => schedule
                .next_after(&wall_now)
                .map(|at| now + (at - wall_now).to_std().unwrap_or_default()),
        };

        let at = deadline.and_then(|deadline| {
            chrono::Duration::from_std(deadline - now)
                .ok()
                .map(|wait| wall_now.with_timezone(&Utc) + wait)
        });
        if let Some(at) = at {
            tracing::info!(next_run = %at.with_timezone(&Local).to_rfc3339(), "scheduled next run");
        }
        *self.next_run.write().await = at;
        deadline
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(options: DaemonOptions, guard: SweepGuard) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(options, Arc::new(guard)))
}

/// Run the scheduler and control socket until ctrl-c, SIGTERM or `stop`.
pub async fn run(options: DaemonOptions, guard: Arc<SweepGuard>) -> Result<(), DaemonError> {
    ensure_state_dir(&options.state_dir)?;

    let state = Arc::new(DaemonState::new(guard, &options));
    prepare_socket_for_bind(&state.socket)?;
    let listener = UnixListener::bind(&state.socket).map_err(|e| io_err(&state.socket, e))?;
    set_socket_permissions(&state.socket)?;
    tracing::info!(
        socket = %state.socket.display(),
        schedule = %options.schedule,
        policy = %state.guard.policy(),
        "daemon started",
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let state = state.clone();
        tokio::spawn(async move {
            let result = scheduler_task(state, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let state = state.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(state, listener, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { signal_task(shutdown, shutdown_rx).await })
    };

    let drain_handle = {
        let shutdown_rx = shutdown_tx.subscribe();
        let state = state.clone();
        tokio::spawn(async move { drain_task(state, shutdown_rx).await })
    };

    let (scheduler_result, socket_result, signal_result, drain_result) = tokio::join!(
        scheduler_handle,
        socket_handle,
        signal_handle,
        drain_handle
    );

    handle_join("scheduler", scheduler_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    handle_join("drain", drain_result)?;
    Ok(())
}

async fn scheduler_task(
    state: Arc<DaemonState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut next = if state.schedule.runs_at_start() {
        Some(Instant::now())
    } else {
        state.plan_next_run(None).await
    };

    while let Some(deadline) = next {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return Ok(()),
            _ = tokio::time::sleep_until(deadline) => {
                if state.cancel.is_cancelled() {
                    return Ok(());
                }
                match state.sweep(Vec::new(), "schedule").await {
                    Ok(_) => {}
                    Err(SweepError::Busy) => {
                        tracing::info!("scheduled sweep skipped, already running");
                    }
                    Err(err) => tracing::error!(error = %err, "scheduled sweep failed"),
                }
                next = state.plan_next_run(Some(deadline)).await;
            }
        }
    }

    tracing::warn!(schedule = %state.schedule, "schedule has no further runs");
    let _ = shutdown_rx.recv().await;
    Ok(())
}

async fn socket_server_task(
    state: Arc<DaemonState>,
    listener: UnixListener,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = state.socket.clone();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: Arc<DaemonState>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(&state).await),
            "sweep" => {
                let images = request.images.clone().unwrap_or_default();
                match state.sweep(images, "socket").await {
                    Ok(report) => DaemonResponse::ok(serde_json::to_value(&report)?),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
            "stop" => DaemonResponse::ok(json!({ "stopping": true })),
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        // Written before shutdown starts; the runtime may exit right after.
        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            tracing::info!("stop requested over control socket");
            let _ = shutdown_tx.send(());
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(state: &DaemonState) -> Value {
    let last_sweep = state.last_sweep.read().await.clone();
    let next_run = *state.next_run.read().await;
    let interval_secs = match &state.schedule {
        SweepSchedule::Every(period) => Some(period.as_secs()),
        SweepSchedule::Cron { .. } => None,
    };
    json!({
        "running": true,
        "started_at": state.started_at,
        "schedule": state.schedule.to_string(),
        "interval_secs": interval_secs,
        "next_run": next_run,
        "overlap_policy": state.guard.policy().to_string(),
        "sweep_in_progress": state.guard.is_running(),
        "last_sweep": last_sweep,
        "socket": state.socket.display().to_string(),
    })
}

async fn signal_task(
    shutdown: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut terminate = signal(SignalKind::terminate())
        .map_err(|err| DaemonError::Protocol(format!("SIGTERM handler failed: {err}")))?;

    tokio::select! {
        _ = shutdown_rx.recv() => return Ok(()),
        result = tokio::signal::ctrl_c() => {
            result.map_err(|err| DaemonError::Protocol(format!("ctrl-c handler failed: {err}")))?;
            tracing::info!("received ctrl-c, shutting down daemon");
        }
        _ = terminate.recv() => tracing::info!("received SIGTERM, shutting down daemon"),
    }
    let _ = shutdown.send(());
    Ok(())
}

// Cancels the running sweep and holds shutdown until it has drained.
async fn drain_task(
    state: Arc<DaemonState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let _ = shutdown_rx.recv().await;
    state.cancel.cancel();
    if state.guard.is_running() {
        tracing::info!("Waiting for running update to be finished...");
    }
    state.guard.wait_idle().await;
    tracing::info!("daemon stopped");
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_state_dir(state_dir: &Path) -> Result<(), DaemonError> {
    if !state_dir.exists() {
        fs::create_dir_all(state_dir).map_err(|e| io_err(state_dir, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the global `tracing` subscriber: `RUST_LOG` wins unless `debug`
/// forces debug level; `json` switches to one JSON object per line. Logs go
/// to stderr so command output stays parseable.
pub fn init_tracing(debug: bool, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
