use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};

use courtsync_core::config::{self, Config};
use courtsync_core::types::EntityKind;
use courtsync_sync::http_gateway::probe_target;
use courtsync_sync::status::describe;
use courtsync_sync::{
    JsonFileSlot, JsonFileStore, OrchestratorOptions, PendingOperationQueue, RestGateway,
    SyncOrchestrator,
};

use crate::error::{io_err, DaemonError};
use crate::lock::EngineLock;
use crate::paths::socket_path;
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::reachability::ReachabilityProbe;
use crate::realtime::{self, TableChange};
use crate::scheduler::{Scheduler, SchedulerHandle, SchedulerOptions, Trigger};

/// Everything a socket client can reach.
#[derive(Clone)]
struct DaemonContext {
    home: PathBuf,
    config: Arc<Config>,
    orchestrator: Arc<SyncOrchestrator>,
    scheduler: SchedulerHandle,
    changes: mpsc::Sender<TableChange>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing("info");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load config, wire the file-backed engine to the REST gateway and run.
/// The engine lock is taken before the store is opened and held until exit.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = config::load_at(&home)?;
    let lock = EngineLock::acquire(&home)?;
    let orchestrator = Arc::new(build_orchestrator(&home, &config)?);
    let target = probe_target(&config.remote.base_url);
    let result = run_with(home, config, orchestrator, target).await;
    drop(lock);
    result
}

/// The production engine: JSON-file store and queue under `~/.courtsync`,
/// REST gateway from config.
pub fn build_orchestrator(home: &Path, config: &Config) -> Result<SyncOrchestrator, DaemonError> {
    config::ensure_root_at(home)?;
    let store = Arc::new(JsonFileStore::open_at(home)?);
    let queue = Arc::new(PendingOperationQueue::load(JsonFileSlot::at(home)));
    let gateway = Arc::new(RestGateway::from_config(config)?);
    Ok(SyncOrchestrator::new(store, gateway, queue)
        .with_options(OrchestratorOptions::from(&config.sync)))
}

/// Run the daemon around an already-built orchestrator. `probe` is the
/// `host:port` watched for reachability; `None` assumes always online.
pub async fn run_with(
    home: PathBuf,
    config: Config,
    orchestrator: Arc<SyncOrchestrator>,
    probe: Option<(String, u16)>,
) -> Result<(), DaemonError> {
    config::ensure_root_at(&home)?;
    let started_at_unix = unix_seconds_now();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let (reachability, probe_handle) = match probe {
        Some((host, port)) => {
            let (rx, handle) = ReachabilityProbe::new(host, port, config.sync.probe_interval())
                .start(shutdown_tx.subscribe())
                .await;
            (Some(rx), Some(handle))
        }
        None => (None, None),
    };

    let scheduler = Scheduler::start_with_shutdown(
        orchestrator.clone(),
        SchedulerOptions::from(&config.sync),
        reachability,
        shutdown_tx.clone(),
    );

    let (changes_tx, changes_rx) = mpsc::channel::<TableChange>(64);
    let realtime_handle = {
        let shutdown = shutdown_tx.clone();
        let listener = realtime::spawn_listener(scheduler.handle(), changes_rx, shutdown.subscribe());
        tokio::spawn(async move {
            let result = handle_join("realtime_listener", listener.await);
            let _ = shutdown.send(());
            result
        })
    };

    let context = DaemonContext {
        home: home.clone(),
        config: Arc::new(config),
        orchestrator,
        scheduler: scheduler.handle(),
        changes: changes_tx,
        shutdown_tx: shutdown_tx.clone(),
        started_at_unix,
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let context = context.clone();
        tokio::spawn(async move {
            let result = socket_server_task(context, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    tracing::info!(
        socket = %socket_path(&home).display(),
        remote = %context.config.remote.base_url,
        enabled = context.orchestrator.is_enabled(),
        "courtsync daemon started",
    );

    let (realtime_result, socket_result, signal_result) =
        tokio::join!(realtime_handle, socket_handle, signal_handle);

    handle_join("realtime", realtime_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    scheduler.join().await?;
    if let Some(probe_handle) = probe_handle {
        handle_join("reachability_probe", probe_handle.await)?;
    }
    tracing::info!("courtsync daemon stopped");
    Ok(())
}

async fn socket_server_task(
    context: DaemonContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&context.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let context = context.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, context).await {
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
    context: DaemonContext,
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

        let stopping = request.cmd == "stop";
        let response = dispatch(&context, request).await;
        write_response(&mut writer, &response).await?;
        if stopping {
            break;
        }
    }

    Ok(())
}

async fn dispatch(context: &DaemonContext, request: DaemonRequest) -> DaemonResponse {
    match request.cmd.as_str() {
        "status" => DaemonResponse::ok(build_status_payload(context).await),
        "sync" => match context.scheduler.trigger(Trigger::Manual).await {
            Ok(summary) => DaemonResponse::ok(json!(summary)),
            Err(err) => DaemonResponse::error(err.to_string()),
        },
        "stop" => {
            let _ = context.shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        "enable" => set_enabled(context, true),
        "disable" => set_enabled(context, false),
        "foreground" => {
            let requested = context.scheduler.request(Trigger::Foreground);
            DaemonResponse::ok(json!({ "requested": requested }))
        }
        "changed" => {
            let Some(table) = request.table else {
                return DaemonResponse::error("'changed' requires a table");
            };
            let known = EntityKind::from_table(&table).is_some();
            match context.changes.send(TableChange::new(table.clone())).await {
                Ok(()) => DaemonResponse::ok(json!({ "table": table, "known": known })),
                Err(_) => DaemonResponse::error(
                    DaemonError::ChannelClosed("realtime changes").to_string(),
                ),
            }
        }
        "queue" => {
            let operations = context.orchestrator.queue().snapshot();
            DaemonResponse::ok(json!({
                "count": operations.len(),
                "operations": operations,
            }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

/// Persist first so the flag survives a restart, then flip the live gate.
fn set_enabled(context: &DaemonContext, enabled: bool) -> DaemonResponse {
    if let Err(err) = config::set_enabled_at(&context.home, enabled) {
        tracing::error!(error = %err, enabled, "failed to persist sync flag");
        return DaemonResponse::error(err.to_string());
    }
    context.orchestrator.set_enabled(enabled);
    DaemonResponse::ok(json!({ "enabled": enabled }))
}

async fn build_status_payload(context: &DaemonContext) -> Value {
    let orchestrator = &context.orchestrator;
    let status = orchestrator.status().current();
    let last_success = orchestrator.status().last_success();

    let dirty_entities = match orchestrator.dirty_count() {
        Ok(count) => Some(count),
        Err(err) => {
            tracing::warn!(error = %err, "dirty count unavailable");
            None
        }
    };
    let changed_since_last_sync =
        last_success.and_then(|at| orchestrator.changed_since(at).ok());
    let last_cycle = context.scheduler.last_summary().await;

    json!({
        "running": true,
        "started_at_unix": context.started_at_unix,
        "status": status,
        "describe": describe(&status, last_success, Utc::now()),
        "last_success": last_success,
        "enabled": orchestrator.is_enabled(),
        "online": orchestrator.is_online(),
        "pending_operations": orchestrator.queue().len(),
        "dirty_entities": dirty_entities,
        "changed_since_last_sync": changed_since_last_sync,
        "socket": socket_path(&context.home).display().to_string(),
        "remote": context.config.remote.base_url,
        "interval_secs": context.config.sync.interval_secs,
        "last_cycle": last_cycle,
    })
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

pub(crate) fn handle_join(
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

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Logs go to stderr so `--json` output stays clean. `RUST_LOG` wins over
/// `default`.
pub fn init_tracing(default: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
