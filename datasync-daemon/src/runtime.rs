use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sd_notify::NotifyState;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::Instant;

use datasync_core::{load_policy_dir, PolicyLoad, PolicySet, SyncPolicyRecord, SyncType};
use datasync_notify::{
    DispatchOutcome, IpcTransport, NotifyDispatcher, NotifyProducer, TaskRegistry, Transports,
};

use crate::config::{DaemonConfig, DEBOUNCE_WINDOW};
use crate::error::{io_err, DaemonError};
use crate::protocol::{ControlRequest, ControlResponse, DaemonStatus, ReloadSummary};
use crate::transport::{BusctlIpc, SystemctlServiceManager};

/// State shared by every daemon task.
struct DaemonState {
    config: DaemonConfig,
    policies: RwLock<Arc<PolicySet>>,
    registry: TaskRegistry,
    transports: Transports,
    producer: NotifyProducer,
    reloaded: broadcast::Sender<()>,
    started_at_unix: u64,
}

impl DaemonState {
    fn new(config: DaemonConfig, policies: PolicySet, transports: Transports) -> Self {
        let (reloaded, _) = broadcast::channel(4);
        Self {
            producer: NotifyProducer::new(&config.outgoing_dir),
            config,
            policies: RwLock::new(Arc::new(policies)),
            registry: TaskRegistry::new(),
            transports,
            reloaded,
            started_at_unix: unix_seconds_now(),
        }
    }

    /// Spawn a dispatch task for `path` unless one already owns it.
    async fn dispatch(&self, path: PathBuf) {
        let dispatcher = Arc::new(NotifyDispatcher::new(
            self.transports.clone(),
            self.policies.read().await.clone(),
            self.config.retry_defaults(),
        ));
        match self.registry.spawn(dispatcher, path.clone()) {
            Some((id, _)) => {
                tracing::info!(task = %id, request = %path.display(), "notify request accepted");
            }
            None => {
                tracing::debug!(request = %path.display(), "notify request already in flight");
            }
        }
    }

    /// Re-parse the policy directory and swap the set whole.
    ///
    /// The service manager sees `RELOADING=1` for the duration, then `READY=1`
    /// whether or not the reload succeeded.
    async fn reload(&self) -> Result<ReloadSummary, DaemonError> {
        notify_supervisor(NotifyState::Reloading);
        let result = self.swap_policies().await;
        notify_supervisor(NotifyState::Ready);
        result
    }

    async fn swap_policies(&self) -> Result<ReloadSummary, DaemonError> {
        let load = load_policies(&self.config.config_dir).await?;
        let summary = ReloadSummary::from(&load);
        *self.policies.write().await = Arc::new(load.policies);
        let _ = self.reloaded.send(());

        tracing::info!(
            policies = summary.policies,
            skipped = summary.skipped.len(),
            "policy configuration reloaded",
        );
        Ok(summary)
    }

    async fn status(&self) -> DaemonStatus {
        let dispatches = self.registry.snapshot();
        DaemonStatus {
            started_at_unix: self.started_at_unix,
            policies: self.policies.read().await.len(),
            outstanding: dispatches.len(),
            dispatches,
            config_dir: self.config.config_dir.clone(),
            incoming_dir: self.config.incoming_dir.clone(),
            outgoing_dir: self.config.outgoing_dir.clone(),
        }
    }
}

async fn load_policies(dir: &Path) -> Result<PolicyLoad, DaemonError> {
    let dir = dir.to_path_buf();
    let load = tokio::task::spawn_blocking(move || load_policy_dir(&dir))
        .await
        .map_err(|err| DaemonError::Protocol(format!("policy load join error: {err}")))??;
    Ok(load)
}

/// Report a state change to systemd. Without `NOTIFY_SOCKET` this does nothing.
fn notify_supervisor(state: NotifyState<'_>) {
    if let Err(err) = sd_notify::notify(false, &[state]) {
        tracing::warn!(error = %err, "failed to notify service manager");
    }
}

/// Transports for this node: `systemctl` always, `busctl` when DBus mode is configured.
pub fn build_transports(config: &DaemonConfig) -> Transports {
    let transports = Transports::new(Arc::new(SystemctlServiceManager::default()));
    match &config.dbus_notify {
        Some(method) => {
            let bus = Arc::new(BusctlIpc::default());
            transports.with_ipc(IpcTransport {
                discovery: bus.clone(),
                notifier: bus,
                method: method.clone(),
            })
        }
        None => transports,
    }
}

/// Start the daemon on a single-threaded runtime and block until it exits.
pub fn start_blocking(config: DaemonConfig) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let transports = build_transports(&config);
    runtime.block_on(run(config, transports))
}

/// Run the daemon until shutdown, then drain in-flight dispatches.
///
/// Readiness is announced once the policies are loaded, every watch is in
/// place and the control socket accepts connections.
pub async fn run(config: DaemonConfig, transports: Transports) -> Result<(), DaemonError> {
    config.ensure_dirs()?;

    let load = load_policies(&config.config_dir).await?;
    tracing::info!(
        policies = load.policies.len(),
        skipped = load.skipped.len(),
        "policy configuration loaded",
    );

    let state = Arc::new(DaemonState::new(config, load.policies, transports));
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let incoming = watch_incoming(&state.config.incoming_dir)?;
    let changes = if state.config.watch_policies {
        let policies = state.policies.read().await.clone();
        Some(ChangeWatch::start(&state, &policies)?)
    } else {
        tracing::info!("policy path watching disabled");
        None
    };
    let listener = bind_control_socket(&state.config.socket_path)?;
    let signals = Signals::install()?;

    let incoming_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = incoming_watcher_task(state, incoming, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let change_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = change_watcher_task(state, changes, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = socket_server_task(state, listener, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move { signal_task(state, signals, shutdown, shutdown_rx).await })
    };

    notify_supervisor(NotifyState::Ready);
    tracing::info!(
        incoming = %state.config.incoming_dir.display(),
        socket = %state.config.socket_path.display(),
        "datasync daemon ready",
    );

    let (incoming_result, change_result, socket_result, signal_result) =
        tokio::join!(incoming_handle, change_handle, socket_handle, signal_handle);

    notify_supervisor(NotifyState::Stopping);
    drain(&state).await;

    handle_join("incoming_watcher", incoming_result)?;
    handle_join("change_watcher", change_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn drain(state: &DaemonState) {
    let outstanding = state.registry.len();
    if outstanding == 0 {
        return;
    }
    tracing::info!(outstanding, "waiting for in-flight notify dispatches");
    if let Err(stragglers) = state.registry.drain(state.config.drain_timeout()).await {
        let ids: Vec<String> = stragglers.iter().map(|t| t.id.to_string()).collect();
        tracing::warn!(tasks = ?ids, "shutdown drain timed out; dispatches abandoned");
    }
}

// ---------------------------------------------------------------------------
// Incoming requests
// ---------------------------------------------------------------------------

type WatchEvents = mpsc::UnboundedReceiver<notify::Result<Event>>;
type WatchSender = mpsc::UnboundedSender<notify::Result<Event>>;

/// A live watcher and the channel its events arrive on.
struct IncomingWatch {
    _watcher: RecommendedWatcher,
    events: WatchEvents,
}

fn watch_incoming(dir: &Path) -> Result<IncomingWatch, DaemonError> {
    let (event_tx, events) = mpsc::unbounded_channel();
    let mut watcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(IncomingWatch {
        _watcher: watcher,
        events,
    })
}

async fn incoming_watcher_task(
    state: Arc<DaemonState>,
    mut incoming: IncomingWatch,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    // Requests written before this start (or before a crash) are still owed.
    // The watch is already live, so nothing lands between scan and events.
    for path in pending_requests(&state.config.incoming_dir)? {
        state.dispatch(path).await;
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = incoming.events.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "incoming watcher event error");
                        continue;
                    }
                };
                if !is_request_event_kind(&event.kind) {
                    continue;
                }
                for path in event.paths {
                    if is_request_file(&path) && path.exists() {
                        state.dispatch(path).await;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Request files present in `dir`, oldest name first.
fn pending_requests(dir: &Path) -> Result<Vec<PathBuf>, DaemonError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_request_file(p))
        .collect();
    paths.sort();
    Ok(paths)
}

fn is_request_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn is_request_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

// ---------------------------------------------------------------------------
// Changed paths → outgoing requests
// ---------------------------------------------------------------------------

/// Watches on the configured paths, rebuilt whenever the policy set is reloaded.
struct ChangeWatch {
    watcher: RecommendedWatcher,
    sender: WatchSender,
    events: WatchEvents,
    reloaded: broadcast::Receiver<()>,
}

impl ChangeWatch {
    fn start(state: &DaemonState, policies: &PolicySet) -> Result<Self, DaemonError> {
        let (sender, events) = mpsc::unbounded_channel();
        Ok(Self {
            watcher: watch_policy_paths(policies, sender.clone())?,
            sender,
            events,
            reloaded: state.reloaded.subscribe(),
        })
    }

    fn rebuild(&mut self, policies: &PolicySet) -> Result<(), DaemonError> {
        self.watcher = watch_policy_paths(policies, self.sender.clone())?;
        Ok(())
    }
}

async fn change_watcher_task(
    state: Arc<DaemonState>,
    changes: Option<ChangeWatch>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(mut changes) = changes else {
        let _ = shutdown_rx.recv().await;
        return Ok(());
    };

    let mut debounce = HashMap::<PathBuf, Instant>::new();
    let mut policies = state.policies.read().await.clone();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            reloaded = changes.reloaded.recv() => {
                if let Err(broadcast::error::RecvError::Closed) = reloaded {
                    break;
                }
                policies = state.policies.read().await.clone();
                changes.rebuild(&policies)?;
                debounce.clear();
                tracing::debug!("policy path watches rebuilt");
            }
            event = changes.events.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "policy watcher event error");
                        continue;
                    }
                };
                if !is_change_event_kind(&event.kind) {
                    continue;
                }
                for path in event.paths {
                    if path.starts_with(&state.config.outgoing_dir)
                        || path.starts_with(&state.config.incoming_dir)
                    {
                        continue;
                    }
                    let Some(policy) = notifying_policy(&policies, &path) else { continue };
                    if !should_process_event(&mut debounce, &path, Instant::now()) {
                        continue;
                    }
                    if let Err(err) = state.producer.produce(policy, &path) {
                        tracing::error!(
                            path = %path.display(),
                            error = %err,
                            "failed to write sibling notification request",
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

/// Watch every Immediate policy that notifies its sibling.
///
/// Files are watched through their parent directory so that replace-by-rename
/// saves are seen; directories are watched recursively.
fn watch_policy_paths(
    policies: &PolicySet,
    event_tx: WatchSender,
) -> Result<RecommendedWatcher, DaemonError> {
    let mut watcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;

    for policy in policies.iter().filter(|p| is_watched_policy(p)) {
        let (target, mode) = if policy.path.is_dir() {
            (policy.path.clone(), RecursiveMode::Recursive)
        } else {
            match policy.path.parent() {
                Some(parent) => (parent.to_path_buf(), RecursiveMode::NonRecursive),
                None => continue,
            }
        };
        if !target.exists() {
            tracing::warn!(
                path = %policy.path.display(),
                "configured path does not exist; not watching",
            );
            continue;
        }
        match watcher.watch(&target, mode) {
            Ok(()) => tracing::debug!(path = %target.display(), "watching configured path"),
            Err(err) => tracing::warn!(
                path = %target.display(),
                error = %err,
                "failed to watch configured path",
            ),
        }
    }
    Ok(watcher)
}

fn is_watched_policy(policy: &SyncPolicyRecord) -> bool {
    policy.notify_sibling.is_some() && policy.sync_type == SyncType::Immediate
}

/// The deepest watched policy that tracks `path`.
fn notifying_policy<'a>(policies: &'a PolicySet, path: &Path) -> Option<&'a SyncPolicyRecord> {
    policies
        .iter()
        .filter(|p| is_watched_policy(p) && p.is_tracked(path))
        .max_by_key(|p| p.path.components().count())
}

fn is_change_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
) -> bool {
    should_process_event_with_threshold(debounce, path, now, DEBOUNCE_WINDOW)
}

fn should_process_event_with_threshold(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// SIGHUP and SIGTERM handlers, installed before readiness is announced.
struct Signals {
    hangup: Signal,
    terminate: Signal,
}

impl Signals {
    fn install() -> Result<Self, DaemonError> {
        Ok(Self {
            hangup: signal(SignalKind::hangup()).map_err(|e| io_err("SIGHUP handler", e))?,
            terminate: signal(SignalKind::terminate())
                .map_err(|e| io_err("SIGTERM handler", e))?,
        })
    }
}

async fn signal_task(
    state: Arc<DaemonState>,
    signals: Signals,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Signals {
        mut hangup,
        mut terminate,
    } = signals;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = hangup.recv() => {
                tracing::warn!("received SIGHUP, reloading policy configuration");
                if let Err(err) = state.reload().await {
                    tracing::error!(error = %err, "policy reload failed; keeping previous set");
                }
            }
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM, shutting down daemon");
                let _ = shutdown_tx.send(());
                break;
            }
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => {
                        tracing::info!("received ctrl-c, shutting down daemon");
                        let _ = shutdown_tx.send(());
                        break;
                    }
                    Err(err) => {
                        return Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}")));
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Control socket
// ---------------------------------------------------------------------------

/// Bind the control socket, replacing a stale file left by a dead daemon.
fn bind_control_socket(socket: &Path) -> Result<UnixListener, DaemonError> {
    if socket.exists() {
        if StdUnixStream::connect(socket).is_ok() {
            return Err(DaemonError::Protocol(format!(
                "another daemon is listening on {}",
                socket.display()
            )));
        }
        tracing::warn!(socket = %socket.display(), "removing stale control socket");
        match fs::remove_file(socket) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(socket, err)),
        }
    }

    let listener = UnixListener::bind(socket).map_err(|e| io_err(socket, e))?;
    set_socket_permissions(socket)?;
    Ok(listener)
}

async fn socket_server_task(
    state: Arc<DaemonState>,
    listener: UnixListener,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = state.config.socket_path.clone();
    let result = loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break Ok(()),
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => break Err(io_err(&socket, err)),
                };
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_control_client(stream, &state, &shutdown_tx).await {
                        tracing::warn!(error = %err, "control client error");
                    }
                });
            }
        }
    };

    drop(listener);
    if let Err(err) = fs::remove_file(&socket) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "failed to remove control socket",
            );
        }
    }
    result
}

/// Answer requests on one connection until the peer hangs up or asks to stop.
async fn serve_control_client(
    stream: UnixStream,
    state: &DaemonState,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err(&state.config.socket_path, e))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let request = serde_json::from_str::<ControlRequest>(&line);
        let response = match request {
            Ok(ControlRequest::Status) => ControlResponse::Status(state.status().await),
            Ok(ControlRequest::Reload) => match state.reload().await {
                Ok(summary) => ControlResponse::Reloaded(summary),
                Err(err) => {
                    tracing::error!(error = %err, "policy reload failed; keeping previous set");
                    ControlResponse::error(err.to_string())
                }
            },
            Ok(ControlRequest::Stop) => {
                tracing::info!("stop requested over control socket");
                let _ = shutdown_tx.send(());
                ControlResponse::Stopping
            }
            Err(err) => ControlResponse::error(format!("unrecognized control request: {err}")),
        };

        let mut reply = serde_json::to_vec(&response)?;
        reply.push(b'\n');
        writer
            .write_all(&reply)
            .await
            .map_err(|e| io_err(&state.config.socket_path, e))?;

        if matches!(response, ControlResponse::Stopping) {
            break;
        }
    }
    Ok(())
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

// ---------------------------------------------------------------------------
// One-shot dispatch
// ---------------------------------------------------------------------------

/// Dispatch a single request file outside the daemon, with the daemon's
/// transports and the policies currently on disk.
pub async fn dispatch_once(
    config: &DaemonConfig,
    transports: Transports,
    request: &Path,
) -> Result<DispatchOutcome, DaemonError> {
    let load = load_policies(&config.config_dir).await?;
    let dispatcher = Arc::new(NotifyDispatcher::new(
        transports,
        Arc::new(load.policies),
        config.retry_defaults(),
    ));

    let registry = TaskRegistry::new();
    let (_, handle) = registry
        .spawn(dispatcher, request.to_path_buf())
        .ok_or_else(|| DaemonError::Protocol("request already claimed".to_string()))?;
    let outcome = handle
        .await
        .map_err(|err| DaemonError::Protocol(format!("dispatch task join error: {err}")))??;
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

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

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the `tracing` subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
