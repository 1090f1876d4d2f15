//! Session lifecycle: the `tokio`-backed worker loop that drives one
//! [`Kernel`] to completion, plus the [`SessionManager`] that owns a
//! registry of running sessions.
//!
//! Grounded in the teacher's per-session actor shape (one spawned task
//! owns the mutable simulation state exclusively; callers only ever
//! talk to it through channels), generalized from a tick/day RTGS loop
//! to the nine-phase step loop and from a single always-running
//! simulation to a registry of independently lifecycled sessions.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::Event;
use crate::models::BankId;
use crate::orchestrator::Kernel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Opaque session handle returned by [`SessionManager::init`].
pub type SessionId = Uuid;

/// A session's place in its lifecycle.
///
/// `Uninitialized` never appears as a live value — a [`SessionManager`]
/// only ever hands back a handle once a session has already been built
/// from a validated [`SessionConfig`], so every live session starts at
/// `Initialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Running,
    Paused,
    Stopped,
    Completed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Uninitialized => "Uninitialized",
            SessionState::Initialized => "Initialized",
            SessionState::Running => "Running",
            SessionState::Paused => "Paused",
            SessionState::Stopped => "Stopped",
            SessionState::Completed => "Completed",
        };
        f.write_str(s)
    }
}

/// A control-inbox command, applied by the worker between phases 1 and
/// 2 of the next step it runs (or immediately, for `Pause`/`Resume`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Stop,
    DeleteBank(BankId),
    AddCapital(BankId, f64),
    TriggerDefault(BankId),
}

/// Point-in-time snapshot returned by [`SessionManager::status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub current_step: u64,
    pub total_steps: u64,
    pub total_defaults: u32,
    pub total_equity: f64,
}

type Subscribers = Arc<Mutex<Vec<mpsc::Sender<Event>>>>;
type StepRequest = oneshot::Sender<Result<Vec<Event>, SessionError>>;

/// Everything a [`SessionManager`] needs to talk to one running worker.
struct SessionHandle {
    join_handle: JoinHandle<()>,
    control_tx: mpsc::Sender<ControlCommand>,
    step_tx: mpsc::Sender<StepRequest>,
    start_tx: Mutex<Option<oneshot::Sender<()>>>,
    subscribers: Subscribers,
    status: Arc<Mutex<SessionStatus>>,
}

/// Registry of running sessions. One process may own many; each
/// session's simulation state lives exclusively inside its own spawned
/// worker task (§5: "sessions run independently").
#[derive(Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a session from a validated config and spawn its worker.
    /// The worker sits idle at `Initialized` until [`Self::start`] is
    /// called — `init` and `start` are distinct endpoints (§6).
    pub fn init(&self, config: SessionConfig) -> Result<SessionId, SessionError> {
        let kernel = Kernel::new(&config)?;

        let (control_tx, control_rx) = mpsc::channel(64);
        let (step_tx, step_rx) = mpsc::channel(8);
        let (start_tx, start_rx) = oneshot::channel();
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let status = Arc::new(Mutex::new(SessionStatus {
            state: SessionState::Initialized,
            current_step: 0,
            total_steps: config.total_steps,
            total_defaults: kernel.total_defaults(),
            total_equity: kernel.total_equity(),
        }));

        let worker_subscribers = subscribers.clone();
        let worker_status = status.clone();
        let join_handle = tokio::spawn(run_worker(kernel, config, control_rx, step_rx, start_rx, worker_subscribers, worker_status));

        let id = Uuid::new_v4();
        let handle = SessionHandle {
            join_handle,
            control_tx,
            step_tx,
            start_tx: Mutex::new(Some(start_tx)),
            subscribers,
            status,
        };
        self.sessions.lock().unwrap().insert(id, handle);
        info!(%id, "session initialized");
        Ok(id)
    }

    /// Transition `Initialized -> Running`. Calling this more than once
    /// on the same session is a precondition error.
    pub fn start(&self, id: SessionId) -> Result<(), SessionError> {
        let sessions = self.sessions.lock().unwrap();
        let handle = sessions.get(&id).ok_or_else(|| SessionError::not_found("session", id.to_string()))?;
        let mut slot = handle.start_tx.lock().unwrap();
        match slot.take() {
            Some(tx) => {
                let _ = tx.send(());
                Ok(())
            }
            None => Err(SessionError::precondition("start", "already started")),
        }
    }

    /// Register a new subscriber and return its receiving end. A
    /// session can have any number of subscribers, added at any time
    /// (§4.9).
    pub fn subscribe(&self, id: SessionId, buffer: usize) -> Result<mpsc::Receiver<Event>, SessionError> {
        let sessions = self.sessions.lock().unwrap();
        let handle = sessions.get(&id).ok_or_else(|| SessionError::not_found("session", id.to_string()))?;
        let (tx, rx) = mpsc::channel(buffer);
        handle.subscribers.lock().unwrap().push(tx);
        Ok(rx)
    }

    /// Enqueue a control command onto the session's inbox.
    pub async fn control(&self, id: SessionId, command: ControlCommand) -> Result<(), SessionError> {
        let control_tx = {
            let sessions = self.sessions.lock().unwrap();
            let handle = sessions.get(&id).ok_or_else(|| SessionError::not_found("session", id.to_string()))?;
            handle.control_tx.clone()
        };
        control_tx.send(command).await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Run exactly one step while the session is `Paused`, returning
    /// the events it produced. Errs with `Precondition` if the worker
    /// is not currently paused (it would otherwise race the
    /// auto-run loop).
    pub async fn step(&self, id: SessionId) -> Result<Vec<Event>, SessionError> {
        let step_tx = {
            let sessions = self.sessions.lock().unwrap();
            let handle = sessions.get(&id).ok_or_else(|| SessionError::not_found("session", id.to_string()))?;
            handle.step_tx.clone()
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        step_tx.send(reply_tx).await.map_err(|_| SessionError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    /// Current lifecycle state and progress counters.
    pub fn status(&self, id: SessionId) -> Result<SessionStatus, SessionError> {
        let sessions = self.sessions.lock().unwrap();
        let handle = sessions.get(&id).ok_or_else(|| SessionError::not_found("session", id.to_string()))?;
        Ok(handle.status.lock().unwrap().clone())
    }

    /// Abort the worker (if still running), drop every subscriber
    /// sender, and forget the session.
    pub fn destroy(&self, id: SessionId) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().unwrap();
        let handle = sessions.remove(&id).ok_or_else(|| SessionError::not_found("session", id.to_string()))?;
        handle.join_handle.abort();
        handle.subscribers.lock().unwrap().clear();
        info!(%id, "session destroyed");
        Ok(())
    }
}

async fn publish(subscribers: &Subscribers, event: Event) {
    let senders: Vec<mpsc::Sender<Event>> = subscribers.lock().unwrap().clone();
    let mut dead = Vec::new();
    for sender in &senders {
        if sender.send(event.clone()).await.is_err() {
            dead.push(sender.clone());
        }
    }
    if !dead.is_empty() {
        let mut guard = subscribers.lock().unwrap();
        guard.retain(|s| !dead.iter().any(|d| d.same_channel(s)));
    }
}

fn snapshot_progress(kernel: &Kernel, status: &Arc<Mutex<SessionStatus>>) {
    let mut s = status.lock().unwrap();
    s.current_step = kernel.current_step();
    s.total_defaults = kernel.total_defaults();
    s.total_equity = kernel.total_equity();
}

async fn publish_complete(kernel: &Kernel, subscribers: &Subscribers, status: &Arc<Mutex<SessionStatus>>) {
    {
        let mut s = status.lock().unwrap();
        s.state = SessionState::Completed;
        s.current_step = kernel.current_step();
        s.total_defaults = kernel.total_defaults();
        s.total_equity = kernel.total_equity();
    }
    publish(
        subscribers,
        Event::Complete {
            step: kernel.current_step(),
            total_defaults: kernel.total_defaults(),
            total_equity: kernel.total_equity(),
        },
    )
    .await;
}

/// Run one step, publishing every event it produced and refreshing the
/// shared status snapshot. Shared by the auto-run loop and by
/// [`SessionManager::step`]'s manual single-step path.
async fn run_one_step(kernel: &mut Kernel, subscribers: &Subscribers, status: &Arc<Mutex<SessionStatus>>) -> Result<Vec<Event>, SessionError> {
    if kernel.is_complete() {
        publish_complete(kernel, subscribers, status).await;
        return Ok(Vec::new());
    }
    match kernel.step() {
        Ok(events) => {
            for event in &events {
                publish(subscribers, event.clone()).await;
            }
            snapshot_progress(kernel, status);
            if kernel.is_complete() {
                publish_complete(kernel, subscribers, status).await;
            }
            Ok(events)
        }
        Err(err) => {
            status.lock().unwrap().state = SessionState::Stopped;
            publish(subscribers, Event::Stopped { step: kernel.current_step() }).await;
            Err(SessionError::Invariant(err))
        }
    }
}

/// Apply one control command. Returns `true` if the worker should exit
/// (only `Stop` does this).
async fn apply_command(command: ControlCommand, kernel: &mut Kernel, subscribers: &Subscribers, status: &Arc<Mutex<SessionStatus>>) -> bool {
    match command {
        ControlCommand::Pause => {
            status.lock().unwrap().state = SessionState::Paused;
            publish(subscribers, Event::Paused { step: kernel.current_step() }).await;
            false
        }
        ControlCommand::Resume => {
            status.lock().unwrap().state = SessionState::Running;
            publish(subscribers, Event::Resumed { step: kernel.current_step() }).await;
            false
        }
        ControlCommand::Stop => {
            status.lock().unwrap().state = SessionState::Stopped;
            publish(subscribers, Event::Stopped { step: kernel.current_step() }).await;
            true
        }
        ControlCommand::DeleteBank(id) => {
            if let Some(event) = kernel.delete_bank(id) {
                publish(subscribers, event).await;
            }
            false
        }
        ControlCommand::AddCapital(id, amount) => {
            if let Some(event) = kernel.add_capital(id, amount) {
                publish(subscribers, event).await;
            }
            false
        }
        ControlCommand::TriggerDefault(id) => {
            kernel.trigger_default(id);
            false
        }
    }
}

async fn run_worker(
    mut kernel: Kernel,
    config: SessionConfig,
    mut control_rx: mpsc::Receiver<ControlCommand>,
    mut step_rx: mpsc::Receiver<StepRequest>,
    start_rx: oneshot::Receiver<()>,
    subscribers: Subscribers,
    status: Arc<Mutex<SessionStatus>>,
) {
    if start_rx.await.is_err() {
        // Manager dropped (or the session was destroyed) before start.
        return;
    }

    publish(&subscribers, kernel.init_event(&config)).await;
    status.lock().unwrap().state = SessionState::Running;

    loop {
        while let Ok(cmd) = control_rx.try_recv() {
            if apply_command(cmd, &mut kernel, &subscribers, &status).await {
                subscribers.lock().unwrap().clear();
                return;
            }
        }

        let paused = status.lock().unwrap().state == SessionState::Paused;
        if paused {
            tokio::select! {
                cmd = control_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if apply_command(cmd, &mut kernel, &subscribers, &status).await {
                                subscribers.lock().unwrap().clear();
                                return;
                            }
                        }
                        None => {
                            subscribers.lock().unwrap().clear();
                            return;
                        }
                    }
                }
                req = step_rx.recv() => {
                    if let Some(reply) = req {
                        let result = run_one_step(&mut kernel, &subscribers, &status).await;
                        let done = kernel.is_complete();
                        let _ = reply.send(result);
                        if done {
                            subscribers.lock().unwrap().clear();
                            return;
                        }
                    }
                }
            }
            continue;
        }

        if kernel.is_complete() {
            publish_complete(&kernel, &subscribers, &status).await;
            subscribers.lock().unwrap().clear();
            return;
        }

        match kernel.step() {
            Ok(events) => {
                for event in events {
                    publish(&subscribers, event).await;
                }
                snapshot_progress(&kernel, &status);
                if kernel.is_complete() {
                    publish_complete(&kernel, &subscribers, &status).await;
                    subscribers.lock().unwrap().clear();
                    return;
                }
            }
            Err(err) => {
                warn!(error = %err, "kernel invariant violation, stopping session");
                status.lock().unwrap().state = SessionState::Stopped;
                publish(&subscribers, Event::Stopped { step: kernel.current_step() }).await;
                subscribers.lock().unwrap().clear();
                return;
            }
        }
    }
}
