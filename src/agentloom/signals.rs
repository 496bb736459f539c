//! Interrupts & Signals (C11).
//!
//! Grounded in the channel-based style the teacher uses for event streaming
//! (`tokio::sync::mpsc` receivers handed out to consumers in `llm_session.rs`
//! and `mcp_server.rs`), adapted here to the asynchronous signal-delivery
//! semantics §4.11 specifies. Delivery goes through the engine's
//! `SignalByID(run_id, signal, payload)` entry point (modeled by
//! [`SignalRouter::deliver`]); in-loop receivers are cooperative — consumers
//! must call [`SignalReceiver::try_recv`] between activities so replay stays
//! deterministic (§4.11, §5).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::error::RuntimeError;
use crate::ids::RunId;

/// Payload carried by `SignalPause`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseRequest {
    pub run_id: RunId,
    /// Optional deadline; on expiry the loop surfaces `InterruptExpired`.
    pub resume_deadline: Option<chrono::DateTime<chrono::Utc>>,
}

/// Payload carried by `SignalResume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub run_id: RunId,
}

/// Payload carried by `SignalProvideClarification`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationAnswer {
    pub run_id: RunId,
    pub answer: serde_json::Value,
}

/// Payload carried by `SignalProvideToolResults`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalToolResults {
    pub run_id: RunId,
    pub results: serde_json::Value,
}

/// Payload carried by `SignalConfirmationDecision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationDecision {
    pub run_id: RunId,
    pub approved: bool,
}

/// One side of a signal channel; the workflow side. `try_recv` never
/// suspends; `recv`/`recv_timeout` suspend, matching the distinction §4.6
/// draws between `ReceiveAsync` and `Receive`/`ReceiveWithTimeout`.
pub struct SignalReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> SignalReceiver<T> {
    /// Non-blocking receive; never suspends the workflow (`ReceiveAsync`).
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Blocking receive; suspends until a value arrives (`Receive`).
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Bounded receive; suspends until a value arrives or `d` elapses
    /// (`ReceiveWithTimeout`).
    pub async fn recv_timeout(&mut self, d: Duration) -> Option<T> {
        timeout(d, self.rx.recv()).await.ok().flatten()
    }
}

/// The caller side of a signal channel.
pub struct SignalSender<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> SignalSender<T> {
    pub fn send(&self, value: T) -> Result<(), RuntimeError> {
        self.tx
            .send(value)
            .map_err(|_| RuntimeError::infra("signal receiver dropped", std::io::Error::other("closed")))
    }
}

fn channel<T>() -> (SignalSender<T>, SignalReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SignalSender { tx }, SignalReceiver { rx })
}

/// The five signal channels one running workflow exposes to its `WorkflowContext`.
pub struct SignalChannels {
    pub pause: SignalReceiver<PauseRequest>,
    pub resume: SignalReceiver<ResumeRequest>,
    pub clarification: SignalReceiver<ClarificationAnswer>,
    pub external_tool_results: SignalReceiver<ExternalToolResults>,
    pub confirmation: SignalReceiver<ConfirmationDecision>,
}

/// The sender halves handed to whatever delivers signals into a run (e.g. the
/// in-process client API, §6.1).
pub struct SignalSenders {
    pub pause: SignalSender<PauseRequest>,
    pub resume: SignalSender<ResumeRequest>,
    pub clarification: SignalSender<ClarificationAnswer>,
    pub external_tool_results: SignalSender<ExternalToolResults>,
    pub confirmation: SignalSender<ConfirmationDecision>,
}

/// Construct a fresh signal channel set for one run.
pub fn signal_channels() -> (SignalSenders, SignalChannels) {
    let (pause_tx, pause_rx) = channel();
    let (resume_tx, resume_rx) = channel();
    let (clar_tx, clar_rx) = channel();
    let (ext_tx, ext_rx) = channel();
    let (conf_tx, conf_rx) = channel();
    (
        SignalSenders {
            pause: pause_tx,
            resume: resume_tx,
            clarification: clar_tx,
            external_tool_results: ext_tx,
            confirmation: conf_tx,
        },
        SignalChannels {
            pause: pause_rx,
            resume: resume_rx,
            clarification: clar_rx,
            external_tool_results: ext_rx,
            confirmation: conf_rx,
        },
    )
}

/// Process-wide registry of `(RunId → SignalSenders)` used by
/// `RunHandle::signal` (§6.1) to route a caller's request to the right
/// running workflow. This is the in-memory stand-in for the engine's
/// `SignalByID` entry point.
#[derive(Clone, Default)]
pub struct SignalRouter {
    senders: Arc<Mutex<HashMap<RunId, Arc<SignalSenders>>>>,
}

impl SignalRouter {
    pub fn new() -> Self {
        SignalRouter::default()
    }

    pub fn register(&self, run_id: RunId, senders: Arc<SignalSenders>) {
        self.senders.lock().expect("signal router lock poisoned").insert(run_id, senders);
    }

    pub fn unregister(&self, run_id: &RunId) {
        self.senders.lock().expect("signal router lock poisoned").remove(run_id);
    }

    pub fn pause(&self, req: PauseRequest) -> Result<(), RuntimeError> {
        self.with_senders(&req.run_id.clone(), |s| s.pause.send(req))
    }

    pub fn resume(&self, req: ResumeRequest) -> Result<(), RuntimeError> {
        self.with_senders(&req.run_id.clone(), |s| s.resume.send(req))
    }

    pub fn provide_clarification(&self, ans: ClarificationAnswer) -> Result<(), RuntimeError> {
        self.with_senders(&ans.run_id.clone(), |s| s.clarification.send(ans))
    }

    pub fn provide_tool_results(&self, res: ExternalToolResults) -> Result<(), RuntimeError> {
        self.with_senders(&res.run_id.clone(), |s| s.external_tool_results.send(res))
    }

    pub fn confirm(&self, dec: ConfirmationDecision) -> Result<(), RuntimeError> {
        self.with_senders(&dec.run_id.clone(), |s| s.confirmation.send(dec))
    }

    fn with_senders(
        &self,
        run_id: &RunId,
        f: impl FnOnce(&SignalSenders) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let guard = self.senders.lock().expect("signal router lock poisoned");
        let senders = guard
            .get(run_id)
            .ok_or_else(|| RuntimeError::AgentNotFound(format!("no running workflow for run {}", run_id)))?;
        f(senders)
    }
}
