//! Progress and observability callbacks.
//!
//! Observers are invoked synchronously from the orchestrator task, so
//! implementations must not block. Use [`ChannelObserver`] to hand events to
//! another task.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::lifecycle::{PhaseState, TransitionRecord};
use crate::warnings::{Severity, Warning};

/// Snapshot sent after every agent completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProgress {
    pub current_agent: String,
    pub success: bool,
    pub completed_count: usize,
    pub total_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_so_far: Option<f64>,
}

/// Receives run progress. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn on_transition(&self, _record: &TransitionRecord) {}

    fn on_batch_start(&self, _batch: usize, _agents: &[String]) {}

    fn on_agent_complete(&self, _progress: &AgentProgress) {}

    fn on_warning(&self, _warning: &Warning) {}
}

/// Logs every callback through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_batch_start(&self, batch: usize, agents: &[String]) {
        info!(batch, agents = ?agents, "Batch started");
    }

    fn on_agent_complete(&self, progress: &AgentProgress) {
        info!(
            agent = %progress.current_agent,
            success = progress.success,
            completed = progress.completed_count,
            total = progress.total_count,
            cost = progress.cost_so_far.unwrap_or_default(),
            "Agent finished"
        );
    }

    fn on_warning(&self, warning: &Warning) {
        match warning.severity {
            Severity::Critical => warn!(
                agent = %warning.agent_name,
                category = %warning.category,
                "CRITICAL: {}",
                warning.title
            ),
            _ => info!(
                agent = %warning.agent_name,
                severity = %warning.severity,
                category = %warning.category,
                "{}",
                warning.title
            ),
        }
    }
}

/// Events forwarded by [`ChannelObserver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Transition {
        from: PhaseState,
        to: PhaseState,
        trigger: String,
    },
    BatchStarted {
        batch: usize,
        agents: Vec<String>,
    },
    AgentCompleted(AgentProgress),
    Warning(Box<Warning>),
}

/// Forwards callbacks onto an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: RunEvent) {
        // Receiver dropped means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl RunObserver for ChannelObserver {
    fn on_transition(&self, record: &TransitionRecord) {
        self.emit(RunEvent::Transition {
            from: record.from,
            to: record.to,
            trigger: record.trigger.clone(),
        });
    }

    fn on_batch_start(&self, batch: usize, agents: &[String]) {
        self.emit(RunEvent::BatchStarted {
            batch,
            agents: agents.to_vec(),
        });
    }

    fn on_agent_complete(&self, progress: &AgentProgress) {
        self.emit(RunEvent::AgentCompleted(progress.clone()));
    }

    fn on_warning(&self, warning: &Warning) {
        self.emit(RunEvent::Warning(Box::new(warning.clone())));
    }
}
