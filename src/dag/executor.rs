//! Concurrent batch execution.
//!
//! Every agent in a batch runs in its own tokio task under its own timeout,
//! so a panic, a timeout or an error in one agent resolves only that agent's
//! slot. The batch joins on all of them before returning. Fact-bearing
//! results are then submitted to the fact store in batch order, so later
//! batches see a consolidated view.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::agent::{
    Agent, AgentContext, AgentError, AgentErrorKind, AgentRegistry, AgentResult,
};
use crate::dag::scheduler::{Batch, SchedulerConfig};
use crate::dag::state::{BatchReport, RunState};
use crate::facts::FactStore;
use crate::progress::{AgentProgress, RunObserver};

pub struct BatchExecutor {
    config: SchedulerConfig,
    observers: Vec<Arc<dyn RunObserver>>,
}

impl BatchExecutor {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            observers: Vec::new(),
        }
    }

    pub fn with_observers(mut self, observers: Vec<Arc<dyn RunObserver>>) -> Self {
        self.observers = observers;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run one batch against a snapshot of the context.
    ///
    /// `total_count` is the number of agents planned for the whole run and is
    /// only used for progress reporting.
    pub async fn run_batch(
        &self,
        batch: &Batch,
        registry: &AgentRegistry,
        context: AgentContext,
        state: &mut RunState,
        facts: &FactStore,
        total_count: usize,
    ) -> BatchReport {
        let started = Instant::now();
        let subject_id = context.subject.id.clone();
        let context = Arc::new(context);
        let semaphore = self
            .config
            .max_parallel
            .map(|n| Arc::new(Semaphore::new(n)));

        for observer in &self.observers {
            observer.on_batch_start(batch.index, &batch.agents);
        }
        info!(batch = batch.index, kind = ?batch.kind, agents = ?batch.agents, "Running batch");

        let mut in_flight = FuturesUnordered::new();
        let mut immediate = Vec::new();

        for name in &batch.agents {
            if state.contains(name) {
                warn!(agent = %name, "Agent already has a result, not running it again");
                continue;
            }
            let Some(agent) = registry.get(name) else {
                immediate.push(AgentResult::failure(
                    name,
                    AgentError::execution("agent is not registered"),
                    Duration::ZERO,
                ));
                continue;
            };

            let timeout = agent.spec().timeout(self.config.agent_timeout);
            let max_retries = self.config.max_retries;
            let ctx = context.clone();
            let permits = semaphore.clone();
            let handle = tokio::spawn(async move {
                let _permit = match permits {
                    Some(s) => s.acquire_owned().await.ok(),
                    None => None,
                };
                run_with_retries(agent, &ctx, timeout, max_retries).await
            });

            let name = name.clone();
            let launched = Instant::now();
            in_flight.push(async move {
                let joined = handle.await;
                (name, launched.elapsed(), joined)
            });
        }

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut cost = 0.0;

        let mut record = |result: AgentResult, state: &mut RunState| {
            if result.success {
                succeeded.push(result.agent_name.clone());
            } else {
                failed.push(result.agent_name.clone());
            }
            cost += result.cost;
            let progress = AgentProgress {
                current_agent: result.agent_name.clone(),
                success: result.success,
                completed_count: state.len() + 1,
                total_count,
                cost_so_far: Some(state.total_cost() + result.cost),
            };
            if state.insert(result) {
                for observer in &self.observers {
                    observer.on_agent_complete(&progress);
                }
            }
        };

        for result in immediate {
            record(result, state);
        }

        while let Some((name, elapsed, joined)) = in_flight.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    error!(agent = %name, "Agent panicked");
                    AgentResult::failure(
                        &name,
                        AgentError::new(AgentErrorKind::Panicked, panic_message(e)),
                        elapsed,
                    )
                }
                Err(e) => AgentResult::failure(
                    &name,
                    AgentError::execution(format!("agent task cancelled: {}", e)),
                    elapsed,
                ),
            };
            if let Some(err) = &result.error {
                warn!(agent = %name, kind = %err.kind, error = %err.message, "Agent failed");
            } else {
                debug!(agent = %name, ms = result.execution_time_ms, cost = result.cost, "Agent succeeded");
            }
            record(result, state);
        }

        // Submit facts in batch order so the ledger does not depend on
        // completion order.
        let mut contradictions = Vec::new();
        for name in &batch.agents {
            let Some(result) = state.get(name) else {
                continue;
            };
            if !result.success || result.facts.is_empty() {
                continue;
            }
            match facts
                .submit_batch(&subject_id, result.facts.clone(), name)
                .await
            {
                Ok(submissions) => {
                    contradictions.extend(submissions.into_iter().filter_map(|s| s.contradiction));
                }
                Err(e) => {
                    error!(agent = %name, error = %e, "Failed to submit agent facts");
                }
            }
        }

        BatchReport {
            index: batch.index,
            kind: batch.kind,
            succeeded,
            failed,
            cost,
            contradictions,
            duration: started.elapsed(),
        }
    }
}

async fn run_with_retries(
    agent: Arc<dyn Agent>,
    ctx: &AgentContext,
    timeout: Duration,
    max_retries: u32,
) -> AgentResult {
    let name = agent.name().to_string();
    let mut attempt = 0;
    loop {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, agent.run(ctx)).await;
        let elapsed = started.elapsed();
        let error = match outcome {
            Ok(Ok(output)) => {
                return AgentResult::success(&name, output, elapsed).with_retries(attempt);
            }
            Ok(Err(e)) => e,
            Err(_) => AgentError::timeout(timeout),
        };

        let retryable = matches!(
            error.kind,
            AgentErrorKind::Timeout | AgentErrorKind::Execution
        );
        if !retryable || attempt >= max_retries {
            return AgentResult::failure(&name, error, elapsed).with_retries(attempt);
        }
        attempt += 1;
        warn!(agent = %name, attempt, error = %error, "Retrying agent");
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
