//! Run and resume entry points.
//!
//! A run walks the phases in order. Inside each phase the agents are
//! planned into dependency batches and executed batch by batch; after every
//! batch the warnings are evaluated, a checkpoint is written and the
//! circuit breaker decides whether the next batch may start.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::{RunConfig, RunContext};
use super::report::RunReport;
use crate::agent::{AgentContext, AgentRegistry, AgentSpec};
use crate::checkpoint::{Checkpoint, RecoveryPlan};
use crate::dag::{BatchExecutor, DagBuilder, DagScheduler, RunState};
use crate::errors::{OrchestratorError, RecoveryError, StorageError};
use crate::facts::Contradiction;
use crate::lifecycle::{AnalysisPhase, PhaseMachine, PhaseState, should_debate};
use crate::session::{AnalysisSession, RunSummary, Subject, TerminationReason};
use crate::storage::CachedRun;
use crate::warnings::{CircuitDecision, Warning, WarningSummary};

/// Mutable state of one run in progress.
struct ActiveRun {
    session: AnalysisSession,
    machine: PhaseMachine,
    state: RunState,
    warnings: Vec<Warning>,
    contradictions: Vec<Contradiction>,
    /// Planned agents decided against (debate after a single finding).
    skipped: BTreeSet<String>,
    enrichment: Value,
    next_batch: usize,
    start_time: DateTime<Utc>,
    started: Instant,
}

pub struct Orchestrator {
    ctx: RunContext,
}

impl Orchestrator {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Run a fresh analysis of `subject`.
    pub async fn run_analysis(
        &self,
        subject: Subject,
        config: &RunConfig,
    ) -> Result<RunReport, OrchestratorError> {
        let started = Instant::now();

        if let Some(report) = self.cached_report(&subject, config, started).await {
            return Ok(report);
        }

        let planned = self.ctx.registry.planned(config.mode);
        let session = AnalysisSession::new(subject, config.mode, planned.len());
        self.ctx.sessions.create_session(&session).await?;
        info!(
            session = %session.id,
            subject = %session.subject_id,
            mode = %config.mode,
            agents = planned.len(),
            "Starting analysis"
        );

        let start_time = session.started_at;
        let initial = Checkpoint::new(
            session.id,
            PhaseState::Init,
            0,
            &Default::default(),
            planned,
            0.0,
            start_time,
        );
        if let Err(e) = self.ctx.checkpoints.save(&initial).await {
            error!(session = %session.id, error = %e, "Failed to write initial checkpoint");
        }

        let enrichment = self.enrich(&session.subject).await;
        let machine = PhaseMachine::new(session.id, self.ctx.sessions.clone())
            .with_observers(self.ctx.observers.clone());
        let mut run = ActiveRun {
            session,
            machine,
            state: RunState::new(),
            warnings: Vec::new(),
            contradictions: Vec::new(),
            skipped: BTreeSet::new(),
            enrichment,
            next_batch: 0,
            start_time,
            started,
        };

        let termination = self.drive(&mut run, config).await?;
        Ok(self.finish(run, termination).await)
    }

    /// Resume an interrupted session from its latest checkpoint.
    ///
    /// A session without a usable checkpoint is marked failed and reported
    /// with [`TerminationReason::RecoveryFailed`]; it is never restarted from
    /// scratch. Schema drift is returned as a fatal error and leaves the
    /// session untouched.
    pub async fn resume_session(
        &self,
        session_id: Uuid,
        config: &RunConfig,
    ) -> Result<RunReport, OrchestratorError> {
        let started = Instant::now();
        let session = self
            .ctx
            .sessions
            .get_session(session_id)
            .await?
            .ok_or(StorageError::SessionNotFound(session_id))?;
        if session.is_terminal() {
            return Err(RecoveryError::AlreadyTerminal(session_id, session.phase_state).into());
        }

        let config = RunConfig {
            mode: session.mode,
            ..config.clone()
        };
        let planned = self.ctx.registry.planned(session.mode);
        let checkpoint = self.ctx.checkpoints.latest(session_id).await?;

        let plan = match RecoveryPlan::build(session_id, checkpoint, &planned, &self.ctx.registry)
        {
            Ok(plan) => plan,
            Err(e @ (RecoveryError::NoCheckpoint(_) | RecoveryError::InvalidCheckpoint { .. })) => {
                warn!(session = %session_id, error = %e, "Session cannot be recovered, marking failed");
                return Ok(self.fail_unrecoverable(session, e.to_string(), started).await);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            session = %session_id,
            state = %plan.state,
            pending = ?plan.pending,
            "Resuming session"
        );

        let enrichment = self.enrich(&session.subject).await;
        let machine = PhaseMachine::restore(session_id, plan.state, self.ctx.sessions.clone())
            .with_observers(self.ctx.observers.clone());
        let state = RunState::restore(plan.results, plan.total_cost);
        // Rule warnings are rebuilt from the restored results; contradiction
        // warnings come back from the checkpointed contradictions.
        let mut warnings = self.ctx.evaluator.evaluate_all(state.results().values());
        warnings.extend(plan.contradictions.iter().map(Warning::from_contradiction));

        let mut run = ActiveRun {
            session,
            machine,
            state,
            warnings,
            contradictions: plan.contradictions,
            skipped: plan.skipped.into_iter().collect(),
            enrichment,
            next_batch: plan.batch_index,
            start_time: plan.start_time,
            started,
        };

        let termination = self.drive(&mut run, &config).await?;
        Ok(self.finish(run, termination).await)
    }

    /// Resume every non-terminal session. Fatal errors stop the sweep;
    /// anything else is logged and the next session is tried.
    pub async fn recover_all(&self, config: &RunConfig) -> Result<Vec<RunReport>, OrchestratorError> {
        let sessions = self.ctx.sessions.list_sessions().await?;
        let interrupted: Vec<Uuid> = sessions
            .iter()
            .filter(|s| !s.is_terminal())
            .map(|s| s.id)
            .collect();
        info!(count = interrupted.len(), "Recovering interrupted sessions");

        let mut reports = Vec::new();
        for id in interrupted {
            match self.resume_session(id, config).await {
                Ok(report) => reports.push(report),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => error!(session = %id, error = %e, "Failed to recover session"),
            }
        }
        Ok(reports)
    }

    async fn cached_report(
        &self,
        subject: &Subject,
        config: &RunConfig,
        started: Instant,
    ) -> Option<RunReport> {
        if config.force_refresh {
            return None;
        }
        let cache = self.ctx.cache.as_ref()?;
        let fingerprint = subject.fingerprint();
        match cache.lookup(&fingerprint, config.mode, self.ctx.cache_ttl).await {
            Ok(Some(cached)) => {
                info!(
                    subject = %subject.id,
                    session = %cached.session_id,
                    "Serving analysis from run cache"
                );
                Some(RunReport {
                    session_id: cached.session_id,
                    success: cached.summary.success,
                    termination: cached.summary.termination,
                    final_state: PhaseState::Completed,
                    results: cached.results,
                    warnings: Vec::new(),
                    contradictions: Vec::new(),
                    total_cost: 0.0,
                    from_cache: true,
                    duration: started.elapsed(),
                })
            }
            Ok(None) => None,
            Err(e) => {
                warn!(subject = %subject.id, error = %e, "Run cache lookup failed, running fresh");
                None
            }
        }
    }

    async fn enrich(&self, subject: &Subject) -> Value {
        match self.ctx.enrichment.enrich(subject).await {
            Ok(value) => value,
            Err(e) => {
                warn!(subject = %subject.id, error = %e, "Enrichment failed, continuing without it");
                Value::Null
            }
        }
    }

    async fn drive(
        &self,
        run: &mut ActiveRun,
        config: &RunConfig,
    ) -> Result<TerminationReason, OrchestratorError> {
        let registry = &self.ctx.registry;
        let mode = run.session.mode;
        let breaker = config.circuit();
        let executor =
            BatchExecutor::new(self.ctx.scheduler.clone()).with_observers(self.ctx.observers.clone());
        let planned = registry.planned(mode);
        let unplanned: BTreeSet<String> = registry
            .names()
            .into_iter()
            .filter(|n| !planned.contains(n))
            .collect();

        for phase in AnalysisPhase::ALL {
            if !mode.includes(phase) {
                continue;
            }
            let current = run.machine.state();
            if AnalysisPhase::from_state(current).is_some_and(|c| phase < c) {
                // A resumed run already past debate never starts it late.
                if phase == AnalysisPhase::Debate {
                    let unrun = unrun_debate_agents(registry, &run.state);
                    run.skipped.extend(unrun);
                }
                continue;
            }

            if phase == AnalysisPhase::Debate && current != PhaseState::Debate {
                let findings = findings(registry.specs(), &run.state);
                if !should_debate(findings, mode) {
                    info!(session = %run.session.id, findings, "Skipping debate");
                    let unrun = unrun_debate_agents(registry, &run.state);
                    run.skipped.extend(unrun);
                    continue;
                }
            }

            if current != phase.state() {
                run.machine.enter(phase).await?;
            }

            // Leftovers from earlier phases (agents added since a checkpoint)
            // run with the current phase.
            let specs: Vec<AgentSpec> = registry
                .specs()
                .into_iter()
                .filter(|s| s.phase <= phase && mode.includes(s.phase))
                .filter(|s| !run.state.contains(&s.name))
                .filter(|s| !run.skipped.contains(&s.name) && !unplanned.contains(&s.name))
                .collect();
            if specs.is_empty() {
                debug!(session = %run.session.id, phase = %phase, "No agents to run in phase");
                continue;
            }

            let satisfied: BTreeSet<String> = run
                .state
                .results()
                .keys()
                .cloned()
                .chain(run.skipped.iter().cloned())
                .chain(unplanned.iter().cloned())
                .collect();
            let graph = DagBuilder::new(specs).with_satisfied(satisfied).build()?;
            let plan = DagScheduler::new(graph).plan(run.next_batch);
            info!(
                session = %run.session.id,
                phase = %phase,
                batches = plan.len(),
                agents = plan.agent_count(),
                "Planned phase"
            );

            for batch in &plan.batches {
                if let CircuitDecision::Halt(reason) = breaker.check_cost(run.state.total_cost()) {
                    return Ok(reason);
                }

                let facts = match self.ctx.facts.current(&run.session.subject_id).await {
                    Ok(facts) => facts,
                    Err(e) => {
                        error!(session = %run.session.id, error = %e, "Failed to read facts, running batch without them");
                        Vec::new()
                    }
                };
                let context = AgentContext {
                    subject: run.session.subject.clone(),
                    mode,
                    phase,
                    results: run.state.results().clone(),
                    facts,
                    enrichment: run.enrichment.clone(),
                };

                let report = executor
                    .run_batch(
                        batch,
                        registry,
                        context,
                        &mut run.state,
                        &self.ctx.facts,
                        planned.len(),
                    )
                    .await;

                let mut batch_warnings = self.ctx.evaluator.evaluate_all(
                    report.succeeded.iter().filter_map(|n| run.state.get(n)),
                );
                batch_warnings.extend(report.contradictions.iter().map(Warning::from_contradiction));
                for warning in &batch_warnings {
                    for observer in &self.ctx.observers {
                        observer.on_warning(warning);
                    }
                }
                run.contradictions.extend(report.contradictions);
                run.next_batch = batch.index + 1;

                self.checkpoint(run, &planned).await;

                let summary = WarningSummary::from_warnings(&batch_warnings);
                run.warnings.extend(batch_warnings);
                if let CircuitDecision::Halt(reason) = breaker.check_warnings(&summary) {
                    return Ok(reason);
                }
            }
        }

        Ok(TerminationReason::Completed)
    }

    /// Write the batch-boundary checkpoint and session progress. Failures
    /// are logged; the run continues with reduced durability.
    async fn checkpoint(&self, run: &mut ActiveRun, planned: &[String]) {
        let pending: Vec<String> = planned
            .iter()
            .filter(|n| !run.state.contains(n) && !run.skipped.contains(*n))
            .cloned()
            .collect();
        let skipped: Vec<String> = planned
            .iter()
            .filter(|n| run.skipped.contains(*n))
            .cloned()
            .collect();
        let checkpoint = Checkpoint::new(
            run.session.id,
            run.machine.state(),
            run.next_batch,
            run.state.results(),
            pending,
            run.state.total_cost(),
            run.start_time,
        )
        .with_skipped(skipped)
        .with_contradictions(run.contradictions.clone());
        if let Err(e) = self.ctx.checkpoints.save(&checkpoint).await {
            error!(session = %run.session.id, error = %e, "Failed to write checkpoint");
        }

        run.session.phase_state = run.machine.state();
        run.session.completed_agents = run.state.len();
        run.session.total_cost = run.state.total_cost();
        if let Err(e) = self.ctx.sessions.update_session(&run.session).await {
            error!(session = %run.session.id, error = %e, "Failed to update session progress");
        }
    }

    async fn finish(&self, mut run: ActiveRun, termination: TerminationReason) -> RunReport {
        let registry = &self.ctx.registry;
        let required_failed: Vec<String> = run
            .state
            .failed()
            .into_iter()
            .filter(|r| registry.is_required(&r.agent_name))
            .map(|r| r.agent_name.clone())
            .collect();

        // Only required-agent failures make a run unsuccessful; a halt keeps
        // its own termination reason either way.
        let success = required_failed.is_empty();
        let termination = match termination {
            TerminationReason::Completed if !success => TerminationReason::RequiredAgentsFailed {
                agents: required_failed.clone(),
            },
            other => other,
        };

        if success {
            run.machine.complete(termination.label()).await;
        } else {
            let reason = match &termination {
                TerminationReason::RequiredAgentsFailed { .. } => termination.to_string(),
                halt => format!("{} after required agents failed: {}", halt, required_failed.join(", ")),
            };
            run.machine.fail(&reason).await;
        }

        let summary = WarningSummary::from_warnings(&run.warnings);
        let duration = run.started.elapsed();
        let run_summary = RunSummary {
            success,
            termination: termination.clone(),
            succeeded: run.state.succeeded(),
            failed: run
                .state
                .failed()
                .into_iter()
                .map(|r| r.agent_name.clone())
                .collect(),
            critical_warnings: summary.critical,
            high_warnings: summary.high,
            contradictions: run.contradictions.len(),
            total_cost: run.state.total_cost(),
            duration_ms: duration.as_millis() as u64,
        };

        run.session.phase_state = run.machine.state();
        run.session.completed_agents = run.state.len();
        run.session.finish(run_summary.clone());
        if let Err(e) = self.ctx.sessions.update_session(&run.session).await {
            error!(session = %run.session.id, error = %e, "Failed to persist run summary");
        }

        if success
            && termination == TerminationReason::Completed
            && let Some(cache) = &self.ctx.cache
        {
            let cached = CachedRun {
                fingerprint: run.session.fingerprint.clone(),
                mode: run.session.mode,
                session_id: run.session.id,
                summary: run_summary,
                results: run.state.results().clone(),
                stored_at: Utc::now(),
            };
            if let Err(e) = cache.store(&cached).await {
                warn!(session = %run.session.id, error = %e, "Failed to store run in cache");
            }
        }

        info!(
            session = %run.session.id,
            termination = %termination,
            state = %run.machine.state(),
            cost = run.state.total_cost(),
            "Analysis finished"
        );

        RunReport {
            session_id: run.session.id,
            success,
            termination,
            final_state: run.machine.state(),
            total_cost: run.state.total_cost(),
            results: run.state.into_results(),
            warnings: run.warnings,
            contradictions: run.contradictions,
            from_cache: false,
            duration,
        }
    }

    async fn fail_unrecoverable(
        &self,
        mut session: AnalysisSession,
        message: String,
        started: Instant,
    ) -> RunReport {
        let mut machine = PhaseMachine::restore(session.id, session.phase_state, self.ctx.sessions.clone())
            .with_observers(self.ctx.observers.clone());
        machine.fail(&message).await;

        let termination = TerminationReason::RecoveryFailed { message };
        session.phase_state = machine.state();
        session.finish(RunSummary {
            success: false,
            termination: termination.clone(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            critical_warnings: 0,
            high_warnings: 0,
            contradictions: 0,
            total_cost: session.total_cost,
            duration_ms: 0,
        });
        if let Err(e) = self.ctx.sessions.update_session(&session).await {
            error!(session = %session.id, error = %e, "Failed to mark session failed");
        }

        RunReport {
            session_id: session.id,
            success: false,
            termination,
            final_state: machine.state(),
            results: Default::default(),
            warnings: Vec::new(),
            contradictions: Vec::new(),
            total_cost: session.total_cost,
            from_cache: false,
            duration: started.elapsed(),
        }
    }
}

fn unrun_debate_agents(registry: &AgentRegistry, state: &RunState) -> Vec<String> {
    registry
        .for_phase(AnalysisPhase::Debate)
        .iter()
        .map(|a| a.name().to_string())
        .filter(|name| !state.contains(name))
        .collect()
}

/// Successful analysis-phase results.
fn findings(specs: Vec<AgentSpec>, state: &RunState) -> usize {
    specs
        .iter()
        .filter(|s| s.phase == AnalysisPhase::Analysis)
        .filter(|s| state.get(&s.name).is_some_and(|r| r.success))
        .count()
}
