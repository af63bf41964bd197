//! Terminal rendering of run progress.
//!
//! [`TerminalProgress`] is a [`RunObserver`] that drives `indicatif` bars
//! in full mode, prints one line per event in minimal mode, and emits
//! [`RunEvent`] JSON lines in json mode.

use std::io::Write;
use std::time::Duration;

use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::lifecycle::TransitionRecord;
use crate::orchestrator::RunReport;
use crate::progress::{AgentProgress, RunEvent, RunObserver};
use crate::ui::icons::{BATCH, CHECK, COST, CROSS, PHASE, SPARKLE, STOP, WARNING};
use crate::warnings::{Severity, Warning};

/// Output mode for the terminal UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// Progress bars and colors
    #[default]
    Full,
    /// One line per event
    Minimal,
    /// JSON lines on stdout
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

pub struct TerminalProgress {
    mode: UiMode,
    multi: MultiProgress,
    agent_bar: ProgressBar,
    verbose: bool,
    term: Term,
}

impl TerminalProgress {
    pub fn new(mode: UiMode, verbose: bool) -> Self {
        let multi = MultiProgress::new();
        let agent_bar = if mode == UiMode::Full {
            let bar_style = ProgressStyle::default_bar()
                .template("{prefix:.bold.dim} {spinner} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░");
            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(bar_style);
            bar.set_prefix("Agents");
            bar.set_message("Starting...");
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            mode,
            multi,
            agent_bar,
            verbose,
            term: Term::stdout(),
        }
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }

    /// Print through the bar renderer so lines do not tear the bars.
    fn println(&self, line: String) {
        if self.mode == UiMode::Full {
            if self.multi.println(&line).is_err() {
                eprintln!("{}", line);
            }
        } else {
            let _ = writeln!(&self.term, "{}", line);
        }
    }

    fn emit_json(&self, event: &RunEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    /// Stop the bars and print the outcome of the run.
    pub fn finish(&self, report: &RunReport) {
        self.agent_bar.finish_and_clear();
        if self.mode == UiMode::Json {
            if let Ok(json) = serde_json::to_string(report) {
                let _ = writeln!(&self.term, "{}", json);
            }
            return;
        }

        let icon = if !report.success {
            CROSS
        } else if report.termination.is_early_halt() {
            STOP
        } else {
            CHECK
        };
        self.println(format!(
            "{}Session {} finished: {} ({})",
            icon,
            style(report.session_id).bold(),
            style(&report.termination).yellow(),
            report.final_state
        ));
        if report.from_cache {
            self.println(format!("{}Served from cache", SPARKLE));
        }
        self.println(format!(
            "  {} succeeded, {} failed, {} warnings ({} critical), {} contradictions",
            style(report.succeeded().len()).green(),
            style(report.failed().len()).red(),
            report.warnings.len(),
            report.warnings_at(Severity::Critical),
            report.contradictions.len()
        ));
        self.println(format!(
            "  {}{:.2} in {:.1}s",
            COST,
            report.total_cost,
            report.duration.as_secs_f64()
        ));
    }
}

impl RunObserver for TerminalProgress {
    fn on_transition(&self, record: &TransitionRecord) {
        match self.mode {
            UiMode::Json => self.emit_json(&RunEvent::Transition {
                from: record.from,
                to: record.to,
                trigger: record.trigger.clone(),
            }),
            UiMode::Minimal => self.println(format!("{} -> {}", record.from, record.to)),
            UiMode::Full => {
                if record.to.is_terminal() {
                    self.println(format!("{}{}", STOP, style(record.to).bold()));
                } else {
                    self.println(format!(
                        "{}{} {}",
                        PHASE,
                        style(record.to).cyan().bold(),
                        style(&record.trigger).dim()
                    ));
                }
                self.agent_bar.set_message(record.to.to_string());
            }
        }
    }

    fn on_batch_start(&self, batch: usize, agents: &[String]) {
        match self.mode {
            UiMode::Json => self.emit_json(&RunEvent::BatchStarted {
                batch,
                agents: agents.to_vec(),
            }),
            UiMode::Minimal => self.println(format!("Batch {}: {}", batch, agents.join(", "))),
            UiMode::Full => {
                if self.verbose {
                    self.println(format!(
                        "  {}Batch {}: {}",
                        BATCH,
                        style(batch).yellow(),
                        style(agents.join(", ")).dim()
                    ));
                }
            }
        }
    }

    fn on_agent_complete(&self, progress: &AgentProgress) {
        match self.mode {
            UiMode::Json => self.emit_json(&RunEvent::AgentCompleted(progress.clone())),
            UiMode::Minimal => {
                let mark = if progress.success { "ok" } else { "failed" };
                self.println(format!(
                    "[{}/{}] {} {}",
                    progress.completed_count, progress.total_count, progress.current_agent, mark
                ));
            }
            UiMode::Full => {
                self.agent_bar.set_length(progress.total_count as u64);
                self.agent_bar.set_position(progress.completed_count as u64);
                if !progress.success {
                    self.println(format!(
                        "  {}{}",
                        CROSS,
                        style(&progress.current_agent).red()
                    ));
                } else if self.verbose {
                    self.println(format!("  {}{}", CHECK, progress.current_agent));
                }
                if let Some(cost) = progress.cost_so_far {
                    self.agent_bar
                        .set_message(format!("{} ${:.2}", progress.current_agent, cost));
                }
            }
        }
    }

    fn on_warning(&self, warning: &Warning) {
        match self.mode {
            UiMode::Json => self.emit_json(&RunEvent::Warning(Box::new(warning.clone()))),
            UiMode::Minimal => self.println(format!(
                "{} [{}] {}",
                warning.severity, warning.agent_name, warning.title
            )),
            UiMode::Full => {
                let severity = match warning.severity {
                    Severity::Critical => style(warning.severity.as_str()).red().bold(),
                    Severity::High => style(warning.severity.as_str()).yellow(),
                    Severity::Medium => style(warning.severity.as_str()).dim(),
                };
                self.println(format!(
                    "  {}{} {} {}",
                    WARNING,
                    severity,
                    style(&warning.agent_name).cyan(),
                    warning.title
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ui_mode_parse() {
        assert_eq!("json".parse::<UiMode>().unwrap(), UiMode::Json);
        assert_eq!("MINIMAL".parse::<UiMode>().unwrap(), UiMode::Minimal);
        assert_eq!("anything".parse::<UiMode>().unwrap(), UiMode::Full);
    }

    #[test]
    fn test_minimal_mode_uses_hidden_bar() {
        let ui = TerminalProgress::new(UiMode::Minimal, false);
        assert!(ui.agent_bar.is_hidden());
        assert_eq!(ui.mode(), UiMode::Minimal);
    }
}
