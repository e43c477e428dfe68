//! Colored output helpers for the CLI.

use crate::aggregator::AgentReport;
use crate::runner::RunOutcome;
use crate::types::AgentStatus;
use owo_colors::OwoColorize;

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    /// Print a success message with a checkmark
    pub fn success(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "✓".green().bold(), message.green());
        } else {
            println!("  [OK] {}", message);
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print the end-of-run summary: one line per agent per repetition.
    pub fn summary(&self, outcome: &RunOutcome) {
        println!();
        self.info(&format!(
            "Run {} ({})",
            outcome.run_id,
            outcome.status.as_str()
        ));
        for (index, report) in outcome.reports.iter().enumerate() {
            if outcome.reports.len() > 1 {
                self.info(&format!(
                    "Repetition {}/{} ({:.1}s)",
                    index + 1,
                    outcome.reports.len(),
                    report.total_seconds
                ));
            }
            for agent in &report.agents {
                self.agent_line(agent);
            }
        }
        self.info(&format!("{} results stored", outcome.stored_results));
    }

    fn agent_line(&self, report: &AgentReport) {
        let line = format!(
            "{}: {} ({} results, {:.1}s)",
            report.agent,
            report.status,
            report.results.len(),
            report.duration_seconds
        );
        match report.status {
            AgentStatus::Success => self.success(&line),
            AgentStatus::PartialError => {
                let detail = report.error.as_deref().unwrap_or("unknown");
                self.warning(&format!("{} - {}", line, detail));
            }
            AgentStatus::Error => {
                let detail = report.error.as_deref().unwrap_or("unknown");
                self.error(&format!("{} - {}", line, detail));
            }
        }
    }
}
