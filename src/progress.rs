//! Progress indicators for convoy apply runs

use colored::Colorize;
use converge::{Action, ActionOutcome, ActionReport, ConfirmCallback, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};

use crate::ui;

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Progress bar plus one line per finished action
pub struct BarProgress {
    bar: Option<ProgressBar>,
    quiet: bool,
    running: Vec<String>,
}

impl BarProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: None,
            quiet,
            running: Vec::new(),
        }
    }

    fn print(&self, line: String) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{line}"),
        }
    }

    fn refresh_message(&self) {
        if let Some(bar) = &self.bar {
            bar.set_message(self.running.join(", "));
        }
    }
}

impl ProgressCallback for BarProgress {
    fn on_run_start(&mut self, total: usize) {
        let bar = if self.quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        self.bar = Some(bar);
    }

    fn on_action_start(&mut self, action: &Action) {
        self.running.push(action.id.clone());
        self.refresh_message();
    }

    fn on_action_complete(&mut self, report: &ActionReport) {
        self.running.retain(|id| id != &report.action_id);
        self.refresh_message();

        let detail = match &report.outcome {
            ActionOutcome::Succeeded => ui::format_millis(report.duration().num_milliseconds())
                .dimmed()
                .to_string(),
            ActionOutcome::Failed { kind, error } => format!("{kind}: {error}").red().to_string(),
            ActionOutcome::Skipped { reason } => reason.dimmed().to_string(),
        };
        if !self.quiet || report.outcome.is_failure() {
            self.print(format!(
                "  {} {:<40} {}",
                ui::outcome_symbol(&report.outcome),
                report.action_id,
                detail
            ));
        }

        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    fn on_run_complete(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Interactive confirmation via dialoguer
pub struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> anyhow::Result<bool> {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        Ok(confirmed)
    }
}
