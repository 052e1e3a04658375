// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0

//! Terminal side of a run: operator prompts and phase progress.

use async_trait::async_trait;
use bringup_core::application::orchestrator::DeploymentObserver;
use bringup_core::application::prompt::OperatorPrompt;
use bringup_core::domain::phase::Phase;
use colored::Colorize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Yes/no questions on the controlling terminal.
///
/// Without a terminal on stdin the answer is `default` (normally "no"), so an
/// unattended run never continues past a failed check silently.
pub struct TerminalPrompt {
    assume: Option<bool>,
    default: bool,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self {
            assume: None,
            default: false,
        }
    }

    /// Answer every question with `answer` without asking.
    pub fn assume(answer: bool) -> Self {
        Self {
            assume: Some(answer),
            default: answer,
        }
    }

    fn answer(&self, question: &str) -> bool {
        if let Some(answer) = self.assume {
            let shown = if answer { "yes" } else { "no" };
            eprintln!("{} {}", question, shown.bold());
            return answer;
        }
        if !std::io::stdin().is_terminal() {
            warn!(answer = self.default, "No terminal to ask: {}", question);
            return self.default;
        }
        match Confirm::new()
            .with_prompt(question)
            .default(self.default)
            .interact()
        {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Prompt failed ({}), answering {}", e, self.default);
                self.default
            }
        }
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperatorPrompt for TerminalPrompt {
    async fn confirm(&self, question: &str) -> bool {
        let question = question.to_string();
        let assume = self.assume;
        let default = self.default;
        // dialoguer blocks on the terminal
        tokio::task::spawn_blocking(move || TerminalPrompt { assume, default }.answer(&question))
            .await
            .unwrap_or(default)
    }
}

/// One spinner line per phase, finished with a ✓ or ✗.
pub struct PhaseProgress {
    current: Mutex<Option<ProgressBar>>,
}

impl PhaseProgress {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    fn take(&self) -> Option<ProgressBar> {
        self.current.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Default for PhaseProgress {
    fn default() -> Self {
        Self::new()
    }
}

fn label(phase: &Phase) -> String {
    format!("[{}/9] {}", phase.ordinal, phase.name)
}

fn elapsed(phase: &Phase) -> String {
    phase
        .duration_ms()
        .map(|ms| format!(" ({:.1}s)", ms as f64 / 1000.0))
        .unwrap_or_default()
}

#[async_trait]
impl DeploymentObserver for PhaseProgress {
    async fn on_phase_start(&self, phase: &Phase) {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(label(phase));
        bar.enable_steady_tick(Duration::from_millis(120));
        if let Ok(mut slot) = self.current.lock() {
            if let Some(previous) = slot.replace(bar) {
                previous.finish_and_clear();
            }
        }
    }

    async fn on_phase_complete(&self, phase: &Phase) {
        let line = format!("{} {}{}", "✓".green(), label(phase), elapsed(phase).dimmed());
        match self.take() {
            Some(bar) => bar.finish_with_message(line),
            None => eprintln!("{}", line),
        }
    }

    async fn on_phase_fail(&self, phase: &Phase, error: &str) {
        let first = error.lines().next().unwrap_or_default();
        let line = format!("{} {}: {}", "✗".red(), label(phase), first.red());
        match self.take() {
            Some(bar) => bar.finish_with_message(line),
            None => eprintln!("{}", line),
        }
    }

    async fn on_rollback_start(&self, backup_dir: &Path) {
        eprintln!(
            "{} Rolling back to {}",
            "↺".yellow(),
            backup_dir.display().to_string().bold()
        );
    }

    async fn on_rollback_complete(&self, error: Option<&str>) {
        match error {
            None => eprintln!("{}", "✓ Rollback complete".green()),
            Some(e) => eprintln!("{} {}", "✗ ROLLBACK FAILED:".red().bold(), e.red()),
        }
    }
}
