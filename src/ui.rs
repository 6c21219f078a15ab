//! Terminal feedback for the daemon: start-up stages and a face status badge.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::session::StatsSnapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = if self.pretty() {
            let spinner = spinner("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            Some(spinner)
        } else {
            eprintln!("==> {}", name);
            None
        };
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
        }
    }

    pub fn badge(&self) -> StatusBadge {
        StatusBadge {
            spinner: self.pretty().then(|| spinner("{spinner} {msg}")),
            last: None,
        }
    }
}

fn spinner(template: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style =
        ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

/// "Face detected" indicator.
///
/// Pretty mode keeps a live line with the request counters; plain mode
/// prints only when the status flips.
pub struct StatusBadge {
    spinner: Option<ProgressBar>,
    last: Option<bool>,
}

impl StatusBadge {
    pub fn update(&mut self, face_detected: bool, stats: &StatsSnapshot) {
        let text = badge_text(face_detected);
        match &self.spinner {
            Some(spinner) => spinner.set_message(format!(
                "{}  requests={} detections={} renders={}",
                text, stats.requests, stats.detections, stats.renders
            )),
            None if self.last != Some(face_detected) => eprintln!("[{}]", text),
            None => {}
        }
        self.last = Some(face_detected);
    }

    pub fn finish(self) {
        if let Some(spinner) = self.spinner {
            spinner.finish_and_clear();
        }
    }
}

pub fn badge_text(face_detected: bool) -> &'static str {
    if face_detected {
        "face detected"
    } else {
        "no face"
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
