//! Progress display - live spinner driven by execution progress events
//!
//! On a terminal an indicatif spinner shows the latest phase and message.
//! Piped output gets one plain line per noteworthy event instead.

use indicatif::{ProgressBar, ProgressStyle};
use nixmate_common::progress::{ProgressEvent, ProgressEventKind};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Braille spinner frames
const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// One-line description of an event
pub fn describe_event(event: &ProgressEvent) -> String {
    let elapsed = format!("{:.1}s", event.elapsed_ms as f64 / 1000.0);
    let stage = match event.percent {
        Some(pct) => format!("{} {:>3}%", event.phase, pct),
        None => event.phase.to_string(),
    };
    match event.kind {
        ProgressEventKind::Progress | ProgressEventKind::Finished => {
            format!("[{}] {} [{}]", stage, event.message, elapsed)
        }
        ProgressEventKind::Stuck => format!("[STUCK?] {} [{}]", event.message, elapsed),
        ProgressEventKind::Extended => format!("[EXTENDED] {} [{}]", event.message, elapsed),
        ProgressEventKind::RollingBack => format!("[ROLLBACK] {} [{}]", event.message, elapsed),
    }
}

fn create_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_strings(SPINNER_FRAMES)
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message("starting...".to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Consume events until the sender side is dropped
pub fn spawn(mut rx: mpsc::Receiver<ProgressEvent>, quiet: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        if quiet {
            while rx.recv().await.is_some() {}
            return;
        }

        let spinner = std::io::stderr().is_terminal().then(create_spinner);
        while let Some(event) = rx.recv().await {
            let line = describe_event(&event);
            match (&spinner, event.kind) {
                (Some(bar), ProgressEventKind::Progress) => bar.set_message(line),
                (Some(bar), ProgressEventKind::Finished) => bar.finish_and_clear(),
                (Some(bar), _) => bar.println(line.yellow().to_string()),
                (None, ProgressEventKind::Progress) => {}
                (None, _) => eprintln!("{}", line),
            }
        }
        if let Some(bar) = spinner {
            bar.finish_and_clear();
        }
    })
}
