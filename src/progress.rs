use serde::Serialize;
use std::fmt;
use std::time::Instant;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Initializing,
    Research,
    ContentGeneration,
    Finalizing,
    Complete,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Initializing,
        Stage::Research,
        Stage::ContentGeneration,
        Stage::Finalizing,
        Stage::Complete,
    ];

    pub fn index(&self) -> usize {
        Stage::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    pub fn percent(&self) -> f64 {
        self.index() as f64 / Stage::ALL.len() as f64 * 100.0
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Initializing => "Initializing",
            Stage::Research => "Research",
            Stage::ContentGeneration => "Content Generation",
            Stage::Finalizing => "Finalizing",
            Stage::Complete => "Complete",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionSummary {
    pub message: String,
    pub elapsed_secs: f64,
    /// Time spent in each stage, in the order first entered.
    pub stage_timings: Vec<(Stage, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    StageChanged {
        stage: Stage,
        percent: f64,
        elapsed_secs: f64,
        eta_secs: f64,
        message: String,
    },
    Heartbeat {
        stage: Stage,
        elapsed_secs: f64,
        message: String,
    },
    Completed(CompletionSummary),
    Failed {
        stage: Stage,
        elapsed_secs: f64,
        message: String,
    },
}

/// Remaining seconds, extrapolated from progress so far once past 5%.
pub fn estimate_remaining(elapsed_secs: f64, percent: f64, estimated_total_secs: f64) -> f64 {
    if percent > 5.0 {
        let projected_total = elapsed_secs * (100.0 / percent);
        (projected_total - elapsed_secs).max(0.0)
    } else {
        (estimated_total_secs - elapsed_secs).max(0.0)
    }
}

pub struct ProgressTracker {
    started: Instant,
    estimated_total_secs: f64,
    stage: Stage,
    stage_started: Instant,
    reported_percent: f64,
    stage_timings: Vec<(Stage, f64)>,
    finished: bool,
    sender: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressTracker {
    pub fn new(estimated_total_secs: f64, sender: Option<UnboundedSender<ProgressEvent>>) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            estimated_total_secs,
            stage: Stage::Initializing,
            stage_started: now,
            reported_percent: 0.0,
            stage_timings: Vec::new(),
            finished: false,
            sender,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn percent(&self) -> f64 {
        self.reported_percent
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn update_stage(&mut self, stage: Stage, message: &str) {
        if self.finished {
            debug!(%stage, message, "Ignoring stage update after run finished");
            return;
        }
        self.close_current_stage();
        self.stage = stage;

        // A downgrade can re-enter an earlier stage; the bar must not go backwards.
        self.reported_percent = self.reported_percent.max(stage.percent());
        let elapsed_secs = self.elapsed_secs();
        let eta_secs = estimate_remaining(elapsed_secs, self.reported_percent, self.estimated_total_secs);

        self.emit(ProgressEvent::StageChanged {
            stage,
            percent: self.reported_percent,
            elapsed_secs,
            eta_secs,
            message: message.to_string(),
        });
    }

    /// Heartbeat within the current stage.
    pub fn update_progress(&mut self, message: &str) {
        if self.finished {
            debug!(message, "Ignoring heartbeat after run finished");
            return;
        }
        self.emit(ProgressEvent::Heartbeat {
            stage: self.stage,
            elapsed_secs: self.elapsed_secs(),
            message: message.to_string(),
        });
    }

    pub fn complete(&mut self, message: &str) -> Option<CompletionSummary> {
        if self.finished {
            return None;
        }
        self.close_current_stage();
        self.stage = Stage::Complete;
        self.reported_percent = 100.0;
        self.finished = true;

        let summary = CompletionSummary {
            message: message.to_string(),
            elapsed_secs: self.elapsed_secs(),
            stage_timings: self.stage_timings.clone(),
        };
        self.emit(ProgressEvent::Completed(summary.clone()));
        Some(summary)
    }

    pub fn error(&mut self, message: &str) {
        if self.finished {
            return;
        }
        self.close_current_stage();
        self.finished = true;
        self.emit(ProgressEvent::Failed {
            stage: self.stage,
            elapsed_secs: self.elapsed_secs(),
            message: message.to_string(),
        });
    }

    fn close_current_stage(&mut self) {
        let spent = self.stage_started.elapsed().as_secs_f64();
        self.stage_started = Instant::now();
        match self.stage_timings.iter_mut().find(|(s, _)| *s == self.stage) {
            Some((_, total)) => *total += spent,
            None => self.stage_timings.push((self.stage, spent)),
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            // Nobody listening is fine.
            let _ = sender.send(event);
        }
    }
}

// --- Listeners ---

pub trait ProgressListener {
    fn on_stage_change(&mut self, stage: Stage, percent: f64, eta_secs: f64, message: &str);
    fn on_heartbeat(&mut self, message: &str);
    fn on_complete(&mut self, summary: &CompletionSummary);
    fn on_error(&mut self, error: &str);
}

pub fn dispatch(event: &ProgressEvent, listener: &mut dyn ProgressListener) {
    match event {
        ProgressEvent::StageChanged {
            stage,
            percent,
            eta_secs,
            message,
            ..
        } => listener.on_stage_change(*stage, *percent, *eta_secs, message),
        ProgressEvent::Heartbeat { message, .. } => listener.on_heartbeat(message),
        ProgressEvent::Completed(summary) => listener.on_complete(summary),
        ProgressEvent::Failed { message, .. } => listener.on_error(message),
    }
}

/// Feeds every event to `listener` until all senders are dropped.
pub async fn forward_events(
    mut receiver: UnboundedReceiver<ProgressEvent>,
    listener: &mut dyn ProgressListener,
) {
    while let Some(event) = receiver.recv().await {
        dispatch(&event, listener);
    }
}

/// Writes progress to the tracing log.
#[derive(Debug, Default)]
pub struct LoggingListener;

impl ProgressListener for LoggingListener {
    fn on_stage_change(&mut self, stage: Stage, percent: f64, eta_secs: f64, message: &str) {
        info!("[{:>5.1}%] {} - {} (~{:.0}s remaining)", percent, stage, message, eta_secs);
    }

    fn on_heartbeat(&mut self, message: &str) {
        debug!("  {}", message);
    }

    fn on_complete(&mut self, summary: &CompletionSummary) {
        info!("{} in {:.1}s", summary.message, summary.elapsed_secs);
        for (stage, secs) in &summary.stage_timings {
            debug!("  {:<20} {:.1}s", stage.label(), secs);
        }
    }

    fn on_error(&mut self, error: &str) {
        warn!("Generation failed: {}", error);
    }
}
