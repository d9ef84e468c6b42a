//! Progress reporting for external tool invocations.
//!
//! ffmpeg is run with `-progress pipe:1` which streams `key=value`
//! lines on stdout. The elapsed-time keys are converted into a 0-100
//! percentage against the source duration and forwarded to the owning
//! task through a [`ProgressSink`].

use tokio::sync::mpsc;

/// A single progress update for a task.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub task_id: String,
    pub percent: u8,
}

/// Handle a transform invocation uses to report progress for its task.
#[derive(Clone)]
pub struct ProgressSink {
    task_id: String,
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressSink {
    pub fn new(task_id: impl Into<String>, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self {
            task_id: task_id.into(),
            tx,
        }
    }

    /// A sink that drops every update. Used in tests and for jobs with
    /// no meaningful intermediate progress.
    pub fn noop() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self {
            task_id: String::new(),
            tx,
        }
    }

    /// Report a percentage. Best-effort; a full channel drops the update
    /// rather than blocking the reader loop.
    pub fn report(&self, percent: u8) {
        let _ = self.tx.try_send(ProgressUpdate {
            task_id: self.task_id.clone(),
            percent: percent.min(100),
        });
    }
}

/// Compute a progress percentage from elapsed output time.
///
/// Returns `None` when the source duration is unknown or zero, in which
/// case progress jumps straight from 0 to 100 on completion.
pub fn percent_of(elapsed_secs: f64, total_secs: Option<f64>) -> Option<u8> {
    let total = total_secs?;
    if total <= 0.0 || !elapsed_secs.is_finite() {
        return None;
    }
    let pct = (elapsed_secs / total * 100.0).round();
    Some(pct.clamp(0.0, 100.0) as u8)
}

/// Parse one line of ffmpeg `-progress` output into elapsed seconds.
///
/// ffmpeg emits `out_time_us=`, `out_time_ms=` and `out_time=HH:MM:SS.f`
/// depending on version; any of them is accepted.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" => value.parse::<i64>().ok().map(|us| us as f64 / 1_000_000.0),
        // Despite the name, ffmpeg's out_time_ms is in microseconds.
        "out_time_ms" => value.parse::<i64>().ok().map(|us| us as f64 / 1_000_000.0),
        "out_time" => parse_clock_time(value),
        _ => None,
    }
}

fn parse_clock_time(value: &str) -> Option<f64> {
    let mut parts = value.trim().splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
