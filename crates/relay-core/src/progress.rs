//! Throttled transfer progress.
//!
//! Byte samples arrive over a channel from a download; [`ProgressReporter`] turns them
//! into status edits, at most one per bucket, so the edit rate stays far below the
//! platform's limits.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{sync::mpsc, time::Instant};

use crate::{domain::MessageRef, messaging::port::MessagingPort};

const BAR_CELLS: u32 = 10;

/// One raw byte-transfer sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressSample {
    pub done: u64,
    pub total: u64,
}

/// A progress update worth showing to the user.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub bucket: u32,
    /// Bytes per second.
    pub speed: f64,
    pub eta: Duration,
}

impl ProgressUpdate {
    pub fn is_complete(&self) -> bool {
        self.percent >= 100.0
    }
}

/// Decide whether a sample produces an update.
///
/// Emits when the bucket moved forward past `previous` or the transfer is complete.
/// A zero `total` counts as complete.
pub fn evaluate(
    done: u64,
    total: u64,
    elapsed: Duration,
    previous: Option<u32>,
    bucket_width: u32,
) -> Option<ProgressUpdate> {
    let width = bucket_width.clamp(1, 100);
    let percent = if total == 0 {
        100.0
    } else {
        (done as f64 / total as f64 * 100.0).min(100.0)
    };
    let bucket = ((percent / width as f64).floor() as u32) * width;

    let complete = percent >= 100.0;
    let advanced = previous.map_or(true, |prev| bucket > prev);
    if !advanced && !complete {
        return None;
    }

    let secs = elapsed.as_secs_f64();
    let speed = if secs > f64::EPSILON {
        done as f64 / secs
    } else {
        0.0
    };
    let remaining = total.saturating_sub(done) as f64;
    let eta = if speed > 0.0 {
        Duration::from_secs_f64(remaining / speed)
    } else {
        Duration::ZERO
    };

    Some(ProgressUpdate {
        percent,
        bucket,
        speed,
        eta,
    })
}

/// `MM:SS`, or `H:MM:SS` past an hour.
pub fn format_eta(eta: Duration) -> String {
    let total = eta.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

/// Status message body for an update (Telegram HTML).
pub fn render(update: &ProgressUpdate) -> String {
    let filled = ((update.percent / 100.0 * BAR_CELLS as f64).floor() as u32).min(BAR_CELLS);
    let bar = "🟢".repeat(filled as usize) + &"🔴".repeat((BAR_CELLS - filled) as usize);
    let mb_per_sec = update.speed / (1024.0 * 1024.0);

    format!(
        "<i><b>Transferring...</b></i>\n\n{bar}\n\n📊 <b>Completed</b>: {:.2}%\n🚀 <b>Speed</b>: {mb_per_sec:.2} MB/s\n⏳ <b>ETA</b>: {}",
        update.percent,
        format_eta(update.eta)
    )
}

#[derive(Clone, Copy, Debug)]
struct Tracked {
    last_bucket: Option<u32>,
    started_at: Instant,
}

/// Tracks the last reported bucket per status message and performs the edits.
pub struct ProgressReporter {
    messenger: Arc<dyn MessagingPort>,
    bucket_width: u32,
    samples: Mutex<HashMap<MessageRef, Tracked>>,
}

impl ProgressReporter {
    pub fn new(messenger: Arc<dyn MessagingPort>, bucket_width: u32) -> Self {
        Self {
            messenger,
            bucket_width,
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Record a sample for `status` and return the update to show, if any.
    pub fn observe_at(
        &self,
        status: &MessageRef,
        sample: ProgressSample,
        now: Instant,
    ) -> Option<ProgressUpdate> {
        let mut map = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        let tracked = map.entry(status.clone()).or_insert(Tracked {
            last_bucket: None,
            started_at: now,
        });

        let update = evaluate(
            sample.done,
            sample.total,
            now.saturating_duration_since(tracked.started_at),
            tracked.last_bucket,
            self.bucket_width,
        )?;

        tracked.last_bucket = Some(update.bucket);
        if update.is_complete() {
            map.remove(status);
        }
        Some(update)
    }

    /// Drop bookkeeping for `status` (task teardown).
    pub fn forget(&self, status: &MessageRef) {
        self.samples
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(status);
    }

    pub fn is_tracking(&self, status: &MessageRef) -> bool {
        self.samples
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(status)
    }

    /// Consume samples until the sender side is dropped, editing `status` as buckets advance.
    pub async fn drain(&self, status: &MessageRef, mut rx: mpsc::Receiver<ProgressSample>) {
        while let Some(sample) = rx.recv().await {
            let Some(update) = self.observe_at(status, sample, Instant::now()) else {
                continue;
            };
            // A failed edit (usually a flood wait) is simply skipped; the next bucket retries.
            if let Err(e) = self.messenger.edit_html(status, &render(&update)).await {
                tracing::debug!(error = %e, bucket = update.bucket, "progress edit deferred");
            }
        }
        self.forget(status);
    }
}
