//! Real-time replay of a recording
//!
//! Record times are shifted so the first one lines up with the moment
//! playback starts. A record whose time has already passed is skipped
//! rather than emitted late, so a slow consumer falls behind by dropping
//! samples instead of drifting.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::RecordingError;
use crate::recording::{DataRecord, RecordingReader};

/// Outcome of a playback run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub played: u64,
    pub skipped: u64,
}

/// Paces records from a [`RecordingReader`] against a [`Clock`]
pub struct Playback<C: Clock = SystemClock> {
    clock: C,
    stop: Option<Arc<AtomicBool>>,
}

impl Default for Playback<SystemClock> {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

impl<C: Clock> Playback<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, stop: None }
    }

    /// End playback early once `stop` is set
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Replay every record through `emit`, each at its rebased time
    ///
    /// Records arrive at `emit` with their timestamps already rebased. An
    /// error from the file or from `emit` ends playback.
    pub fn run<R, F, E>(&self, reader: RecordingReader<R>, mut emit: F) -> Result<PlaybackStats, E>
    where
        R: Read,
        F: FnMut(&DataRecord) -> Result<(), E>,
        E: From<RecordingError>,
    {
        let offset = self.clock.now() - reader.header().timestamp;
        info!(
            "Playing back recording taken at {:.3} (offset {:.3}s)",
            reader.header().timestamp,
            offset
        );

        let mut stats = PlaybackStats::default();
        for record in reader {
            if self.stopped() {
                debug!("Playback stopped");
                break;
            }
            let mut record = record?;
            let recorded_at = record.timestamp;
            record.timestamp += offset;
            if !record.timestamp.is_finite() {
                return Err(RecordingError::InvalidTimestamp(recorded_at).into());
            }

            let now = self.clock.now();
            if record.timestamp < now {
                if stats.skipped == 0 {
                    warn!("Skipping records to catch up");
                }
                stats.skipped += 1;
                continue;
            }
            let delay = Duration::try_from_secs_f64(record.timestamp - now)
                .map_err(|_| RecordingError::InvalidTimestamp(recorded_at))?;
            self.clock.sleep(delay);
            emit(&record)?;
            stats.played += 1;
        }

        if stats.skipped > 0 {
            warn!("Skipped {} records during playback", stats.skipped);
        }
        info!("Finished playback of {} records", stats.played);
        Ok(stats)
    }

    fn stopped(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|stop| stop.load(Ordering::Relaxed))
    }
}
