use std::collections::VecDeque;

pub mod bpm_log;
pub mod recorder;
mod ringbuffer;
pub mod snapshot;

use ringbuffer::SliceableRingBuffer;
use snapshot::Snapshot;

/// Fan-out of the filtered sample stream. Samples are only ever appended at the back and
/// removed from the front; nothing is modified once stored.
pub struct SampleBuffers {
    /// Drained by the renderer once per tick.
    intake: VecDeque<i32>,
    /// The last full sweep worth of samples, read by the estimator and exports.
    rolling: SliceableRingBuffer<i32>,
    /// Samples of the sweep currently on screen.
    scan: Vec<i32>,
    /// Samples not yet written to disk while recording.
    autosave: Vec<i32>,
    recording: bool,
    last_sweep: Option<Snapshot>,
}

impl SampleBuffers {
    pub fn new(capacity: usize) -> Self {
        Self {
            intake: VecDeque::new(),
            rolling: SliceableRingBuffer::new(capacity, 0),
            scan: Vec::with_capacity(capacity),
            autosave: Vec::new(),
            recording: false,
            last_sweep: None,
        }
    }

    /// Takes effect on the next append.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.rolling.set_capacity(capacity);
    }

    pub fn append(&mut self, samples: &[i32]) {
        if samples.is_empty() {
            return;
        }
        self.intake.extend(samples.iter().copied());
        self.rolling.extend_from_slice(samples);
        self.scan.extend_from_slice(samples);
        if self.recording {
            self.autosave.extend_from_slice(samples);
        }
    }

    pub fn set_recording(&mut self, recording: bool) {
        if recording != self.recording {
            self.autosave.clear();
        }
        self.recording = recording;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn intake_len(&self) -> usize {
        self.intake.len()
    }

    pub fn drain_intake(&mut self) -> Vec<i32> {
        self.intake.drain(..).collect()
    }

    /// Copy of the rolling buffer, oldest first.
    pub fn rolling_snapshot(&self) -> Vec<i32> {
        self.rolling.get_slice().to_vec()
    }

    pub fn rolling_len(&self) -> usize {
        self.rolling.len()
    }

    pub fn scan(&self) -> &[i32] {
        &self.scan
    }

    /// Removes the first `count` samples of the scan buffer; the rest already belong to
    /// the next sweep.
    pub fn take_scan(&mut self, count: usize) -> Vec<i32> {
        let count = count.min(self.scan.len());
        let rest = self.scan.split_off(count);
        std::mem::replace(&mut self.scan, rest)
    }

    /// Drops everything waiting to be drawn, along with the scan it would have joined.
    pub fn discard_pending(&mut self) {
        self.intake.clear();
        self.scan.clear();
    }

    /// Starts a new scan from whatever the renderer has not drawn yet.
    pub fn restart_scan(&mut self) {
        self.scan.clear();
        self.scan.extend(self.intake.iter().copied());
    }

    pub fn autosave_len(&self) -> usize {
        self.autosave.len()
    }

    pub fn take_autosave_chunk(&mut self, count: usize) -> Option<Vec<i32>> {
        if count == 0 || self.autosave.len() < count {
            return None;
        }
        Some(self.autosave.drain(..count).collect())
    }

    pub fn clear_autosave(&mut self) {
        self.autosave.clear();
    }

    pub fn last_sweep(&self) -> Option<&Snapshot> {
        self.last_sweep.as_ref()
    }

    pub fn set_last_sweep(&mut self, snapshot: Snapshot) {
        self.last_sweep = Some(snapshot);
    }

    /// Empties the live buffers, keeping the last sweep and any unsaved recording.
    pub fn clear_live(&mut self) {
        self.intake.clear();
        self.rolling.clear();
        self.scan.clear();
    }

    pub fn clear(&mut self) {
        self.clear_live();
        self.autosave.clear();
        self.last_sweep = None;
    }
}
