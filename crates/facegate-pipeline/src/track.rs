//! Which face the pipeline is currently following, and whom it last
//! confirmed. Shared by both workers behind one mutex.

use std::time::{Duration, Instant};

/// Result of seeing a face with a given tracker id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Needs recognition.
    New,
    /// Same face as before and its identity is already known; skip it.
    AlreadyTracked,
}

#[derive(Debug)]
pub struct TrackState {
    track_id: Option<i32>,
    last_name: Option<String>,
    last_reset: Option<Instant>,
}

impl Default for TrackState {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackState {
    pub fn new() -> Self {
        Self {
            track_id: None,
            last_name: None,
            last_reset: None,
        }
    }

    /// Forget the tracked id once `window` has passed since the last reset,
    /// so a face standing still is re-recognized periodically.
    pub fn expire_stale(&mut self, now: Instant, window: Duration) {
        let since = *self.last_reset.get_or_insert(now);
        if self.track_id.is_some() && now.saturating_duration_since(since) > window {
            self.track_id = None;
            self.last_reset = Some(now);
        }
    }

    /// Record the tracker id of the face selected in a frame.
    ///
    /// A pending registration or deletion session, or no confirmed name,
    /// forces recognition on every frame and leaves no id tracked.
    pub fn observe(&mut self, track_id: i32, session_pending: bool) -> TrackOutcome {
        if session_pending || self.last_name.is_none() {
            self.track_id = None;
            return TrackOutcome::New;
        }
        if self.track_id == Some(track_id) {
            return TrackOutcome::AlreadyTracked;
        }
        self.track_id = Some(track_id);
        TrackOutcome::New
    }

    /// Remember `name` as the last confirmed identity. Returns `true` when it
    /// differs from the previous one.
    pub fn confirm(&mut self, name: &str) -> bool {
        if self.last_name.as_deref() == Some(name) {
            return false;
        }
        self.last_name = Some(name.to_string());
        true
    }

    pub fn clear_name(&mut self) {
        self.last_name = None;
    }

    /// Drop both the tracked id and the confirmed name.
    pub fn forget(&mut self) {
        self.track_id = None;
        self.last_name = None;
    }

    pub fn track_id(&self) -> Option<i32> {
        self.track_id
    }

    pub fn last_name(&self) -> Option<&str> {
        self.last_name.as_deref()
    }
}
