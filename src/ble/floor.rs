//! Current-floor inference from floor-tagged samples.
//!
//! The tracker flips to a new floor once that floor has been seen in
//! `required` consecutive samples. With `required == 1` a single sample is
//! enough, which favors responsiveness over stability; raise it to debounce
//! flapping between beacons near a stairwell.

use std::fmt;

use crate::models::FloorKey;

pub type FloorCallback = Box<dyn FnMut(FloorKey) + Send>;

// ---

pub struct FloorTracker {
    // ---
    current: Option<FloorKey>,
    candidate: Option<FloorKey>,
    streak: u32,
    required: u32,
    on_change: Option<FloorCallback>,
}

impl FloorTracker {
    // ---
    /// Create a tracker that needs `required` consecutive samples to flip.
    /// Zero is treated as one.
    pub fn new(required: u32) -> Self {
        Self {
            current: None,
            candidate: None,
            streak: 0,
            required: required.max(1),
            on_change: None,
        }
    }

    /// Register the transition callback, replacing any previous one.
    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: FnMut(FloorKey) + Send + 'static,
    {
        self.on_change = Some(Box::new(callback));
        self
    }

    pub fn current(&self) -> Option<FloorKey> {
        self.current
    }

    /// Feed the floor of one accepted sample.
    ///
    /// Returns the new floor when this sample completes a transition; the
    /// callback fires exactly once per transition.
    pub fn observe(&mut self, floor: FloorKey) -> Option<FloorKey> {
        // ---
        if self.current == Some(floor) {
            self.candidate = None;
            self.streak = 0;
            return None;
        }

        if self.candidate == Some(floor) {
            self.streak += 1;
        } else {
            self.candidate = Some(floor);
            self.streak = 1;
        }

        if self.streak < self.required {
            return None;
        }

        tracing::info!(from = ?self.current, to = %floor, "floor transition");
        self.current = Some(floor);
        self.candidate = None;
        self.streak = 0;

        if let Some(callback) = self.on_change.as_mut() {
            callback(floor);
        }
        Some(floor)
    }
}

impl fmt::Debug for FloorTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FloorTracker")
            .field("current", &self.current)
            .field("candidate", &self.candidate)
            .field("streak", &self.streak)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}
