//! Monotonic timeline counter.
//!
//! A timepoint is a plain integer: "every submission signalled at or below
//! this value has completed". Zero means "nothing submitted yet".

use crate::diagnostics::{self, GH102};

/// A point on the device timeline.
pub type Timepoint = u64;

/// Issues strictly increasing timepoints for submissions.
#[derive(Debug, Default)]
pub struct Timeline {
    last_flushed: Timepoint,
}

impl Timeline {
    /// Create a timeline with nothing submitted.
    pub const fn new() -> Self {
        Self { last_flushed: 0 }
    }

    /// The value the next submission will signal.
    ///
    /// Does not advance the timeline; call [`Timeline::commit`] once the
    /// submission actually reached the device, so a failed submit never
    /// leaves a timepoint behind that will not signal.
    ///
    /// # Panics
    ///
    /// Panics if the counter is exhausted.
    pub fn next(&self) -> Timepoint {
        let next = self.last_flushed + 1;
        if next == Timepoint::MAX {
            diagnostics::emit(&GH102);
            panic!("upload timeline exhausted");
        }
        next
    }

    /// Record `timepoint` as successfully submitted.
    pub fn commit(&mut self, timepoint: Timepoint) {
        debug_assert!(timepoint > self.last_flushed);
        self.last_flushed = timepoint;
    }

    /// Last timepoint handed to the device.
    pub fn last_flushed(&self) -> Timepoint {
        self.last_flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_does_not_advance() {
        let mut timeline = Timeline::new();
        assert_eq!(timeline.next(), 1);
        assert_eq!(timeline.next(), 1);
        assert_eq!(timeline.last_flushed(), 0);

        timeline.commit(1);
        assert_eq!(timeline.last_flushed(), 1);
        assert_eq!(timeline.next(), 2);
    }

    #[test]
    #[should_panic(expected = "timeline exhausted")]
    fn test_exhaustion_panics() {
        crate::diagnostics::suppress_diagnostics(true);
        let timeline = Timeline { last_flushed: Timepoint::MAX - 1 };
        let _ = timeline.next();
    }
}
