//! Relaxed counters behind the heap and queue statistics.
//!
//! Statistics are read without taking the owning mutex, so a snapshot may
//! mix values from slightly different moments.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing event counter.
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Count one event.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Count `value` units (bytes, usually).
    pub fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    /// Current total.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Bytes currently handed out, with a high-water mark.
#[derive(Debug, Default)]
pub struct ByteGauge {
    current: AtomicU64,
    peak: AtomicU64,
}

impl ByteGauge {
    /// Record `bytes` handed out.
    pub fn grow(&self, bytes: u64) {
        let now = self.current.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.peak.fetch_max(now, Ordering::Relaxed);
    }

    /// Record `bytes` given back.
    pub fn shrink(&self, bytes: u64) {
        let prev = self.current.fetch_sub(bytes, Ordering::Relaxed);
        debug_assert!(prev >= bytes, "gauge underflow: {} - {}", prev, bytes);
    }

    /// Bytes currently out.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Most bytes ever out at once.
    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = AtomicCounter::default();
        counter.increment();
        counter.add(4);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn test_gauge_tracks_peak() {
        let gauge = ByteGauge::default();
        gauge.grow(100);
        gauge.grow(50);
        gauge.shrink(120);
        gauge.grow(10);
        assert_eq!(gauge.current(), 40);
        assert_eq!(gauge.peak(), 150);
    }
}
