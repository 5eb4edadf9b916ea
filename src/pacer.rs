//! Real-time pacing
//!
//! Playback waits between frames so that the engine sees them at the
//! original capture cadence, minus the time it spent on the last one.

use std::time::Duration;

/// Delay to insert after processing frame `index`.
///
/// The reference gap is the distance to the next capture, or to the
/// previous one for the last frame of a sequence.
pub fn delay_before(index: usize, timestamps: &[f64], processing: Duration) -> Duration {
    let gap = if index + 1 < timestamps.len() {
        timestamps[index + 1] - timestamps[index]
    } else if index > 0 && index < timestamps.len() {
        timestamps[index] - timestamps[index - 1]
    } else {
        0.0
    };
    let wait = gap - processing.as_secs_f64();
    if wait > 0.0 {
        Duration::from_secs_f64(wait)
    } else {
        Duration::ZERO
    }
}

pub trait Sleeper {
    fn sleep(&mut self, delay: Duration);
}

/// Blocks the calling thread; not interruptible.
#[derive(Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// Plays back as fast as the engine allows.
#[derive(Debug, Default)]
pub struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&mut self, _delay: Duration) {}
}
