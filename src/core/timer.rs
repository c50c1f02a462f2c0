// Nested stopwatch for call timing; starts pair with ends in LIFO order.
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Stopwatch {
    starts: Vec<Instant>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.starts.push(Instant::now());
    }

    /// Elapsed seconds since the most recent `start`, or 0 when nothing is running.
    pub fn end(&mut self) -> f64 {
        match self.starts.pop() {
            Some(started) => round_elapsed(started.elapsed()),
            None => 0.0,
        }
    }

    pub fn depth(&self) -> usize {
        self.starts.len()
    }
}

/// 2 decimals above one second, 3 above one millisecond, else 4.
pub fn round_elapsed(elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    let places = if secs > 1.0 {
        2
    } else if secs > 0.001 {
        3
    } else {
        4
    };
    round_to(secs, places)
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}
