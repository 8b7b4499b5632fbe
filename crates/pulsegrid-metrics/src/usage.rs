//! Store-usage tracker.
//!
//! Samples the fraction of wall time the store layer spends doing work
//! over a measurement window. Busy sections are bracketed by an RAII
//! guard; overlapping guards count once.

use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

#[derive(Debug)]
struct Window {
    started_at: Instant,
    busy_micros: u64,
    open_guards: usize,
    open_since: Option<Instant>,
}

impl Window {
    fn fresh(now: Instant) -> Self {
        Self {
            started_at: now,
            busy_micros: 0,
            open_guards: 0,
            open_since: None,
        }
    }
}

/// Tracks busy time across a window; see [`UsageTracker::measure`].
#[derive(Debug)]
pub struct UsageTracker {
    window: Mutex<Window>,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            window: Mutex::new(Window::fresh(Instant::now())),
        }
    }

    /// Mark the start of a busy section. Busy time accumulates until
    /// the returned guard is dropped.
    pub fn track(&self) -> UsageGuard<'_> {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        if window.open_guards == 0 {
            window.open_since = Some(Instant::now());
        }
        window.open_guards += 1;
        UsageGuard { tracker: self }
    }

    /// Fraction of the elapsed window spent busy, in `[0.0, 1.0]`.
    /// Resets the window.
    pub fn measure(&self) -> f64 {
        let now = Instant::now();
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());

        let mut busy = window.busy_micros;
        // Credit a section that is still open at measurement time.
        if let Some(open_since) = window.open_since {
            busy += now.duration_since(open_since).as_micros() as u64;
        }
        let total = now.duration_since(window.started_at).as_micros() as u64;

        let open_guards = window.open_guards;
        *window = Window::fresh(now);
        window.open_guards = open_guards;
        if open_guards > 0 {
            window.open_since = Some(now);
        }

        if total == 0 {
            return 0.0;
        }
        let fraction = (busy as f64 / total as f64).clamp(0.0, 1.0);
        debug!(fraction, "measured store usage");
        fraction
    }

    fn close_guard(&self) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.open_guards = window.open_guards.saturating_sub(1);
        if window.open_guards == 0 {
            if let Some(open_since) = window.open_since.take() {
                window.busy_micros += open_since.elapsed().as_micros() as u64;
            }
        }
    }
}

/// RAII marker for one busy section.
pub struct UsageGuard<'a> {
    tracker: &'a UsageTracker,
}

impl Drop for UsageGuard<'_> {
    fn drop(&mut self) {
        self.tracker.close_guard();
    }
}
