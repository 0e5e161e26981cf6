use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Caps in-place restarts to `max_restarts` within a sliding window.
#[derive(Debug)]
pub struct RestartWindow {
    max_restarts: u32,
    window: Duration,
    history: VecDeque<Instant>,
}

impl RestartWindow {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            history: VecDeque::new(),
        }
    }

    /// Records a restart if the budget allows one.
    pub fn try_record(&mut self, now: Instant) -> bool {
        while let Some(oldest) = self.history.front() {
            if now.duration_since(*oldest) >= self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }
        if self.history.len() >= self.max_restarts as usize {
            return false;
        }
        self.history.push_back(now);
        true
    }

    pub fn recent(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_refills_after_window() {
        let mut window = RestartWindow::new(2, Duration::from_secs(60));
        let start = Instant::now();
        assert!(window.try_record(start));
        assert!(window.try_record(start + Duration::from_secs(1)));
        assert!(!window.try_record(start + Duration::from_secs(2)));
        assert_eq!(window.recent(), 2);
        assert!(window.try_record(start + Duration::from_secs(61)));
    }

    #[test]
    fn zero_budget_never_restarts() {
        let mut window = RestartWindow::new(0, Duration::from_secs(60));
        assert!(!window.try_record(Instant::now()));
    }
}
