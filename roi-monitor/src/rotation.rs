use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use ci2::{Camera, Stream};

use crate::roi::{ReconfigureError, RegionConfig, RegionReconfigurer};

/// Longest uninterrupted sleep, so that a stop request is seen promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Periodically switches the camera to the next region of interest.
pub struct RotationScheduler<C, S> {
    reconfigurer: Arc<RegionReconfigurer<C, S>>,
    interval: Duration,
}

impl<C, S> RotationScheduler<C, S>
where
    C: Camera,
    S: Stream,
{
    pub fn new(reconfigurer: Arc<RegionReconfigurer<C, S>>, interval: Duration) -> Self {
        Self {
            reconfigurer,
            interval,
        }
    }

    /// Rotate once: apply the region after the cursor and move the cursor to
    /// it, also if applying failed.
    pub fn tick(&self) -> Result<RegionConfig, ReconfigureError> {
        let registry = self.reconfigurer.registry();
        let next = registry.next_after(registry.cursor());
        let result = self.reconfigurer.apply_config(next);
        registry.set_cursor(next);
        match &result {
            Ok(config) => info!(source = "auto", "switched to region {}: {config}", next + 1),
            Err(e) => error!(
                source = "auto",
                code = ?e.code(),
                "switching to region {} failed: {e}",
                next + 1
            ),
        }
        result
    }

    /// Rotate every interval until `flag` is stopped. Returns the number of
    /// rotations attempted.
    pub fn run(&self, flag: &thread_control::Flag) -> usize {
        let mut n_ticks = 0;
        while flag.is_alive() {
            if !sleep_while_alive(flag, self.interval) {
                break;
            }
            // errors are logged in tick()
            let _ = self.tick();
            n_ticks += 1;
        }
        info!(source = "auto", "rotation thread exiting after {n_ticks} rotations");
        n_ticks
    }
}

/// Sleep for `dur`, returning early with `false` if `flag` is stopped.
fn sleep_while_alive(flag: &thread_control::Flag, dur: Duration) -> bool {
    let deadline = Instant::now() + dur;
    loop {
        if !flag.is_alive() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_returns_early_when_stopped() {
        let (flag, control) = thread_control::make_pair();
        control.stop();
        let start = Instant::now();
        assert!(!sleep_while_alive(&flag, Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_completes_while_alive() {
        let (flag, _control) = thread_control::make_pair();
        assert!(sleep_while_alive(&flag, Duration::from_millis(20)));
    }
}
