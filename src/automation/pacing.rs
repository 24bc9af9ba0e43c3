//! Human-like pacing
//!
//! Randomized delays, scroll distances, and "fidget" decisions are behind a
//! trait so workflows can be tested with a deterministic strategy and
//! asserted on call counts and ordering rather than timing.

use std::time::Duration;

use rand::Rng;

/// Delay and movement strategy for automation workflows.
pub trait Pacing: Send + Sync {
    /// Delay between visiting consecutive result pages.
    fn between_pages(&self) -> Duration;

    /// Pause after a scroll step.
    fn scroll_pause(&self) -> Duration;

    /// Distance of the next scroll step in pixels. Negative scrolls up,
    /// mimicking a reader skipping back.
    fn scroll_distance(&self) -> i64;

    /// Whether to throw in a random mouse movement this round.
    fn should_wiggle(&self) -> bool;

    /// Pause before typing into a freshly opened input.
    fn before_typing(&self) -> Duration;

    /// Pause letting the UI settle after opening a menu or dialog.
    fn settle(&self) -> Duration;
}

/// Production pacing: jitter within fixed ranges so request timing is never
/// uniform.
#[derive(Debug, Clone, Copy, Default)]
pub struct HumanPacing;

impl Pacing for HumanPacing {
    fn between_pages(&self) -> Duration {
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(2_000..=5_500))
    }

    fn scroll_pause(&self) -> Duration {
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(400..=1_600))
    }

    fn scroll_distance(&self) -> i64 {
        let mut rng = rand::thread_rng();
        // Mostly downward, occasionally a short scroll back up.
        if rng.gen_bool(0.15) {
            -rng.gen_range(80..=240)
        } else {
            rng.gen_range(300..=900)
        }
    }

    fn should_wiggle(&self) -> bool {
        rand::thread_rng().gen_bool(0.3)
    }

    fn before_typing(&self) -> Duration {
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(250..=900))
    }

    fn settle(&self) -> Duration {
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(600..=1_800))
    }
}

/// Deterministic pacing for tests: zero delays, fixed scroll, no fidgeting.
#[derive(Debug, Clone, Copy)]
pub struct FixedPacing {
    pub scroll: i64,
}

impl Default for FixedPacing {
    fn default() -> Self {
        Self { scroll: 600 }
    }
}

impl Pacing for FixedPacing {
    fn between_pages(&self) -> Duration {
        Duration::ZERO
    }

    fn scroll_pause(&self) -> Duration {
        Duration::ZERO
    }

    fn scroll_distance(&self) -> i64 {
        self.scroll
    }

    fn should_wiggle(&self) -> bool {
        false
    }

    fn before_typing(&self) -> Duration {
        Duration::ZERO
    }

    fn settle(&self) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_pacing_stays_within_bounds() {
        let pacing = HumanPacing;
        for _ in 0..200 {
            let d = pacing.between_pages();
            assert!(d >= Duration::from_millis(2_000) && d <= Duration::from_millis(5_500));

            let scroll = pacing.scroll_distance();
            assert!((-240..=900).contains(&scroll));
            assert!(scroll != 0);
        }
    }
}
