//! Human-like pacing: breaks and drifting reading speed

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{HumanSimulationConfig, SpanRange};

/// Bounds of the reading speed factor
pub const SPEED_FACTOR_RANGE: (f64, f64) = (0.8, 1.3);

/// Minimum time between two speed factor changes
pub const SPEED_CHANGE_PERIOD: Duration = Duration::from_secs(30);

pub struct BehaviorSimulator<R = ChaCha8Rng> {
    config: HumanSimulationConfig,
    speed_factor: f64,
    last_speed_change: Option<Instant>,
    rng: R,
}

impl BehaviorSimulator<ChaCha8Rng> {
    pub fn new(config: HumanSimulationConfig) -> Self {
        Self::with_rng(config, ChaCha8Rng::from_entropy())
    }
}

impl<R: Rng> BehaviorSimulator<R> {
    pub fn with_rng(config: HumanSimulationConfig, rng: R) -> Self {
        Self {
            config,
            speed_factor: 1.0,
            last_speed_change: None,
            rng,
        }
    }

    /// Whether to take a break instead of the next read
    pub fn should_break(&mut self) -> bool {
        if !self.config.enabled {
            return false;
        }
        self.rng.gen::<f64>() < self.config.break_probability
    }

    pub fn break_duration(&mut self) -> Duration {
        self.config.break_duration.sample_secs(&mut self.rng)
    }

    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    /// Pause before the next read
    pub fn paced_interval(&mut self, base: &SpanRange) -> Duration {
        self.paced_interval_at(base, Instant::now())
    }

    /// Pause before the next read, with `now` driving speed changes
    pub fn paced_interval_at(&mut self, base: &SpanRange, now: Instant) -> Duration {
        let base_secs = base.sample(&mut self.rng);

        if !(self.config.enabled && self.config.reading_speed_variation) {
            return Duration::from_secs_f64(base_secs);
        }

        let due = self
            .last_speed_change
            .map_or(true, |at| now.saturating_duration_since(at) > SPEED_CHANGE_PERIOD);
        if due {
            self.speed_factor = self.rng.gen_range(SPEED_FACTOR_RANGE.0..=SPEED_FACTOR_RANGE.1);
            self.last_speed_change = Some(now);
            tracing::debug!(factor = self.speed_factor, "Reading speed changed");
        }

        Duration::from_secs_f64(base_secs * self.speed_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulator(enabled: bool, break_probability: f64) -> BehaviorSimulator {
        let config = HumanSimulationConfig {
            enabled,
            break_probability,
            ..Default::default()
        };
        BehaviorSimulator::with_rng(config, ChaCha8Rng::seed_from_u64(9))
    }

    #[test]
    fn test_disabled_never_breaks() {
        let mut sim = simulator(false, 1.0);
        assert!((0..100).all(|_| !sim.should_break()));
    }

    #[test]
    fn test_certain_break_when_enabled() {
        let mut sim = simulator(true, 1.0);
        assert!((0..100).all(|_| sim.should_break()));

        let mut sim = simulator(true, 0.0);
        assert!((0..100).all(|_| !sim.should_break()));
    }

    #[test]
    fn test_break_duration_within_range() {
        let mut sim = simulator(true, 0.5);
        for _ in 0..100 {
            let d = sim.break_duration().as_secs();
            assert!((10..=20).contains(&d));
        }
    }

    #[test]
    fn test_interval_unmodified_when_disabled() {
        let mut sim = simulator(false, 0.0);
        let base: SpanRange = "1-1".parse().unwrap();
        assert_eq!(sim.paced_interval(&base), Duration::from_secs(1));
        assert_eq!(sim.speed_factor(), 1.0);
    }

    #[test]
    fn test_speed_factor_changes_at_most_every_thirty_seconds() {
        let mut sim = simulator(true, 0.0);
        let base: SpanRange = "10".parse().unwrap();
        let start = Instant::now();

        let first = sim.paced_interval_at(&base, start);
        let factor = sim.speed_factor();
        assert!((0.8..=1.3).contains(&factor));
        assert_eq!(first, Duration::from_secs_f64(10.0 * factor));

        for secs in [5, 20, 30] {
            sim.paced_interval_at(&base, start + Duration::from_secs(secs));
            assert_eq!(sim.speed_factor(), factor);
        }

        let later = sim.paced_interval_at(&base, start + Duration::from_secs(31));
        let new_factor = sim.speed_factor();
        assert!((0.8..=1.3).contains(&new_factor));
        assert_eq!(later, Duration::from_secs_f64(10.0 * new_factor));
    }
}
