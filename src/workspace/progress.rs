//! Simulated progress for the explanation request.
//!
//! The backend reports no progress, so while `/explain` is outstanding a
//! repeating ticker advances a percentage by random increments and maps it
//! to a stage label. The simulation never passes [`SIMULATED_CEILING`] on its
//! own; only a successful settlement moves it to 100.
//!
//! The ticker is driven by the caller passing `Instant`s (`advance`), which
//! keeps the simulation deterministic under test.

use std::fmt;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;

use crate::config::schema::ProgressConfig;

/// Highest percentage the simulation reaches before the call settles.
pub const SIMULATED_CEILING: f64 = 95.0;

/// Timing and step parameters for the simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSettings {
    /// When `false` no ticker runs and results apply as soon as they arrive.
    pub enabled: bool,
    pub tick: Duration,
    pub min_step: f64,
    pub max_step: f64,
    /// Minimum time the loading state stays visible.
    pub min_visible: Duration,
    /// Number of "steps" shown next to the percentage.
    pub total_steps: u32,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self::from(&ProgressConfig::default())
    }
}

impl From<&ProgressConfig> for ProgressSettings {
    fn from(config: &ProgressConfig) -> Self {
        let min_step = config.min_step.max(0.0);
        Self {
            enabled: config.enabled,
            tick: Duration::from_millis(config.tick_ms.max(1)),
            min_step,
            max_step: config.max_step.max(min_step),
            min_visible: Duration::from_millis(config.min_visible_ms),
            total_steps: config.total_steps,
        }
    }
}

/// Pipeline stage shown for a given percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Preprocessing,
    GradCam,
    Lime,
    Occlusion,
    Finalizing,
}

impl Stage {
    pub fn for_percent(percent: f64) -> Self {
        match percent {
            p if p < 25.0 => Self::Preprocessing,
            p if p < 55.0 => Self::GradCam,
            p if p < 80.0 => Self::Lime,
            p if p < 95.0 => Self::Occlusion,
            _ => Self::Finalizing,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Preprocessing => "Preprocessing X-ray image...",
            Self::GradCam => "Generating Grad-CAM heatmap...",
            Self::Lime => "Running LIME superpixel analysis...",
            Self::Occlusion => "Computing occlusion sensitivity...",
            Self::Finalizing => "Finalizing report...",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The repeating timer. Present only while the request is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticker {
    interval: Duration,
    next_due: Instant,
}

/// Progress of one explanation request.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    percent: f64,
    started_at: Instant,
    ticker: Option<Ticker>,
    settings: ProgressSettings,
}

impl Progress {
    /// Start at 0% with the ticker armed (when enabled).
    pub fn start(now: Instant, settings: ProgressSettings) -> Self {
        let ticker = settings.enabled.then(|| Ticker {
            interval: settings.tick,
            next_due: now + settings.tick,
        });
        Self {
            percent: 0.0,
            started_at: now,
            ticker,
            settings,
        }
    }

    /// Fire every tick due at `now`. Each tick adds a random step in
    /// `[min_step, max_step]`, capped at [`SIMULATED_CEILING`].
    pub fn advance<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) {
        let Some(ticker) = self.ticker.as_mut() else {
            return;
        };

        while ticker.next_due <= now {
            let step = rng.random_range(self.settings.min_step..=self.settings.max_step);
            self.percent = (self.percent + step).min(SIMULATED_CEILING);
            ticker.next_due += ticker.interval;

            if self.percent >= SIMULATED_CEILING {
                // Nothing left to simulate; skip the backlog.
                ticker.next_due = now + ticker.interval;
                break;
            }
        }
    }

    /// Clear the ticker. Called on every settlement, success or failure.
    pub fn stop(&mut self) {
        self.ticker = None;
    }

    /// Stop and jump to 100%.
    pub fn complete(&mut self) {
        self.stop();
        self.percent = 100.0;
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    pub fn stage(&self) -> Stage {
        Stage::for_percent(self.percent)
    }

    pub fn is_timer_active(&self) -> bool {
        self.ticker.is_some()
    }

    /// Earliest moment a settled result may be shown.
    pub fn visible_until(&self) -> Instant {
        if self.settings.enabled {
            self.started_at + self.settings.min_visible
        } else {
            self.started_at
        }
    }

    pub fn total_steps(&self) -> u32 {
        self.settings.total_steps
    }

    /// Steps "done" out of [`total_steps`](Self::total_steps).
    pub fn completed_steps(&self) -> u32 {
        ((self.percent / 100.0) * f64::from(self.settings.total_steps)).round() as u32
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn settings() -> ProgressSettings {
        ProgressSettings {
            enabled: true,
            tick: Duration::from_millis(100),
            min_step: 2.0,
            max_step: 9.0,
            min_visible: Duration::from_millis(1500),
            total_steps: 500,
        }
    }

    #[test]
    fn stage_boundaries() {
        assert_eq!(Stage::for_percent(0.0), Stage::Preprocessing);
        assert_eq!(Stage::for_percent(24.9), Stage::Preprocessing);
        assert_eq!(Stage::for_percent(25.0), Stage::GradCam);
        assert_eq!(Stage::for_percent(55.0), Stage::Lime);
        assert_eq!(Stage::for_percent(80.0), Stage::Occlusion);
        assert_eq!(Stage::for_percent(95.0), Stage::Finalizing);
        assert_eq!(Stage::for_percent(100.0), Stage::Finalizing);
    }

    #[test]
    fn advance_is_monotonic_and_capped() {
        let t0 = Instant::now();
        let mut rng = StdRng::seed_from_u64(7);
        let mut progress = Progress::start(t0, settings());
        assert_eq!(progress.percent(), 0.0);

        let mut last = 0.0;
        for ms in (0..20_000).step_by(50) {
            progress.advance(t0 + Duration::from_millis(ms), &mut rng);
            assert!(progress.percent() >= last);
            assert!(progress.percent() <= SIMULATED_CEILING);
            last = progress.percent();
        }
        assert_eq!(progress.percent(), SIMULATED_CEILING);
        assert!(progress.is_timer_active());
    }

    #[test]
    fn advance_fires_only_due_ticks() {
        let t0 = Instant::now();
        let mut rng = StdRng::seed_from_u64(1);
        let mut progress = Progress::start(t0, settings());

        progress.advance(t0 + Duration::from_millis(99), &mut rng);
        assert_eq!(progress.percent(), 0.0);

        progress.advance(t0 + Duration::from_millis(100), &mut rng);
        let one_tick = progress.percent();
        assert!((2.0..=9.0).contains(&one_tick));

        progress.advance(t0 + Duration::from_millis(300), &mut rng);
        assert!(progress.percent() >= one_tick + 4.0);
    }

    #[test]
    fn stop_clears_timer_and_freezes_percent() {
        let t0 = Instant::now();
        let mut rng = StdRng::seed_from_u64(3);
        let mut progress = Progress::start(t0, settings());
        progress.advance(t0 + Duration::from_millis(500), &mut rng);
        let frozen = progress.percent();

        progress.stop();
        assert!(!progress.is_timer_active());
        progress.advance(t0 + Duration::from_secs(10), &mut rng);
        assert_eq!(progress.percent(), frozen);
        assert!(frozen < 100.0);

        progress.complete();
        assert_eq!(progress.percent(), 100.0);
        assert_eq!(progress.completed_steps(), 500);
    }

    #[test]
    fn disabled_simulation_has_no_timer_or_delay() {
        let t0 = Instant::now();
        let mut config = settings();
        config.enabled = false;
        let progress = Progress::start(t0, config);
        assert!(!progress.is_timer_active());
        assert_eq!(progress.visible_until(), t0);
    }

    #[test]
    fn completed_steps_rounds() {
        let t0 = Instant::now();
        let mut progress = Progress::start(t0, settings());
        progress.percent = 33.4;
        assert_eq!(progress.completed_steps(), 167);
    }

    #[test]
    fn settings_from_config_sanitizes_steps() {
        let config = ProgressConfig {
            min_step: 5.0,
            max_step: 1.0,
            tick_ms: 0,
            ..ProgressConfig::default()
        };
        let settings = ProgressSettings::from(&config);
        assert_eq!(settings.max_step, 5.0);
        assert_eq!(settings.tick, Duration::from_millis(1));
    }
}
