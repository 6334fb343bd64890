//! Engine configuration.
//!
//! Every timing value is stored as integer milliseconds so a TOML file reads
//! naturally (`interval_ms = 500`); accessors hand out [`Duration`]s.
//!
//! ```toml
//! [backfill]
//! enabled = true
//! pacing_delay_ms = 200
//!
//! [poll]
//! interval_ms = 500
//! final_backoff_ms = 60000
//!
//! [playback]
//! desired_lag_ms = 10000
//! max_speed = 2.0
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timestamp::CHUNK_WIDTH_MS;
use crate::{Error, Result};

/// Largest accepted distance behind live (one hour).
pub const MAX_DESIRED_LAG_MS: i64 = 3_600_000;

/// Backward history walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Walk history at all (false = live-only).
    pub enabled: bool,
    /// How far the cursor steps back per request.
    pub step_ms: i64,
    /// Pause between successful requests.
    pub pacing_delay_ms: u64,
    /// Pause before retrying a failed request.
    pub retry_delay_ms: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            step_ms: CHUNK_WIDTH_MS,
            pacing_delay_ms: 200,
            retry_delay_ms: 1_000,
        }
    }
}

impl BackfillConfig {
    #[must_use]
    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Live edge polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    /// Suspension after the feed reports a terminal game state.
    pub final_backoff_ms: u64,
    /// How far behind wall clock the live chunk starts.
    pub live_offset_ms: i64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            final_backoff_ms: 60_000,
            live_offset_ms: 60_000,
        }
    }
}

impl PollConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub fn final_backoff(&self) -> Duration {
        Duration::from_millis(self.final_backoff_ms)
    }
}

/// Paced live playback and drift correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Shortest time a frame stays on screen.
    pub min_frame_ms: u64,
    /// Longest time a frame stays on screen.
    pub max_frame_ms: u64,
    pub drift_check_interval_ms: u64,
    /// Target distance behind the live edge.
    pub desired_lag_ms: i64,
    pub min_speed: f64,
    pub max_speed: f64,
    /// Lag above target + this margin speeds playback up.
    pub behind_margin_ms: i64,
    /// Lag below target - this margin slows playback down.
    pub ahead_margin_ms: i64,
    /// Lag within target +/- this band resets speed to 1.0.
    pub on_target_band_ms: i64,
    pub speed_up_factor: f64,
    pub slow_down_factor: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            min_frame_ms: 150,
            max_frame_ms: 4_000,
            drift_check_interval_ms: 5_000,
            desired_lag_ms: 10_000,
            min_speed: 0.5,
            max_speed: 2.0,
            behind_margin_ms: 5_000,
            ahead_margin_ms: 2_000,
            on_target_band_ms: 1_000,
            speed_up_factor: 1.1,
            slow_down_factor: 0.9,
        }
    }
}

impl PlaybackConfig {
    #[must_use]
    pub fn drift_check_interval(&self) -> Duration {
        Duration::from_millis(self.drift_check_interval_ms)
    }

    /// Clamp a requested speed into the configured bounds.
    #[must_use]
    pub fn clamp_speed(&self, speed: f64) -> f64 {
        if speed.is_nan() {
            return 1.0_f64.clamp(self.min_speed, self.max_speed);
        }
        speed.clamp(self.min_speed, self.max_speed)
    }
}

/// Upstream feed client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Base URL; `/window/{id}` and `/details/{id}` are appended.
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://feed.lolesports.com/livestats/v1".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl FeedConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backfill: BackfillConfig,
    pub poll: PollConfig,
    pub playback: PlaybackConfig,
    pub feed: FeedConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject values the controllers cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.backfill.step_ms <= 0 {
            return Err(Error::Config("backfill.step_ms must be > 0".into()));
        }
        if self.poll.interval_ms == 0 {
            return Err(Error::Config("poll.interval_ms must be > 0".into()));
        }
        if self.poll.live_offset_ms < 0 {
            return Err(Error::Config("poll.live_offset_ms must be >= 0".into()));
        }
        let playback = &self.playback;
        if playback.min_frame_ms > playback.max_frame_ms {
            return Err(Error::Config(format!(
                "playback.min_frame_ms ({}) exceeds max_frame_ms ({})",
                playback.min_frame_ms, playback.max_frame_ms
            )));
        }
        if playback.drift_check_interval_ms == 0 {
            return Err(Error::Config(
                "playback.drift_check_interval_ms must be > 0".into(),
            ));
        }
        if !(playback.min_speed > 0.0 && playback.min_speed <= playback.max_speed) {
            return Err(Error::Config(format!(
                "playback speed bounds must satisfy 0 < min_speed <= max_speed (got {} / {})",
                playback.min_speed, playback.max_speed
            )));
        }
        if !(0..=MAX_DESIRED_LAG_MS).contains(&playback.desired_lag_ms) {
            return Err(Error::Config(format!(
                "playback.desired_lag_ms must be within 0..={MAX_DESIRED_LAG_MS} (got {})",
                playback.desired_lag_ms
            )));
        }
        if !(playback.speed_up_factor >= 1.0 && playback.speed_up_factor.is_finite()) {
            return Err(Error::Config(format!(
                "playback.speed_up_factor must be >= 1.0 (got {})",
                playback.speed_up_factor
            )));
        }
        if !(playback.slow_down_factor > 0.0 && playback.slow_down_factor <= 1.0) {
            return Err(Error::Config(format!(
                "playback.slow_down_factor must satisfy 0 < factor <= 1.0 (got {})",
                playback.slow_down_factor
            )));
        }
        for (name, margin) in [
            ("behind_margin_ms", playback.behind_margin_ms),
            ("ahead_margin_ms", playback.ahead_margin_ms),
            ("on_target_band_ms", playback.on_target_band_ms),
        ] {
            if margin < 0 {
                return Err(Error::Config(format!("playback.{name} must be >= 0")));
            }
        }
        if self.feed.base_url.trim().is_empty() {
            return Err(Error::Config("feed.base_url must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.backfill.step_ms, 10_000);
        assert_eq!(config.backfill.pacing_delay(), Duration::from_millis(200));
        assert_eq!(config.backfill.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.poll.interval(), Duration::from_millis(500));
        assert_eq!(config.poll.final_backoff(), Duration::from_secs(60));
        assert_eq!(config.playback.min_frame_ms, 150);
        assert_eq!(config.playback.max_frame_ms, 4_000);
        assert_eq!(config.playback.drift_check_interval(), Duration::from_secs(5));
        assert_eq!(config.playback.desired_lag_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [backfill]
            enabled = false

            [playback]
            desired_lag_ms = 3000
            "#,
        )
        .unwrap();
        assert!(!config.backfill.enabled);
        assert_eq!(config.backfill.step_ms, 10_000);
        assert_eq!(config.playback.desired_lag_ms, 3_000);
        assert_eq!(config.poll.interval_ms, 500);
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn rejects_inverted_frame_bounds() {
        let err = EngineConfig::from_toml_str(
            r#"
            [playback]
            min_frame_ms = 5000
            max_frame_ms = 100
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("min_frame_ms"));
    }

    #[test]
    fn rejects_bad_speed_bounds() {
        let mut config = EngineConfig::default();
        config.playback.min_speed = 0.0;
        assert!(config.validate().is_err());

        config.playback.min_speed = 3.0;
        config.playback.max_speed = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_lag() {
        let mut config = EngineConfig::default();
        config.playback.desired_lag_ms = MAX_DESIRED_LAG_MS;
        assert!(config.validate().is_ok());

        config.playback.desired_lag_ms = i64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("desired_lag_ms"));

        config.playback.desired_lag_ms = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_drift_factors() {
        let mut config = EngineConfig::default();
        config.playback.speed_up_factor = -1.0;
        assert!(config.validate().unwrap_err().to_string().contains("speed_up_factor"));

        let mut config = EngineConfig::default();
        config.playback.speed_up_factor = 0.8;
        assert!(config.validate().is_err());

        for factor in [0.0, -0.5, 1.5, f64::NAN] {
            let mut config = EngineConfig::default();
            config.playback.slow_down_factor = factor;
            assert!(config.validate().is_err(), "slow_down_factor {factor}");
        }
    }

    #[test]
    fn rejects_negative_margins() {
        let err = EngineConfig::from_toml_str(
            r#"
            [playback]
            ahead_margin_ms = -1
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ahead_margin_ms"));

        let mut config = EngineConfig::default();
        config.playback.on_target_band_ms = -1_000;
        assert!(config.validate().is_err());
        config.playback.on_target_band_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_intervals() {
        let mut config = EngineConfig::default();
        config.poll.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.backfill.step_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unparseable_toml() {
        let err = EngineConfig::from_toml_str("[poll\ninterval_ms = 1").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn clamp_speed_bounds() {
        let playback = PlaybackConfig::default();
        assert_eq!(playback.clamp_speed(10.0), 2.0);
        assert_eq!(playback.clamp_speed(0.1), 0.5);
        assert_eq!(playback.clamp_speed(1.3), 1.3);
        assert_eq!(playback.clamp_speed(f64::NAN), 1.0);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[poll]\ninterval_ms = 250\nfinal_backoff_ms = 1000").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.poll.interval(), Duration::from_millis(250));
        assert_eq!(config.poll.final_backoff(), Duration::from_secs(1));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
