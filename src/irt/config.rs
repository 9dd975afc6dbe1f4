use serde::{Deserialize, Serialize};

use crate::irt::error::{EngineError, EngineResult};

/// Upper bound for any day-count setting (freshness window, ladder rungs).
pub const MAX_INTERVAL_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub learning_rate: f64,
    pub initial_theta: f64,
    pub initial_se: f64,
    pub se_floor: f64,
    pub se_ceiling: f64,
    /// Multiplicative SE decay per attempt. One constant for all items;
    /// pending calibration review against discrimination-dependent decay.
    pub se_decay: f64,
    pub confidence_threshold: f64,
    pub theta_min: f64,
    pub theta_max: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.3,
            initial_theta: 0.0,
            initial_se: 0.6,
            se_floor: 0.15,
            se_ceiling: 0.6,
            se_decay: 0.9,
            confidence_threshold: 0.35,
            theta_min: -3.0,
            theta_max: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum RankingStrategy {
    #[default]
    DifficultyDistance,
    FisherInformation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub exploration_session_threshold: u32,
    pub recent_window: usize,
    pub freshness_days: i64,
    pub ranking: RankingStrategy,
    pub max_target_chapters: usize,
    pub review_slots: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            exploration_session_threshold: 14,
            recent_window: 30,
            freshness_days: 7,
            ranking: RankingStrategy::DifficultyDistance,
            max_target_chapters: 4,
            review_slots: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub window: usize,
    pub global_threshold: u32,
    pub session_threshold: u32,
    pub cooldown_sessions: u32,
    pub weak_chapters: usize,
    pub easy_count: usize,
    pub medium_count: usize,
    pub easy_band_offset: (f64, f64),
    pub medium_band_offset: (f64, f64),
    pub min_success_gain: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window: 10,
            global_threshold: 5,
            session_threshold: 3,
            cooldown_sessions: 2,
            weak_chapters: 2,
            easy_count: 3,
            medium_count: 2,
            easy_band_offset: (-2.0, -1.0),
            medium_band_offset: (-1.0, -0.25),
            min_success_gain: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub ladder_days: Vec<i64>,
    pub max_due: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            ladder_days: vec![1, 3, 7, 14, 30],
            max_due: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub estimator: EstimatorConfig,
    pub selector: SelectorConfig,
    pub breaker: BreakerConfig,
    pub review: ReviewConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse::<f64>("IRT_LEARNING_RATE") {
            config.estimator.learning_rate = val;
        }
        if let Some(val) = env_parse::<f64>("IRT_SE_DECAY") {
            config.estimator.se_decay = val;
        }
        if let Some(val) = env_parse::<f64>("IRT_CONFIDENCE_THRESHOLD") {
            config.estimator.confidence_threshold = val;
        }
        if let Some(val) = env_parse::<u32>("IRT_EXPLORATION_SESSIONS") {
            config.selector.exploration_session_threshold = val;
        }
        if let Some(val) = env_parse::<i64>("IRT_FRESHNESS_DAYS") {
            config.selector.freshness_days = val;
        }
        if let Ok(val) = std::env::var("IRT_RANKING") {
            config.selector.ranking = match val.to_lowercase().as_str() {
                "fisher" | "fisher_information" => RankingStrategy::FisherInformation,
                _ => RankingStrategy::DifficultyDistance,
            };
        }
        if let Some(val) = env_parse::<u32>("IRT_BREAKER_THRESHOLD") {
            config.breaker.global_threshold = val;
        }
        if let Some(val) = env_parse::<u32>("IRT_BREAKER_SESSION_THRESHOLD") {
            config.breaker.session_threshold = val;
        }
        if let Some(val) = env_parse::<u32>("IRT_BREAKER_COOLDOWN") {
            config.breaker.cooldown_sessions = val;
        }

        config
    }

    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let est = &self.estimator;
        if !(est.learning_rate.is_finite() && est.learning_rate > 0.0) {
            return Err(invalid("estimator.learning_rate must be positive"));
        }
        if !(est.se_floor > 0.0 && est.se_floor <= est.se_ceiling) {
            return Err(invalid("estimator.se_floor must be positive and <= se_ceiling"));
        }
        if !(est.initial_se >= est.se_floor && est.initial_se <= est.se_ceiling) {
            return Err(invalid("estimator.initial_se must lie within [se_floor, se_ceiling]"));
        }
        if !(est.se_decay > 0.0 && est.se_decay <= 1.0) {
            return Err(invalid("estimator.se_decay must lie in (0, 1]"));
        }
        if !(est.theta_min < est.theta_max
            && (est.theta_min..=est.theta_max).contains(&est.initial_theta))
        {
            return Err(invalid("estimator theta bounds must contain initial_theta"));
        }

        if !(0..=MAX_INTERVAL_DAYS).contains(&self.selector.freshness_days) {
            return Err(invalid("selector.freshness_days must lie within [0, 36500]"));
        }
        if self.selector.max_target_chapters == 0 {
            return Err(invalid("selector.max_target_chapters must be at least 1"));
        }

        let breaker = &self.breaker;
        if breaker.window == 0 || breaker.global_threshold == 0 || breaker.session_threshold == 0 {
            return Err(invalid("breaker window and thresholds must be at least 1"));
        }
        if breaker.easy_band_offset.0 > breaker.easy_band_offset.1
            || breaker.medium_band_offset.0 > breaker.medium_band_offset.1
        {
            return Err(invalid("breaker band offsets must be ordered (low, high)"));
        }

        let ladder = &self.review.ladder_days;
        if ladder.is_empty() || ladder[0] <= 0 || ladder.windows(2).any(|w| w[1] <= w[0]) {
            return Err(invalid("review.ladder_days must be positive and strictly increasing"));
        }
        if ladder.iter().any(|&days| days > MAX_INTERVAL_DAYS) {
            return Err(invalid("review.ladder_days must not exceed 36500"));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn invalid(msg: &str) -> EngineError {
    EngineError::Validation(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{"estimator": {"learning_rate": 0.5}}"#).unwrap();
        assert!((config.estimator.learning_rate - 0.5).abs() < 1e-12);
        assert!((config.estimator.se_floor - 0.15).abs() < 1e-12);
        assert_eq!(config.selector.exploration_session_threshold, 14);
        assert_eq!(config.review.ladder_days, vec![1, 3, 7, 14, 30]);
    }

    #[test]
    fn test_rejects_non_increasing_ladder() {
        let mut config = EngineConfig::default();
        config.review.ladder_days = vec![1, 3, 3];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_day_counts() {
        let mut config = EngineConfig::default();
        config.selector.freshness_days = 200_000_000_000;
        assert!(matches!(config.validate(), Err(EngineError::Validation(_))));

        let mut config = EngineConfig::default();
        config.review.ladder_days = vec![1, 3, 200_000_000_000];
        assert!(matches!(config.validate(), Err(EngineError::Validation(_))));

        let mut config = EngineConfig::default();
        config.selector.freshness_days = MAX_INTERVAL_DAYS;
        config.review.ladder_days = vec![1, MAX_INTERVAL_DAYS];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_se_bounds() {
        let mut config = EngineConfig::default();
        config.estimator.se_floor = 0.7;
        assert!(config.validate().is_err());
    }
}
