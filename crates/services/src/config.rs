use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How store failures during training interact with the in-memory state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PersistencePolicy {
    /// Advance first, then write; write failures are logged and reported as
    /// notices. A later session start reconciles the store.
    #[default]
    Optimistic,
    /// Write first; a failed write is returned and the engine does not move.
    Strict,
}

impl PersistencePolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PersistencePolicy::Optimistic => "optimistic",
            PersistencePolicy::Strict => "strict",
        }
    }
}

impl fmt::Display for PersistencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersistencePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "optimistic" => Ok(PersistencePolicy::Optimistic),
            "strict" => Ok(PersistencePolicy::Strict),
            other => Err(format!("unknown persistence policy: {other}")),
        }
    }
}

/// Knobs for composing and training.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingConfig {
    /// Pause before the scripted reply to a correct move.
    pub reply_pause: Duration,
    /// Pause between plies when the solution is replayed after a miss.
    pub replay_pause: Duration,
    pub persistence: PersistencePolicy,
    pub cache_capacity: usize,
    pub max_set_size: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            reply_pause: Duration::from_millis(400),
            replay_pause: Duration::from_millis(700),
            persistence: PersistencePolicy::Optimistic,
            cache_capacity: 256,
            max_set_size: 500,
        }
    }
}

impl TrainingConfig {
    /// Defaults overridden by `WOODPECKER_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_parse::<u64>("WOODPECKER_REPLY_PAUSE_MS") {
            config.reply_pause = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("WOODPECKER_REPLAY_PAUSE_MS") {
            config.replay_pause = Duration::from_millis(ms);
        }
        if let Some(policy) = env_parse::<PersistencePolicy>("WOODPECKER_PERSISTENCE") {
            config.persistence = policy;
        }
        if let Some(capacity) = env_parse::<usize>("WOODPECKER_CACHE_CAPACITY") {
            config.cache_capacity = capacity.max(1);
        }
        if let Some(max) = env_parse::<usize>("WOODPECKER_MAX_SET_SIZE") {
            config.max_set_size = max.max(1);
        }
        config
    }

    /// No pauses; for tests and non-interactive drivers.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            reply_pause: Duration::ZERO,
            replay_pause: Duration::ZERO,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_persistence(mut self, persistence: PersistencePolicy) -> Self {
        self.persistence = persistence;
        self
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring invalid {key}={raw:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TrainingConfig::default();
        assert_eq!(config.reply_pause, Duration::from_millis(400));
        assert_eq!(config.replay_pause, Duration::from_millis(700));
        assert_eq!(config.persistence, PersistencePolicy::Optimistic);
        assert_eq!(config.cache_capacity, 256);
        assert_eq!(config.max_set_size, 500);
    }

    #[test]
    fn immediate_has_no_pauses() {
        let config = TrainingConfig::immediate();
        assert!(config.reply_pause.is_zero());
        assert!(config.replay_pause.is_zero());
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("Strict".parse::<PersistencePolicy>().unwrap(), PersistencePolicy::Strict);
        assert_eq!(
            " optimistic ".parse::<PersistencePolicy>().unwrap(),
            PersistencePolicy::Optimistic
        );
        assert!("lazy".parse::<PersistencePolicy>().is_err());
    }
}
