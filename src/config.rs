//! Application-level configuration loading: round timing and the built-in question sets.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use indexmap::IndexMap;
use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

use crate::state::room::Question;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_BATTLE_CONFIG_PATH";
/// Name of the set served when a room does not pick one.
pub const DEFAULT_QUESTION_SET: &str = "general";

/// Server-side timing of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTiming {
    /// Fixed countdown between the last ready and the first question.
    pub countdown: Duration,
    /// How long a reveal stays on screen before auto-advancing.
    pub reveal_display: Duration,
    /// Cap on the wait for the host when auto-advance is disabled.
    pub reveal_max_wait: Duration,
    /// Advance reveals on the display timer instead of waiting for the host.
    pub auto_advance: bool,
    /// How far a client-reported offset may undercut the server-observed elapsed time.
    pub latency_allowance: Duration,
}

impl RoundTiming {
    /// How long a reveal lasts unless the host advances first.
    pub fn reveal_wait(&self) -> Duration {
        if self.auto_advance {
            self.reveal_display
        } else {
            self.reveal_max_wait
        }
    }
}

impl Default for RoundTiming {
    fn default() -> Self {
        Self {
            countdown: Duration::from_millis(3_000),
            reveal_display: Duration::from_millis(5_000),
            reveal_max_wait: Duration::from_millis(15_000),
            auto_advance: true,
            latency_allowance: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    timing: RoundTiming,
    event_capacity: usize,
    archive_after: Duration,
    lobby_timeout: Duration,
    shuffle_questions: bool,
    question_sets: IndexMap<String, Vec<Question>>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        question_sets = app_config.question_sets.len(),
                        countdown_ms = app_config.timing.countdown.as_millis() as u64,
                        auto_advance = app_config.timing.auto_advance,
                        "loaded battle configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Round timing.
    pub fn timing(&self) -> RoundTiming {
        self.timing
    }

    /// Capacity of the event fan-out channel.
    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    /// Delay before a finished room leaves the in-memory arena.
    pub fn archive_after(&self) -> Duration {
        self.archive_after
    }

    /// How long a lobby nobody ever attended is kept before it is abandoned.
    pub fn lobby_timeout(&self) -> Duration {
        self.lobby_timeout
    }

    /// Whether the question bank shuffles each room's questions.
    pub fn shuffle_questions(&self) -> bool {
        self.shuffle_questions
    }

    /// Named question sets served by the built-in provider.
    pub fn question_sets(&self) -> &IndexMap<String, Vec<Question>> {
        &self.question_sets
    }

    /// Replace the round timing.
    pub fn with_timing(mut self, timing: RoundTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Replace the archival delay.
    pub fn with_archive_after(mut self, archive_after: Duration) -> Self {
        self.archive_after = archive_after;
        self
    }

    /// Replace the unattended lobby timeout.
    pub fn with_lobby_timeout(mut self, lobby_timeout: Duration) -> Self {
        self.lobby_timeout = lobby_timeout;
        self
    }

    /// Replace the question sets.
    pub fn with_question_sets(mut self, question_sets: IndexMap<String, Vec<Question>>) -> Self {
        self.question_sets = question_sets;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "countdown_ms")]
    countdown: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "reveal_display_ms")]
    reveal_display: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "reveal_max_wait_ms")]
    reveal_max_wait: Duration,
    auto_advance: bool,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "latency_allowance_ms")]
    latency_allowance: Duration,
    event_capacity: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "archive_after_ms")]
    archive_after: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "lobby_timeout_ms")]
    lobby_timeout: Duration,
    shuffle_questions: bool,
    question_sets: IndexMap<String, Vec<RawQuestion>>,
}

impl Default for RawConfig {
    fn default() -> Self {
        let timing = RoundTiming::default();
        Self {
            countdown: timing.countdown,
            reveal_display: timing.reveal_display,
            reveal_max_wait: timing.reveal_max_wait,
            auto_advance: timing.auto_advance,
            latency_allowance: timing.latency_allowance,
            event_capacity: 256,
            archive_after: Duration::from_secs(60),
            lobby_timeout: Duration::from_secs(300),
            shuffle_questions: false,
            question_sets: IndexMap::new(),
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let mut question_sets: IndexMap<String, Vec<Question>> = value
            .question_sets
            .into_iter()
            .map(|(name, questions)| (name, questions.into_iter().map(Into::into).collect()))
            .collect();
        if question_sets.is_empty() {
            question_sets.insert(DEFAULT_QUESTION_SET.to_string(), default_questions());
        }

        Self {
            timing: RoundTiming {
                countdown: value.countdown,
                reveal_display: value.reveal_display,
                reveal_max_wait: value.reveal_max_wait,
                auto_advance: value.auto_advance,
                latency_allowance: value.latency_allowance,
            },
            event_capacity: value.event_capacity.max(1),
            archive_after: value.archive_after,
            lobby_timeout: value.lobby_timeout,
            shuffle_questions: value.shuffle_questions,
            question_sets,
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of a single question inside a configured set.
struct RawQuestion {
    id: String,
    text: String,
    options: Vec<String>,
    correct_index: u8,
    #[serde(default)]
    explanation: String,
    #[serde(default = "default_time_limit")]
    time_limit_seconds: u32,
    #[serde(default = "default_base_points")]
    base_points: u32,
}

fn default_time_limit() -> u32 {
    20
}

fn default_base_points() -> u32 {
    100
}

impl From<RawQuestion> for Question {
    fn from(value: RawQuestion) -> Self {
        Self {
            id: value.id,
            text: value.text,
            options: value.options,
            correct_index: value.correct_index,
            explanation: value.explanation,
            time_limit_seconds: value.time_limit_seconds,
            base_points: value.base_points,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn sample(id: &str, text: &str, options: [&str; 4], correct_index: u8, explanation: &str) -> Question {
    Question {
        id: id.to_string(),
        text: text.to_string(),
        options: options.iter().map(|option| option.to_string()).collect(),
        correct_index,
        explanation: explanation.to_string(),
        time_limit_seconds: default_time_limit(),
        base_points: default_base_points(),
    }
}

/// Built-in question set shipped with the binary.
fn default_questions() -> Vec<Question> {
    vec![
        sample(
            "general-1",
            "Which planet is closest to the Sun?",
            ["Venus", "Mercury", "Mars", "Earth"],
            1,
            "Mercury orbits at about 0.39 AU, the tightest orbit in the solar system.",
        ),
        sample(
            "general-2",
            "What is the chemical symbol for gold?",
            ["Ag", "Gd", "Au", "Go"],
            2,
            "Au comes from the Latin word aurum.",
        ),
        sample(
            "general-3",
            "How many sides does a hexagon have?",
            ["Five", "Six", "Seven", "Eight"],
            1,
            "Hexa- is the Greek prefix for six.",
        ),
        sample(
            "general-4",
            "Which ocean is the largest?",
            ["Atlantic", "Indian", "Arctic", "Pacific"],
            3,
            "The Pacific covers roughly a third of the Earth's surface.",
        ),
        sample(
            "general-5",
            "What is the boiling point of water at sea level in Celsius?",
            ["100", "90", "212", "80"],
            0,
            "At one atmosphere water boils at 100 degrees Celsius.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_ship_a_sample_set() {
        let config = AppConfig::default();
        assert_eq!(config.timing(), RoundTiming::default());
        assert_eq!(config.event_capacity(), 256);
        assert_eq!(config.lobby_timeout(), Duration::from_secs(300));
        let set = &config.question_sets()[DEFAULT_QUESTION_SET];
        assert_eq!(set.len(), 5);
        assert!(set.iter().all(|q| q.options.len() == 4));
    }

    #[test]
    fn partial_files_keep_defaults_for_missing_keys() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"countdown_ms": 1500, "auto_advance": false}"#).unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.timing().countdown, Duration::from_millis(1_500));
        assert!(!config.timing().auto_advance);
        assert_eq!(config.timing().reveal_wait(), Duration::from_millis(15_000));
        assert_eq!(config.timing().reveal_display, Duration::from_millis(5_000));
    }

    #[test]
    fn configured_sets_replace_the_sample_set() {
        let raw: RawConfig = serde_json::from_str(
            r#"{"question_sets": {"rust": [
                {"id": "r1", "text": "Borrow?", "options": ["a","b","c","d"], "correct_index": 3}
            ]}}"#,
        )
        .unwrap();
        let config: AppConfig = raw.into();
        assert_eq!(config.question_sets().len(), 1);
        let question = &config.question_sets()["rust"][0];
        assert_eq!(question.time_limit_seconds, 20);
        assert_eq!(question.base_points, 100);
    }
}
