//! Question set provider consumed once per room at creation.

use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use rand::seq::SliceRandom;
use thiserror::Error;

use crate::state::room::Question;

/// Parameters the host chose for a new room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    /// Name of the question set to draw from.
    pub question_set: String,
    /// Upper bound on the number of questions; the whole set when absent.
    pub question_count: Option<usize>,
}

/// Failures of a [`QuestionProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// No set with this name is known.
    #[error("unknown question set `{0}`")]
    UnknownSet(String),
    /// The set resolved to zero questions.
    #[error("question set `{0}` is empty")]
    Empty(String),
}

/// Supplies the ordered, immutable list of questions for a room.
pub trait QuestionProvider: Send + Sync {
    /// Resolve the questions for `config`.
    fn get_questions(
        &self,
        config: RoomConfig,
    ) -> BoxFuture<'static, Result<Vec<Question>, ProviderError>>;
}

/// Provider serving the named sets loaded from the application config.
#[derive(Clone)]
pub struct ConfiguredQuestionBank {
    sets: Arc<IndexMap<String, Vec<Question>>>,
    shuffle: bool,
}

impl ConfiguredQuestionBank {
    /// Serve `sets`, optionally shuffling the order per room.
    pub fn new(sets: IndexMap<String, Vec<Question>>, shuffle: bool) -> Self {
        Self {
            sets: Arc::new(sets),
            shuffle,
        }
    }

    fn pick(&self, config: &RoomConfig) -> Result<Vec<Question>, ProviderError> {
        let mut questions = self
            .sets
            .get(&config.question_set)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownSet(config.question_set.clone()))?;

        if self.shuffle {
            questions.shuffle(&mut rand::rng());
        }
        if let Some(count) = config.question_count {
            questions.truncate(count);
        }
        if questions.is_empty() {
            return Err(ProviderError::Empty(config.question_set.clone()));
        }
        Ok(questions)
    }
}

impl QuestionProvider for ConfiguredQuestionBank {
    fn get_questions(
        &self,
        config: RoomConfig,
    ) -> BoxFuture<'static, Result<Vec<Question>, ProviderError>> {
        // The thread-local RNG is not Send, so pick before boxing the future.
        let result = self.pick(&config);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::tests::question;

    fn bank(shuffle: bool) -> ConfiguredQuestionBank {
        let mut sets = IndexMap::new();
        sets.insert(
            "general".to_string(),
            vec![
                question("q1", 0, 10, 10),
                question("q2", 1, 10, 10),
                question("q3", 2, 10, 10),
            ],
        );
        sets.insert("empty".to_string(), Vec::new());
        ConfiguredQuestionBank::new(sets, shuffle)
    }

    fn config(name: &str, count: Option<usize>) -> RoomConfig {
        RoomConfig {
            question_set: name.into(),
            question_count: count,
        }
    }

    #[tokio::test]
    async fn serves_the_set_in_order_when_not_shuffling() {
        let questions = bank(false)
            .get_questions(config("general", None))
            .await
            .unwrap();
        let ids: Vec<_> = questions.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2", "q3"]);
    }

    #[tokio::test]
    async fn truncates_to_the_requested_count() {
        let questions = bank(true)
            .get_questions(config("general", Some(2)))
            .await
            .unwrap();
        assert_eq!(questions.len(), 2);
    }

    #[tokio::test]
    async fn unknown_and_empty_sets_are_errors() {
        assert_eq!(
            bank(false).get_questions(config("nope", None)).await,
            Err(ProviderError::UnknownSet("nope".into()))
        );
        assert_eq!(
            bank(false).get_questions(config("empty", None)).await,
            Err(ProviderError::Empty("empty".into()))
        );
        assert_eq!(
            bank(false).get_questions(config("general", Some(0))).await,
            Err(ProviderError::Empty("general".into()))
        );
    }
}
