//! Single scoring formula shared by the host and player paths.

use std::collections::HashMap;

use serde::Deserialize;
use uuid::Uuid;

use crate::dao::models::{AnswerEntity, QuizEntity};

/// How many points a correct answer is worth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoringPolicy {
    /// Fixed value per correct answer.
    Flat {
        /// Points per correct answer.
        points: u64,
    },
    /// `base` plus a bonus shrinking linearly to zero over the time limit.
    TimeBonus {
        /// Points for any correct answer.
        base: u64,
        /// Extra points for an instant answer.
        max_bonus: u64,
    },
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        ScoringPolicy::Flat { points: 100 }
    }
}

impl ScoringPolicy {
    /// Points earned by one answer.
    pub fn points(&self, is_correct: bool, time_taken_ms: u64, time_limit_secs: u32) -> u64 {
        if !is_correct {
            return 0;
        }

        match *self {
            ScoringPolicy::Flat { points } => points,
            ScoringPolicy::TimeBonus { base, max_bonus } => {
                let limit_ms = u64::from(time_limit_secs) * 1000;
                if limit_ms == 0 {
                    return base;
                }
                let remaining_ms = limit_ms.saturating_sub(time_taken_ms);
                base + max_bonus * remaining_ms / limit_ms
            }
        }
    }

    /// Replay a player's answer log into a score.
    ///
    /// Only the earliest answer per question counts, so the result does not
    /// depend on duplicates that raced past the pre-write check.
    pub fn replay(&self, quiz: &QuizEntity, answers: &[AnswerEntity], player_id: Uuid) -> u64 {
        dedupe_answers(answers.iter().filter(|answer| answer.player_id == player_id))
            .into_iter()
            .map(|answer| {
                let limit = quiz
                    .questions
                    .get(answer.question_index)
                    .map(|question| question.time_limit_secs)
                    .unwrap_or_default();
                self.points(answer.is_correct, answer.time_taken_ms, limit)
            })
            .sum()
    }
}

/// Keep the earliest answer per (player, question index), ordered by submission time.
pub fn dedupe_answers<'a>(
    answers: impl IntoIterator<Item = &'a AnswerEntity>,
) -> Vec<&'a AnswerEntity> {
    let mut earliest: HashMap<(Uuid, usize), &AnswerEntity> = HashMap::new();
    for answer in answers {
        earliest
            .entry((answer.player_id, answer.question_index))
            .and_modify(|kept| {
                if answer.submitted_at < kept.submitted_at {
                    *kept = answer;
                }
            })
            .or_insert(answer);
    }

    let mut kept: Vec<_> = earliest.into_values().collect();
    kept.sort_by_key(|answer| (answer.submitted_at, answer.question_index));
    kept
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::dao::models::{OptionEntity, QuestionEntity};

    fn quiz(questions: usize) -> QuizEntity {
        QuizEntity {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: "Capitals".into(),
            description: None,
            questions: (0..questions)
                .map(|position| QuestionEntity {
                    id: Uuid::new_v4(),
                    position,
                    text: format!("Q{position}"),
                    time_limit_secs: 10,
                    options: vec![
                        OptionEntity {
                            id: Uuid::new_v4(),
                            text: "A".into(),
                            is_correct: true,
                        },
                        OptionEntity {
                            id: Uuid::new_v4(),
                            text: "B".into(),
                            is_correct: false,
                        },
                    ],
                })
                .collect(),
            created_at: SystemTime::UNIX_EPOCH,
        }
    }

    fn answer(player_id: Uuid, question_index: usize, is_correct: bool, at: u64) -> AnswerEntity {
        AnswerEntity {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            player_id,
            question_index,
            option_id: Uuid::new_v4(),
            is_correct,
            time_taken_ms: 2_000,
            submitted_at: SystemTime::UNIX_EPOCH + Duration::from_secs(at),
        }
    }

    #[test]
    fn flat_policy_awards_fixed_points_for_correct_answers_only() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.points(true, 9_999, 10), 100);
        assert_eq!(policy.points(false, 0, 10), 0);
    }

    #[test]
    fn time_bonus_shrinks_linearly() {
        let policy = ScoringPolicy::TimeBonus {
            base: 100,
            max_bonus: 100,
        };
        assert_eq!(policy.points(true, 0, 10), 200);
        assert_eq!(policy.points(true, 5_000, 10), 150);
        assert_eq!(policy.points(true, 30_000, 10), 100);
    }

    #[test]
    fn replay_ignores_later_duplicates_and_other_players() {
        let quiz = quiz(2);
        let player = Uuid::new_v4();
        let other = Uuid::new_v4();
        let log = vec![
            answer(player, 0, true, 1),
            answer(player, 0, false, 2),
            answer(player, 1, false, 3),
            answer(other, 1, true, 3),
        ];

        assert_eq!(ScoringPolicy::default().replay(&quiz, &log, player), 100);
        assert_eq!(ScoringPolicy::default().replay(&quiz, &log, other), 100);
    }

    #[test]
    fn replay_is_order_independent() {
        let quiz = quiz(3);
        let player = Uuid::new_v4();
        let mut log = vec![
            answer(player, 0, true, 1),
            answer(player, 1, true, 2),
            answer(player, 2, false, 3),
            answer(player, 1, false, 4),
        ];
        let forward = ScoringPolicy::default().replay(&quiz, &log, player);
        log.reverse();
        assert_eq!(ScoringPolicy::default().replay(&quiz, &log, player), forward);
        assert_eq!(forward, 200);
    }
}
