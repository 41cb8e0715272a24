use std::collections::HashSet;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::{
    dao::models::AnswerEntity,
    dto::session::{OptionCount, TallyView},
    state::scoring::dedupe_answers,
};

/// Result of feeding one answer into the tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TallyOutcome {
    /// The answer was counted.
    Counted,
    /// The player was already counted for this question.
    Duplicate,
    /// The answer targets another question.
    Stale,
    /// The option does not belong to the current question.
    UnknownOption,
}

/// Per-option counters for the current question only.
#[derive(Debug, Clone, Default)]
pub struct AnswerTally {
    question_index: Option<usize>,
    counts: IndexMap<Uuid, usize>,
    voters: HashSet<Uuid>,
}

impl AnswerTally {
    /// Empty tally not bound to any question.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the tally to a new question with one zeroed counter per option.
    pub fn reset(&mut self, question_index: usize, option_ids: impl IntoIterator<Item = Uuid>) {
        self.question_index = Some(question_index);
        self.counts = option_ids.into_iter().map(|id| (id, 0)).collect();
        self.voters.clear();
    }

    /// Count an answer once per player for the bound question.
    pub fn record(&mut self, player_id: Uuid, question_index: usize, option_id: Uuid) -> TallyOutcome {
        if self.question_index != Some(question_index) {
            return TallyOutcome::Stale;
        }
        if self.voters.contains(&player_id) {
            return TallyOutcome::Duplicate;
        }
        let Some(count) = self.counts.get_mut(&option_id) else {
            return TallyOutcome::UnknownOption;
        };

        *count += 1;
        self.voters.insert(player_id);
        TallyOutcome::Counted
    }

    /// Rebuild the counters from the authoritative answer log.
    pub fn rebuild<'a>(&mut self, answers: impl IntoIterator<Item = &'a AnswerEntity>) {
        let Some(index) = self.question_index else {
            return;
        };
        for count in self.counts.values_mut() {
            *count = 0;
        }
        self.voters.clear();

        for answer in dedupe_answers(answers.into_iter().filter(|a| a.question_index == index)) {
            self.record(answer.player_id, answer.question_index, answer.option_id);
        }
    }

    /// Question the tally is bound to.
    pub fn question_index(&self) -> Option<usize> {
        self.question_index
    }

    /// Number of counted answers.
    pub fn total(&self) -> usize {
        self.voters.len()
    }

    /// Counts with rounded percentages, in option order.
    pub fn snapshot(&self) -> TallyView {
        let total = self.total();
        TallyView {
            question_index: self.question_index,
            total,
            options: self
                .counts
                .iter()
                .map(|(option_id, count)| OptionCount {
                    option_id: *option_id,
                    count: *count,
                    percentage: percentage(*count, total),
                })
                .collect(),
        }
    }
}

/// `round(count / total * 100)` with halves rounded up; 0 when `total` is 0.
pub fn percentage(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((200 * count + total) / (2 * total)) as u32
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    #[test]
    fn percentages_round_and_handle_empty_total() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(1, 2), 50);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(4, 4), 100);
    }

    #[test]
    fn reset_creates_one_zeroed_entry_per_option() {
        let options = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let mut tally = AnswerTally::new();
        tally.reset(0, options);
        tally.record(Uuid::new_v4(), 0, options[0]);

        tally.reset(1, options);
        let view = tally.snapshot();
        assert_eq!(view.question_index, Some(1));
        assert_eq!(view.total, 0);
        assert_eq!(view.options.len(), 3);
        assert!(view.options.iter().all(|o| o.count == 0 && o.percentage == 0));
    }

    #[test]
    fn duplicates_and_stale_answers_are_not_counted() {
        let options = [Uuid::new_v4(), Uuid::new_v4()];
        let player = Uuid::new_v4();
        let mut tally = AnswerTally::new();
        tally.reset(2, options);

        assert_eq!(tally.record(player, 2, options[0]), TallyOutcome::Counted);
        assert_eq!(tally.record(player, 2, options[1]), TallyOutcome::Duplicate);
        assert_eq!(tally.record(Uuid::new_v4(), 1, options[0]), TallyOutcome::Stale);
        assert_eq!(
            tally.record(Uuid::new_v4(), 2, Uuid::new_v4()),
            TallyOutcome::UnknownOption
        );

        let view = tally.snapshot();
        assert_eq!(view.total, 1);
        assert_eq!(view.options.iter().map(|o| o.count).sum::<usize>(), 1);
    }

    #[test]
    fn rebuild_matches_answer_log() {
        let options = [Uuid::new_v4(), Uuid::new_v4()];
        let players = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let answer = |player: Uuid, index: usize, option: Uuid| AnswerEntity {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            player_id: player,
            question_index: index,
            option_id: option,
            is_correct: option == options[0],
            time_taken_ms: 0,
            submitted_at: SystemTime::now(),
        };
        let log = vec![
            answer(players[0], 0, options[0]),
            answer(players[1], 0, options[1]),
            answer(players[2], 0, options[1]),
            answer(players[0], 1, options[1]),
        ];

        let mut tally = AnswerTally::new();
        tally.reset(0, options);
        tally.record(players[0], 0, options[0]);
        tally.rebuild(&log);

        let view = tally.snapshot();
        assert_eq!(view.total, 3);
        assert_eq!(view.options[0].count, 1);
        assert_eq!(view.options[0].percentage, 33);
        assert_eq!(view.options[1].count, 2);
        assert_eq!(view.options[1].percentage, 67);
    }
}
