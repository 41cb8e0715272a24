//! CSV report of a finished (or running) session.
//!
//! The report is a flat text file split into titled sections, every field
//! quoted, so spreadsheet tools import it without configuration.

use std::{collections::HashMap, fmt::Write};

use uuid::Uuid;

use crate::{
    dao::models::{AnswerEntity, PlayerEntity, QuizEntity, SessionEntity},
    dto::format_system_time,
    state::{leaderboard, scoring::dedupe_answers, tally::percentage},
};

/// Quote a field, doubling embedded quotes.
fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn row<I, S>(out: &mut String, fields: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let line = fields
        .into_iter()
        .map(|field| quote(field.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    let _ = writeln!(out, "{line}");
}

fn section(out: &mut String, title: &str) {
    if !out.is_empty() {
        out.push('\n');
    }
    let _ = writeln!(out, "# {title}");
}

/// Render the session report.
///
/// Sections: quiz metadata, leaderboard, correct answers per question,
/// answers per player and question, accuracy per question.
pub fn render_csv(
    quiz: &QuizEntity,
    session: &SessionEntity,
    players: &[PlayerEntity],
    answers: &[AnswerEntity],
) -> String {
    let mut out = String::new();
    let counted = dedupe_answers(answers.iter());
    let by_player: HashMap<(Uuid, usize), &AnswerEntity> = counted
        .iter()
        .map(|answer| ((answer.player_id, answer.question_index), *answer))
        .collect();
    let option_text = |index: usize, option_id: Uuid| -> String {
        quiz.questions
            .get(index)
            .and_then(|question| question.option(option_id))
            .map(|option| option.text.clone())
            .unwrap_or_default()
    };

    section(&mut out, "Quiz");
    row(&mut out, ["Field", "Value"]);
    row(&mut out, ["Title", quiz.title.as_str()]);
    row(
        &mut out,
        ["Description", quiz.description.as_deref().unwrap_or("")],
    );
    row(&mut out, ["Session", session.id.to_string().as_str()]);
    row(&mut out, ["Join code", session.join_code.as_str()]);
    row(&mut out, ["Mode", format!("{:?}", session.mode).as_str()]);
    row(&mut out, ["Status", format!("{:?}", session.status).as_str()]);
    row(
        &mut out,
        [
            "Started at".to_owned(),
            session.started_at.map(format_system_time).unwrap_or_default(),
        ],
    );
    row(
        &mut out,
        [
            "Ended at".to_owned(),
            session.ended_at.map(format_system_time).unwrap_or_default(),
        ],
    );
    row(&mut out, ["Questions".to_owned(), quiz.questions.len().to_string()]);
    row(&mut out, ["Players".to_owned(), players.len().to_string()]);

    section(&mut out, "Leaderboard");
    row(&mut out, ["Position", "Player", "Score", "Completed at"]);
    for entry in leaderboard::rank(players) {
        row(
            &mut out,
            [
                entry.position.to_string(),
                entry.display_name,
                entry.score.to_string(),
                entry.completed_at.unwrap_or_default(),
            ],
        );
    }

    section(&mut out, "Correct answers");
    row(&mut out, ["Question", "Text", "Correct options"]);
    for (index, question) in quiz.questions.iter().enumerate() {
        let correct = question
            .correct_options()
            .map(|option| option.text.as_str())
            .collect::<Vec<_>>()
            .join(" | ");
        row(
            &mut out,
            [(index + 1).to_string(), question.text.clone(), correct],
        );
    }

    section(&mut out, "Answers");
    row(
        &mut out,
        ["Player", "Question", "Answer", "Correct", "Time taken (ms)"],
    );
    for player in players {
        for index in 0..quiz.questions.len() {
            let fields = match by_player.get(&(player.id, index)) {
                Some(answer) => [
                    player.display_name.clone(),
                    (index + 1).to_string(),
                    option_text(index, answer.option_id),
                    if answer.is_correct { "yes" } else { "no" }.to_owned(),
                    answer.time_taken_ms.to_string(),
                ],
                None => [
                    player.display_name.clone(),
                    (index + 1).to_string(),
                    String::new(),
                    "no answer".to_owned(),
                    String::new(),
                ],
            };
            row(&mut out, fields);
        }
    }

    section(&mut out, "Accuracy");
    row(&mut out, ["Question", "Answers", "Correct", "Accuracy (%)"]);
    for index in 0..quiz.questions.len() {
        let question_answers = counted
            .iter()
            .filter(|answer| answer.question_index == index);
        let (total, correct) = question_answers.fold((0usize, 0usize), |(total, correct), a| {
            (total + 1, correct + usize::from(a.is_correct))
        });
        let accuracy = percentage(correct, total);
        row(
            &mut out,
            [
                (index + 1).to_string(),
                total.to_string(),
                correct.to_string(),
                accuracy.to_string(),
            ],
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::models::{
        OptionEntity, QuestionCursor, QuestionEntity, SessionMode, SessionStatus,
    };

    #[test]
    fn quotes_embedded_quotes() {
        assert_eq!(quote(r#"say "hi""#), r#""say ""hi""""#);
    }

    #[test]
    fn report_contains_every_section() {
        let right = Uuid::new_v4();
        let wrong = Uuid::new_v4();
        let quiz = QuizEntity {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: "Capitals, \"hard\" edition".into(),
            description: None,
            questions: vec![QuestionEntity {
                id: Uuid::new_v4(),
                position: 0,
                text: "Capital of Peru?".into(),
                time_limit_secs: 30,
                options: vec![
                    OptionEntity {
                        id: right,
                        text: "Lima".into(),
                        is_correct: true,
                    },
                    OptionEntity {
                        id: wrong,
                        text: "Cusco".into(),
                        is_correct: false,
                    },
                ],
            }],
            created_at: SystemTime::UNIX_EPOCH,
        };
        let session = SessionEntity {
            id: Uuid::new_v4(),
            quiz_id: quiz.id,
            host_id: quiz.owner_id,
            join_code: "123456".into(),
            mode: SessionMode::Live,
            status: SessionStatus::Completed,
            cursor: QuestionCursor::Ended,
            question_deadline: None,
            accepting_joins: false,
            created_at: SystemTime::UNIX_EPOCH,
            updated_at: SystemTime::UNIX_EPOCH,
            started_at: None,
            ended_at: None,
        };
        let player = |name: &str, score: u64| PlayerEntity {
            id: Uuid::new_v4(),
            session_id: session.id,
            display_name: name.into(),
            email: None,
            score,
            joined_at: SystemTime::UNIX_EPOCH,
            completed_at: None,
            progress: None,
        };
        let players = vec![player("Ada", 100), player("Bob", 0)];
        let answer = |player: &PlayerEntity, option_id: Uuid, is_correct: bool| AnswerEntity {
            id: Uuid::new_v4(),
            session_id: session.id,
            player_id: player.id,
            question_index: 0,
            option_id,
            is_correct,
            time_taken_ms: 1_500,
            submitted_at: SystemTime::UNIX_EPOCH,
        };
        let answers = vec![
            answer(&players[0], right, true),
            answer(&players[1], wrong, false),
        ];

        let csv = render_csv(&quiz, &session, &players, &answers);

        for title in ["# Quiz", "# Leaderboard", "# Correct answers", "# Answers", "# Accuracy"] {
            assert!(csv.contains(title), "missing section {title}");
        }
        assert!(csv.contains(r#""Title","Capitals, ""hard"" edition""#));
        assert!(csv.contains(r#""1","Ada","100","""#));
        assert!(csv.contains(r#""1","Capital of Peru?","Lima""#));
        assert!(csv.contains(r#""Bob","1","Cusco","no","1500""#));
        assert!(csv.contains(r#""1","2","1","50""#));
    }
}
