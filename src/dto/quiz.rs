//! Quiz authoring payloads.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dao::models::{OptionEntity, QuestionEntity, QuizEntity},
    dto::{
        format_system_time,
        validation::{validate_question_options, validate_time_limit},
    },
};

/// Payload used to author a new quiz.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateQuizRequest {
    /// Display title.
    #[validate(length(min = 1, max = 120, message = "Title must be between 1 and 120 characters"))]
    pub title: String,
    /// Optional blurb shown to the host.
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    /// Questions in play order.
    #[validate(length(min = 1, message = "A quiz needs at least one question"), nested)]
    pub questions: Vec<QuestionInput>,
}

/// One question of a quiz being authored.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QuestionInput {
    /// Prompt shown to players.
    pub text: String,
    /// Seconds allowed, between 5 and 240.
    pub time_limit_secs: u32,
    /// Between 2 and 8 choices, at least one of them correct.
    pub options: Vec<OptionInput>,
}

impl Validate for QuestionInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.text.trim().is_empty() {
            let mut err = validator::ValidationError::new("text_blank");
            err.message = Some("Question text must not be empty".into());
            errors.add("text", err);
        }

        if let Err(e) = validate_time_limit(self.time_limit_secs) {
            errors.add("time_limit_secs", e);
        }

        let correct = self.options.iter().filter(|option| option.is_correct).count();
        if let Err(e) = validate_question_options(self.options.len(), correct) {
            errors.add("options", e);
        }

        if self.options.iter().any(|option| option.text.trim().is_empty()) {
            let mut err = validator::ValidationError::new("option_text_blank");
            err.message = Some("Option text must not be empty".into());
            errors.add("options", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// One answer choice of a question being authored.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OptionInput {
    /// Choice label.
    pub text: String,
    /// Whether picking this choice scores.
    #[serde(default)]
    pub is_correct: bool,
}

impl CreateQuizRequest {
    /// Turn the validated payload into an entity owned by `owner_id`.
    pub fn into_entity(self, owner_id: Uuid) -> QuizEntity {
        QuizEntity {
            id: Uuid::new_v4(),
            owner_id,
            title: self.title.trim().to_owned(),
            description: self.description,
            questions: self
                .questions
                .into_iter()
                .enumerate()
                .map(|(position, question)| QuestionEntity {
                    id: Uuid::new_v4(),
                    position,
                    text: question.text.trim().to_owned(),
                    time_limit_secs: question.time_limit_secs,
                    options: question
                        .options
                        .into_iter()
                        .map(|option| OptionEntity {
                            id: Uuid::new_v4(),
                            text: option.text.trim().to_owned(),
                            is_correct: option.is_correct,
                        })
                        .collect(),
                })
                .collect(),
            created_at: SystemTime::now(),
        }
    }
}

/// Host-facing projection of a quiz, correct answers included.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuizView {
    /// Quiz identifier.
    pub id: Uuid,
    /// Host that authored the quiz.
    pub owner_id: Uuid,
    /// Display title.
    pub title: String,
    /// Optional blurb.
    pub description: Option<String>,
    /// Questions in play order.
    pub questions: Vec<QuestionView>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// Question as stored, with its choices.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuestionView {
    /// Question identifier.
    pub id: Uuid,
    /// Zero-based play position.
    pub position: usize,
    /// Prompt shown to players.
    pub text: String,
    /// Seconds allowed.
    pub time_limit_secs: u32,
    /// Choices in display order.
    pub options: Vec<OptionView>,
}

/// Answer choice including its correctness flag.
#[derive(Debug, Serialize, ToSchema)]
pub struct OptionView {
    /// Option identifier.
    pub id: Uuid,
    /// Choice label.
    pub text: String,
    /// Whether picking this choice scores.
    pub is_correct: bool,
}

impl From<&QuizEntity> for QuizView {
    fn from(quiz: &QuizEntity) -> Self {
        Self {
            id: quiz.id,
            owner_id: quiz.owner_id,
            title: quiz.title.clone(),
            description: quiz.description.clone(),
            questions: quiz
                .questions
                .iter()
                .map(|question| QuestionView {
                    id: question.id,
                    position: question.position,
                    text: question.text.clone(),
                    time_limit_secs: question.time_limit_secs,
                    options: question
                        .options
                        .iter()
                        .map(|option| OptionView {
                            id: option.id,
                            text: option.text.clone(),
                            is_correct: option.is_correct,
                        })
                        .collect(),
                })
                .collect(),
            created_at: format_system_time(quiz.created_at),
        }
    }
}
