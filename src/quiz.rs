// Question validation and scoring for lesson quizzes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{Question, QuestionType};

#[derive(Error, Debug, PartialEq)]
pub enum QuizError {
    #[error("Questions array is required")]
    NoQuestions,
    #[error("Each question needs text and type")]
    MissingText,
    #[error("Multiple choice requires at least 2 options")]
    TooFewOptions,
    #[error("Invalid correct_answer index")]
    BadIndex,
    #[error("True/False requires correct_answer \"true\" or \"false\"")]
    BadTruth,
    #[error("Short answer requires a non-empty answer")]
    EmptyAnswer,
    #[error("Answers array is required")]
    NoAnswers,
}

/// A question as sent by the course editor. `id` is set on questions that already exist.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct QuestionInput {
    pub id: Option<i32>,
    #[serde(rename = "type")]
    pub kind: Option<QuestionType>,
    pub question: Option<String>,
    pub options: Option<Vec<String>>,
    pub correct_answer: Option<Value>,
    pub answer: Option<String>,
}

/// A question ready to be written to the `quizzes` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidQuestion {
    pub kind: QuestionType,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: i32,
    pub answer: Option<String>,
}

pub fn validate(input: &QuestionInput) -> Result<ValidQuestion, QuizError> {
    let question = input
        .question
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or(QuizError::MissingText)?
        .to_string();
    let kind = input.kind.ok_or(QuizError::MissingText)?;

    match kind {
        QuestionType::MultipleChoice => {
            let options = input.options.clone().unwrap_or_default();
            if options.len() < 2 {
                return Err(QuizError::TooFewOptions);
            }
            let idx = input
                .correct_answer
                .as_ref()
                .and_then(as_index)
                .filter(|i| (*i as usize) < options.len())
                .ok_or(QuizError::BadIndex)?;
            Ok(ValidQuestion {
                kind,
                question,
                options,
                correct_answer: idx,
                answer: None,
            })
        }
        QuestionType::TrueFalse => {
            let truth = input
                .correct_answer
                .as_ref()
                .and_then(as_truth)
                .ok_or(QuizError::BadTruth)?;
            Ok(ValidQuestion {
                kind,
                question,
                options: vec!["true".into(), "false".into()],
                correct_answer: i32::from(truth),
                answer: None,
            })
        }
        QuestionType::ShortAnswer => {
            let answer = input
                .answer
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .ok_or(QuizError::EmptyAnswer)?
                .to_string();
            Ok(ValidQuestion {
                kind,
                question,
                options: Vec::new(),
                correct_answer: 0,
                answer: Some(answer),
            })
        }
    }
}

/// Validates every new question of a batch; entries carrying an `id` are skipped.
pub fn validate_batch(inputs: &[QuestionInput]) -> Result<Vec<ValidQuestion>, QuizError> {
    if inputs.is_empty() {
        return Err(QuizError::NoQuestions);
    }
    inputs
        .iter()
        .filter(|q| q.id.is_none())
        .map(validate)
        .collect()
}

/// Overlays a partial edit on a stored question and validates the result, so a
/// type switch can't leave the row half-converted.
pub fn merge(stored: &Question, patch: &QuestionInput) -> Result<ValidQuestion, QuizError> {
    let correct_answer = patch.correct_answer.clone().or_else(|| match stored.kind {
        QuestionType::TrueFalse => Some(Value::Bool(stored.correct_answer == 1)),
        _ => Some(Value::from(stored.correct_answer)),
    });
    let merged = QuestionInput {
        id: Some(stored.id),
        kind: patch.kind.or(Some(stored.kind)),
        question: patch.question.clone().or_else(|| Some(stored.question.clone())),
        options: patch.options.clone().or_else(|| Some(stored.options.0.clone())),
        correct_answer,
        answer: patch.answer.clone().or_else(|| stored.answer.clone()),
    };
    validate(&merged)
}

fn as_index(v: &Value) -> Option<i32> {
    match v {
        Value::Number(n) => n.as_i64().and_then(|i| i32::try_from(i).ok()).filter(|i| *i >= 0),
        Value::String(s) => s.trim().parse::<i32>().ok().filter(|i| *i >= 0),
        _ => None,
    }
}

fn as_truth(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn is_correct(question: &Question, answer: Option<&Value>) -> bool {
    let Some(answer) = answer else {
        return false;
    };
    match question.kind {
        QuestionType::ShortAnswer => match (answer.as_str(), question.answer.as_deref()) {
            (Some(given), Some(expected)) => {
                given.trim().to_lowercase() == expected.trim().to_lowercase()
            }
            _ => false,
        },
        QuestionType::MultipleChoice => as_index(answer) == Some(question.correct_answer),
        QuestionType::TrueFalse => as_truth(answer) == Some(question.correct_answer == 1),
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub question_id: i32,
    pub user_answer: Value,
    pub correct_answer: Value,
    pub is_correct: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Graded {
    pub score: i32,
    pub total_questions: usize,
    pub correct_answers: usize,
    pub results: Vec<QuestionResult>,
}

/// Scores `answers` positionally against `questions` (ordered by id).
pub fn grade(questions: &[Question], answers: &[Value]) -> Graded {
    let results: Vec<QuestionResult> = questions
        .iter()
        .enumerate()
        .map(|(idx, q)| {
            let given = answers.get(idx);
            QuestionResult {
                question_id: q.id,
                user_answer: given.cloned().unwrap_or(Value::Null),
                correct_answer: match q.kind {
                    QuestionType::ShortAnswer => Value::from(q.answer.clone()),
                    _ => Value::from(q.correct_answer),
                },
                is_correct: is_correct(q, given),
            }
        })
        .collect();

    let correct = results.iter().filter(|r| r.is_correct).count();
    Graded {
        score: score(correct, questions.len()),
        total_questions: questions.len(),
        correct_answers: correct,
        results,
    }
}

/// `round(correct / total * 100)`, 0 for an empty quiz.
pub fn score(correct: usize, total: usize) -> i32 {
    if total == 0 {
        return 0;
    }
    let pct = (correct.min(total) as f64 / total as f64) * 100.0;
    pct.round() as i32
}
