use serde_json::Value;
use std::fmt;

/// Fully materialized test definition, as loaded by the attempts handler.
/// Question order does not affect scoring; only membership matters.
#[derive(Debug, Clone)]
pub struct TestDef {
    pub questions: Vec<QuestionDef>,
}

#[derive(Debug, Clone)]
pub struct QuestionDef {
    pub id: String,
    pub kind: QuestionKind,
    pub answers: Vec<AnswerDef>,
}

#[derive(Debug, Clone)]
pub struct AnswerDef {
    pub id: String,
    pub text: String,
    pub correct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    /// One answer row holding the canonical correct text.
    FreeText,
    /// Any number of answer rows, each flagged correct or not.
    Choice,
}

impl QuestionKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free_text" => Some(Self::FreeText),
            "choice" => Some(Self::Choice),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FreeText => "free_text",
            Self::Choice => "choice",
        }
    }
}

/// Submitted form data: answer id (stringified primary key) -> submitted value.
pub type Submission = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoringError {
    /// A test with zero questions has no per-question weight.
    EmptyTest,
    /// A question with zero answer rows has no match ratio (choice)
    /// and no canonical text (free text).
    NoAnswers { question_id: String },
}

impl ScoringError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyTest => "empty_test",
            Self::NoAnswers { .. } => "question_without_answers",
        }
    }
}

impl fmt::Display for ScoringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyTest => write!(f, "test has no questions"),
            Self::NoAnswers { question_id } => {
                write!(f, "question {} has no answers", question_id)
            }
        }
    }
}

impl std::error::Error for ScoringError {}

/// Form values arrive as JSON; an absent key, null, false, zero and the
/// empty string all mean "not selected".
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Free-text comparison key: trimmed, lower-cased.
fn normalized_text(s: &str) -> String {
    s.trim().to_lowercase()
}

fn submitted_text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(normalized_text(s)),
        Some(Value::Number(n)) => Some(normalized_text(&n.to_string())),
        Some(Value::Bool(b)) => Some(normalized_text(&b.to_string())),
        _ => None,
    }
}

/// Score a submission against a test definition.
///
/// Every question is worth `100 / question_count`. Choice questions earn
/// proportional credit: each answer row whose correct flag agrees with its
/// selection state counts toward the ratio, so leaving a wrong option
/// unselected earns the same share as picking a right one. Free-text
/// questions are all-or-nothing against the sole answer row; a skipped
/// question earns nothing rather than failing the whole attempt.
///
/// Pure function of its inputs: no I/O, no retained state, no rounding.
pub fn score_submission(test: &TestDef, submission: &Submission) -> Result<f64, ScoringError> {
    if test.questions.is_empty() {
        return Err(ScoringError::EmptyTest);
    }
    let question_score = 100.0 / test.questions.len() as f64;

    let mut total = 0.0;
    for question in &test.questions {
        if question.answers.is_empty() {
            return Err(ScoringError::NoAnswers {
                question_id: question.id.clone(),
            });
        }

        match question.kind {
            QuestionKind::Choice => {
                let mut matches = 0usize;
                for answer in &question.answers {
                    let selected = truthy(submission.get(&answer.id));
                    if answer.correct == selected {
                        matches += 1;
                    }
                }
                total += question_score * (matches as f64 / question.answers.len() as f64);
            }
            QuestionKind::FreeText => {
                let answer = &question.answers[0];
                let Some(submitted) = submitted_text(submission.get(&answer.id)) else {
                    continue;
                };
                if submitted == normalized_text(&answer.text) {
                    total += question_score;
                }
            }
        }
    }

    Ok(total)
}
