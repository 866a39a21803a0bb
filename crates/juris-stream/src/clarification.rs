use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::errors::JurisError;
use crate::extract;

const DEFAULT_TITLE: &str = "Informations complémentaires";

static QUESTIONS_JSON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:questions_json|questionsJson)"\s*:\s*("(?:[^"\\]|\\.)*")"#)
        .expect("valid questions_json pattern")
});
static QUESTIONS_ARRAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""questions"\s*:\s*\["#).expect("valid questions pattern"));
static TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""title"\s*:\s*("(?:[^"\\]|\\.)*")"#).expect("valid title pattern")
});

/// A backend request for more input, modeled as a question set.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Clarification {
    pub title: String,
    pub questions: Vec<Question>,
}

/// Kind of answer a question expects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    MultiChoice,
    #[default]
    Text,
    Amount,
}

impl QuestionKind {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "single_choice" | "singlechoice" | "choice" | "select" | "radio" => Self::SingleChoice,
            "multi_choice" | "multichoice" | "multiple_choice" | "multiplechoice" | "checkbox" => {
                Self::MultiChoice
            }
            "amount" | "number" | "currency" => Self::Amount,
            _ => Self::Text,
        }
    }
}

/// A selectable option of a choice question.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub label: String,
}

/// One question of a clarification.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    /// Prompt shown to the user.
    pub question: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub allow_other: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl Question {
    /// Parses a question leniently: snake_case or camelCase keys, options as
    /// `{id,label}` objects, `{value,label}` objects or bare strings.
    pub fn from_value(value: &Value) -> Option<Self> {
        let question = str_field(value, &["question", "prompt", "label", "text"])?;
        let id = str_field(value, &["id", "key", "name"]).unwrap_or_else(|| question.clone());
        let kind = str_field(value, &["type", "kind"])
            .map(|raw| QuestionKind::parse(&raw))
            .unwrap_or_default();
        let options = value
            .get("options")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_option).collect())
            .unwrap_or_default();
        Some(Self {
            id,
            question,
            kind,
            options,
            allow_other: bool_field(value, &["allowOther", "allow_other"]),
            placeholder: str_field(value, &["placeholder"]),
            required: bool_field(value, &["required"]),
        })
    }

    fn option_label(&self, id: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|opt| opt.id == id)
            .map(|opt| opt.label.as_str())
    }

    /// Label of the option `id`, or `id` itself when no option matches.
    fn choice_label(&self, id: &str) -> String {
        if let Some(label) = self.option_label(id) {
            return label.to_string();
        }
        if !self.options.is_empty() && !self.allow_other {
            debug!(question = %self.id, choice = id, "choice is not a listed option; sending as typed");
        }
        id.trim().to_string()
    }
}

fn parse_option(value: &Value) -> Option<QuestionOption> {
    if let Some(raw) = value.as_str() {
        return Some(QuestionOption {
            id: raw.to_string(),
            label: raw.to_string(),
        });
    }
    let label = str_field(value, &["label", "text", "name"]);
    let id = str_field(value, &["id", "value"]).or_else(|| label.clone())?;
    Some(QuestionOption {
        label: label.unwrap_or_else(|| id.clone()),
        id,
    })
}

fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn bool_field(value: &Value, keys: &[&str]) -> bool {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_bool))
        .unwrap_or(false)
}

impl Clarification {
    /// Recognizes a clarification object.
    ///
    /// Accepts `questions` as an array, or `questions_json`/`questionsJson`
    /// as a string holding the array (or an object with `questions`) that
    /// needs a second parse. A `clarification` wrapper key is unwrapped.
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(inner) = value.get("clarification").filter(|v| v.is_object()) {
            return Self::from_value(inner);
        }
        let questions = match value.get("questions") {
            Some(Value::Array(items)) => parse_questions(items),
            _ => {
                let raw = ["questions_json", "questionsJson"]
                    .iter()
                    .find_map(|key| value.get(*key).and_then(Value::as_str))?;
                parse_questions_json(raw)?
            }
        };
        if questions.is_empty() {
            return None;
        }
        let title = str_field(value, &["title"]).unwrap_or_else(|| DEFAULT_TITLE.to_string());
        Some(Self { title, questions })
    }

    /// Looks for a clarification in streamed text.
    ///
    /// The text is run through the JSON extractor first. If that fails, a
    /// regex pass looks for a `questions_json` string or a `questions` array
    /// literal. The regex pass is a best-effort safety net for output that
    /// is not valid JSON as a whole.
    pub fn detect_in_text(text: &str) -> Option<Self> {
        if let Some(value) = extract::extract_json(text) {
            return Self::from_value(&value);
        }
        scan_for_questions(text)
    }

    /// Renders collected answers as the next user turn.
    ///
    /// Each answered question becomes a `prompt: answer` line, in question
    /// order. Choice ids are replaced by their labels. Free text, amounts and
    /// choices matching no option are used as typed. Multiple selections are
    /// joined with a comma.
    pub fn render_answers(&self, answers: &ClarificationAnswers) -> Result<String, JurisError> {
        let mut lines = Vec::with_capacity(self.questions.len());
        for question in &self.questions {
            let Some(answer) = answers.get(&question.id).filter(|a| !a.is_empty()) else {
                if question.required {
                    return Err(JurisError::Validation(format!(
                        "question '{}' requires an answer",
                        question.id
                    )));
                }
                continue;
            };
            let rendered = match answer {
                Answer::Text(text) => text.trim().to_string(),
                Answer::Choice(id) => question.choice_label(id),
                Answer::Choices(ids) => ids
                    .iter()
                    .filter(|id| !id.trim().is_empty())
                    .map(|id| question.choice_label(id))
                    .collect::<Vec<_>>()
                    .join(", "),
            };
            lines.push(format!("{}: {}", question.question, rendered));
        }
        Ok(lines.join("\n"))
    }
}

fn parse_questions(items: &[Value]) -> Vec<Question> {
    items.iter().filter_map(Question::from_value).collect()
}

fn parse_questions_json(raw: &str) -> Option<Vec<Question>> {
    let trimmed = extract::strip_code_fence(raw);
    let value = serde_json::from_str::<Value>(trimmed).ok()?;
    match &value {
        Value::Array(items) => Some(parse_questions(items)),
        Value::Object(_) => Clarification::from_value(&value).map(|c| c.questions),
        _ => None,
    }
}

fn scan_for_questions(text: &str) -> Option<Clarification> {
    let questions = if let Some(caps) = QUESTIONS_JSON_RE.captures(text) {
        let raw: String = serde_json::from_str(caps.get(1)?.as_str()).ok()?;
        parse_questions_json(&raw)?
    } else {
        let found = QUESTIONS_ARRAY_RE.find(text)?;
        let open = found.end() - 1;
        let close = matching_bracket(text, open)?;
        let items: Vec<Value> = serde_json::from_str(&text[open..=close]).ok()?;
        parse_questions(&items)
    };
    if questions.is_empty() {
        return None;
    }
    let title = TITLE_RE
        .captures(text)
        .and_then(|caps| serde_json::from_str::<String>(caps.get(1)?.as_str()).ok())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    Some(Clarification { title, questions })
}

fn matching_bracket(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in text.as_bytes()[open..].iter().enumerate() {
        if in_string {
            match *byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match *byte {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// One answer to a clarification question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Answer {
    /// Selected option id (or typed "other" value).
    Choice(String),
    /// Selected option ids.
    Choices(Vec<String>),
    /// Free text or amount, used as typed.
    Text(String),
}

impl Answer {
    fn is_empty(&self) -> bool {
        match self {
            Self::Choice(s) | Self::Text(s) => s.trim().is_empty(),
            Self::Choices(ids) => ids.iter().all(|id| id.trim().is_empty()),
        }
    }
}

/// Answers keyed by question id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClarificationAnswers {
    answers: HashMap<String, Answer>,
}

impl ClarificationAnswers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an answer, replacing any previous one for the same question.
    pub fn with(mut self, question_id: impl Into<String>, answer: Answer) -> Self {
        self.answers.insert(question_id.into(), answer);
        self
    }

    pub fn set(&mut self, question_id: impl Into<String>, answer: Answer) {
        self.answers.insert(question_id.into(), answer);
    }

    pub fn get(&self, question_id: &str) -> Option<&Answer> {
        self.answers.get(question_id)
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}
