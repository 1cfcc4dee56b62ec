//! Interactive question state (spec §3 "PendingQuestion", §4.6 "Question
//! Protocol").

use serde::{Deserialize, Serialize};

use crate::card::SelectOption;

/// Whether a question accepts one answer or several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Single,
    Multiple,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub kind: QuestionKind,
    pub options: Vec<SelectOption>,
}

/// At most one per chat (spec §3, §8 property P7). Created when the
/// agent emits `question.asked`; destroyed on submission, rejection, or
/// session teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingQuestion {
    pub request_id: String,
    pub message_id: String,
    pub questions: Vec<Question>,
    pub chat_id: String,
    /// Indexed the same as `questions`; `None` until answered.
    pub answers: Vec<Option<Vec<String>>>,
}

impl PendingQuestion {
    pub fn new(
        request_id: impl Into<String>,
        message_id: impl Into<String>,
        chat_id: impl Into<String>,
        questions: Vec<Question>,
    ) -> Self {
        let answer_slots = vec![None; questions.len()];
        Self {
            request_id: request_id.into(),
            message_id: message_id.into(),
            chat_id: chat_id.into(),
            questions,
            answers: answer_slots,
        }
    }

    pub fn is_fully_answered(&self) -> bool {
        self.answers.iter().all(Option::is_some)
    }

    /// Fill every unanswered slot with the same free-text answer (spec
    /// §4.6 "Text answer" path).
    pub fn fill_all_with(&mut self, text: &str) {
        for answer in self.answers.iter_mut() {
            if answer.is_none() {
                *answer = Some(vec![text.to_string()]);
            }
        }
    }

    pub fn set_answer(&mut self, question_index: usize, values: Vec<String>) -> bool {
        match self.answers.get_mut(question_index) {
            Some(slot) => {
                *slot = Some(values);
                true
            }
            None => false,
        }
    }

    /// The answers in backend call order, once every slot is filled.
    pub fn answers_for_reply(&self) -> Option<Vec<Vec<String>>> {
        self.answers.iter().cloned().collect()
    }
}
