//! Question Protocol (spec §4.6 "C6 Question Protocol").
//!
//! Grounded on the teacher's `panels/*` modules (`bin_telegram/src/
//! panels/model.rs`, `.../namespace.rs`): inline-keyboard "pick one"
//! flows that persist a pending selection keyed by chat, then resolve it
//! on a follow-up callback. This module generalizes that one-shot
//! single-select panel into the spec's multi-question, form-or-text-
//! answer protocol with its explicit exclusivity invariant (P7).

use std::sync::Arc;

use dashmap::DashMap;
use lanebridge_core::card::{Card, CardElement, CardHeader, CardTemplate, FormElement, SelectOption};
use lanebridge_core::question::{PendingQuestion, Question, QuestionKind};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum QuestionError {
    #[error("no pending question for chat {0:?}")]
    NoPendingQuestion(String),
    #[error("question index {0} out of range")]
    QuestionIndexOutOfRange(usize),
}

/// Owns the one-pending-question-per-chat map (spec §3, §8 property P7).
#[derive(Default)]
pub struct QuestionProtocol {
    pending: DashMap<String, PendingQuestion>,
}

impl QuestionProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending(&self, chat_id: &str) -> bool {
        self.pending.contains_key(chat_id)
    }

    pub fn pending_for(&self, chat_id: &str) -> Option<PendingQuestion> {
        self.pending.get(chat_id).map(|entry| entry.clone())
    }

    /// Persist a newly asked question (spec §4.6 step 3). If one is
    /// already pending for this chat (a protocol violation the spec
    /// doesn't explicitly resolve), the new one wins and the stale one
    /// is logged and dropped — matching the "at most one" invariant by
    /// construction rather than by rejecting the new question.
    pub fn ask(&self, pq: PendingQuestion) {
        if let Some(previous) = self.pending.insert(pq.chat_id.clone(), pq) {
            warn!(
                chat_id = %previous.chat_id,
                request_id = %previous.request_id,
                "a new question.asked arrived while one was already pending; replacing it"
            );
        }
    }

    /// Form submit path (spec §4.6): map one question's answer by index
    /// back to option labels. Returns the full answer set once every
    /// question is answered, clearing the pending entry (submissions
    /// clear it, per the invariant).
    pub fn submit_form(
        &self,
        chat_id: &str,
        question_index: usize,
        option_indices: &[usize],
    ) -> Result<Option<Vec<Vec<String>>>, QuestionError> {
        let mut entry = self
            .pending
            .get_mut(chat_id)
            .ok_or_else(|| QuestionError::NoPendingQuestion(chat_id.to_string()))?;

        let question = entry
            .questions
            .get(question_index)
            .ok_or(QuestionError::QuestionIndexOutOfRange(question_index))?;
        let labels = labels_from_indices(question, option_indices);
        entry.set_answer(question_index, labels);

        if let Some(answers) = entry.answers_for_reply() {
            drop(entry);
            self.pending.remove(chat_id);
            return Ok(Some(answers));
        }
        Ok(None)
    }

    /// Free-text answer path (spec §4.6): the next plain text message in
    /// the chat fills every unanswered slot with the same text.
    pub fn submit_text(&self, chat_id: &str, text: &str) -> Option<Vec<Vec<String>>> {
        let mut entry = self.pending.get_mut(chat_id)?;
        entry.fill_all_with(text);
        let answers = entry.answers_for_reply();
        if answers.is_some() {
            drop(entry);
            self.pending.remove(chat_id);
        }
        answers
    }

    /// Rejection path (spec §4.6: `agent.rejectQuestion(requestId)` is
    /// the caller's responsibility; this just clears local state).
    pub fn reject(&self, chat_id: &str) -> Option<PendingQuestion> {
        self.pending.remove(chat_id).map(|(_, pq)| pq)
    }

    pub fn clear(&self, chat_id: &str) {
        self.pending.remove(chat_id);
    }
}

fn labels_from_indices(question: &Question, indices: &[usize]) -> Vec<String> {
    indices
        .iter()
        .filter_map(|&i| question.options.get(i))
        .map(|opt| opt.label.clone())
        .collect()
}

/// Render a question card (spec §4.6 step 2): a per-question form with
/// `select_static` (single) or `multi_select_static` (multiple) plus a
/// submit button, or the answered summary once submitted.
pub fn render_question_card(pq: &PendingQuestion, answered: bool) -> Card {
    let mut card = Card::new(CardHeader::new("Question", CardTemplate::Question));

    if answered {
        for (question, answer) in pq.questions.iter().zip(&pq.answers) {
            let answer_text = answer.as_ref().map(|a| a.join(", ")).unwrap_or_else(|| "(unanswered)".to_string());
            card.elements.push(CardElement::markdown(format!("**{}**\n{}", question.text, answer_text)));
        }
        return card;
    }

    for question in &pq.questions {
        card.elements.push(CardElement::markdown(question.text.clone()));
        let options: Vec<SelectOption> = question.options.clone();
        let form_element = match question.kind {
            QuestionKind::Single => FormElement::SelectStatic { name: question.id.clone(), label: question.text.clone(), options },
            QuestionKind::Multiple => FormElement::MultiSelectStatic { name: question.id.clone(), label: question.text.clone(), options },
        };
        card.elements.push(CardElement::Form { name: question.id.clone(), elements: vec![form_element] });
    }
    card.elements.push(CardElement::Form {
        name: "submit".to_string(),
        elements: vec![FormElement::SubmitButton { label: "Submit".to_string() }],
    });
    card
}

#[allow(dead_code)]
pub type SharedQuestionProtocol = Arc<QuestionProtocol>;
