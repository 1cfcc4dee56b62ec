//! Card schema emitted to the messaging platform (spec §3 "Card", §6
//! "Card schema (abstract)"). This format must be emitted verbatim by the
//! Card Streamer — it is intentionally a small, platform-agnostic subset,
//! not a reproduction of any one platform's full card JSON (Non-goal).

use serde::{Deserialize, Serialize};

/// `headerTemplate` values and the color each maps to, per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardTemplate {
    Success,
    Error,
    Processing,
    Info,
    Warning,
    Welcome,
    Question,
}

impl CardTemplate {
    /// The color name this template renders as on the platform side.
    pub fn color(&self) -> &'static str {
        match self {
            CardTemplate::Success => "turquoise",
            CardTemplate::Error => "carmine",
            CardTemplate::Processing => "violet",
            CardTemplate::Info => "indigo",
            CardTemplate::Warning => "orange",
            CardTemplate::Welcome => "violet",
            CardTemplate::Question => "orange",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardHeader {
    pub title: String,
    pub template: CardTemplate,
}

impl CardHeader {
    pub fn new(title: impl Into<String>, template: CardTemplate) -> Self {
        Self {
            title: title.into(),
            template,
        }
    }
}

/// One option in a `select_static` / `multi_select_static` form element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// A form element inside a `form` card element (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormElement {
    SelectStatic {
        name: String,
        label: String,
        options: Vec<SelectOption>,
    },
    MultiSelectStatic {
        name: String,
        label: String,
        options: Vec<SelectOption>,
    },
    SubmitButton { label: String },
}

/// One element of a card's ordered body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CardElement {
    Markdown { text: String },
    Divider,
    Note { text: String },
    CollapsiblePanel {
        title: String,
        expanded: bool,
        children: Vec<CardElement>,
    },
    Form {
        name: String,
        elements: Vec<FormElement>,
    },
}

impl CardElement {
    pub fn markdown(text: impl Into<String>) -> Self {
        CardElement::Markdown { text: text.into() }
    }

    pub fn panel(
        title: impl Into<String>,
        expanded: bool,
        children: Vec<CardElement>,
    ) -> Self {
        CardElement::CollapsiblePanel {
            title: title.into(),
            expanded,
            children,
        }
    }
}

/// One renderable message. A single logical response may overflow into
/// several of these sharing an index position within a `messageId` list
/// (spec §3, §4.5 "Card list sync").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub header: CardHeader,
    pub elements: Vec<CardElement>,
}

impl Card {
    pub fn new(header: CardHeader) -> Self {
        Self {
            header,
            elements: Vec::new(),
        }
    }

    /// Size of this card once serialized, used against the per-card byte
    /// budget (spec §4.5, default 25 kB).
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_colors_match_spec_table() {
        assert_eq!(CardTemplate::Success.color(), "turquoise");
        assert_eq!(CardTemplate::Error.color(), "carmine");
        assert_eq!(CardTemplate::Processing.color(), "violet");
        assert_eq!(CardTemplate::Info.color(), "indigo");
        assert_eq!(CardTemplate::Warning.color(), "orange");
        assert_eq!(CardTemplate::Welcome.color(), "violet");
        assert_eq!(CardTemplate::Question.color(), "orange");
    }

    #[test]
    fn serialized_len_grows_with_content() {
        let mut card = Card::new(CardHeader::new("t", CardTemplate::Processing));
        let empty_len = card.serialized_len();
        card.elements.push(CardElement::markdown("x".repeat(1000)));
        assert!(card.serialized_len() > empty_len);
    }
}
