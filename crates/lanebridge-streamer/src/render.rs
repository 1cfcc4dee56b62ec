//! Group-consecutive rendering of [`OrderedPart`]s into [`Card`]s (spec
//! §4.5 "Rendering").
//!
//! Grounded on the teacher's `markdown_to_telegram_html` / `chunk_message`
//! (`bin_telegram/src/send.rs`): both turn an internal text model into a
//! platform's renderable chunks under a hard size limit, falling back to
//! a new chunk/card when the current one is full. This module
//! generalizes "chunk by character count" into "group by part kind, cap
//! each block's rendered size, then pack blocks into cards under a byte
//! budget."

use lanebridge_core::card::{Card, CardElement, CardHeader, CardTemplate};
use lanebridge_core::part::{OrderedPart, PartPayload, ToolCallState};

/// Tunables for rendering (spec §4.5 defaults).
#[derive(Debug, Clone, Copy)]
pub struct RenderConfig {
    /// Default 25 kB.
    pub per_card_byte_budget: usize,
    /// Default 3 kB.
    pub reasoning_cap_bytes: usize,
    /// Default 5 kB.
    pub tool_output_cap_bytes: usize,
    /// Default 28 kB.
    pub markdown_cap_bytes: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            per_card_byte_budget: 25 * 1024,
            reasoning_cap_bytes: 3 * 1024,
            tool_output_cap_bytes: 5 * 1024,
            markdown_cap_bytes: 28 * 1024,
        }
    }
}

const TRUNCATION_SUFFIX: &str = "\n\n…(truncated)";

/// Truncate `s` to at most `cap` bytes on a char boundary, appending a
/// visible suffix when truncation actually happened.
fn truncate_bytes(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        return s.to_string();
    }
    let mut end = cap.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &s[..end], TRUNCATION_SUFFIX)
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum PartKind {
    Text,
    Reasoning,
    ToolCall,
}

fn kind_of(part: &OrderedPart) -> PartKind {
    match &part.payload {
        PartPayload::Text { .. } => PartKind::Text,
        PartPayload::Reasoning { .. } => PartKind::Reasoning,
        PartPayload::ToolCall { .. } => PartKind::ToolCall,
    }
}

fn tool_state_glyph(state: ToolCallState) -> &'static str {
    match state {
        ToolCallState::Pending => "pending",
        ToolCallState::Running => "running",
        ToolCallState::Completed => "done",
        ToolCallState::Error => "error",
    }
}

fn tool_call_panel(part: &OrderedPart, config: &RenderConfig) -> CardElement {
    let PartPayload::ToolCall { name, state, input, output, error, time, subtask } = &part.payload else {
        unreachable!("caller only passes tool-call parts")
    };

    let mut title = format!("{name} ({})", tool_state_glyph(*state));
    // Numeric semantics (spec §4.4): durations >= 100ms are rendered.
    if let Some(ms) = time {
        if *ms >= 100 {
            title.push_str(&format!(" · {ms}ms"));
        }
    }

    let mut children = Vec::new();
    children.push(CardElement::markdown(format!(
        "**input**\n```json\n{}\n```",
        serde_json::to_string_pretty(input).unwrap_or_default()
    )));

    let mut body = String::new();
    if let Some(output) = output {
        body.push_str(&serde_json::to_string_pretty(output).unwrap_or_default());
    }
    if let Some(error) = error {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str("error: ");
        body.push_str(error);
    }
    if !body.is_empty() {
        children.push(CardElement::markdown(format!(
            "**output**\n```\n{}\n```",
            truncate_bytes(&body, config.tool_output_cap_bytes)
        )));
    }

    if let Some(subtask) = subtask {
        children.push(CardElement::Divider);
        children.push(render_subtask(subtask, config));
    }

    CardElement::panel(title, *state == ToolCallState::Running, children)
}

fn render_subtask(subtask: &lanebridge_core::part::SubtaskInfo, config: &RenderConfig) -> CardElement {
    let mut lines = vec![format!("**{}** — {}", subtask.agent_type, subtask.description)];
    lines.push(format!("tools run: {}", subtask.tool_count));
    if let Some(current) = &subtask.current_tool {
        lines.push(format!("current: {current}"));
    }
    if let Some(streaming) = &subtask.streaming_text {
        lines.push(format!("> {}", truncate_chars(streaming, 500)));
    }
    if let Some(summary) = &subtask.summary {
        lines.push(format!(
            "files changed: {} (+{} -{})",
            summary.files.len(),
            summary.additions,
            summary.deletions
        ));
    }
    if let Some(conclusion) = &subtask.conclusion {
        lines.push(format!("conclusion: {conclusion}"));
    }
    CardElement::markdown(truncate_bytes(&lines.join("\n"), config.reasoning_cap_bytes))
}

/// Truncate to at most `max_chars` Unicode scalar values (spec §4.8
/// "truncated to 500 chars for display").
fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}…")
}

/// Convert parts into card elements by grouping consecutive runs of the
/// same kind (spec §4.5 "group-consecutive"): a run of text parts
/// flattens into one markdown block, a run of reasoning parts into one
/// collapsible panel, and each tool-call keeps its own panel (distinct
/// tool invocations are never merged even when consecutive).
pub fn render_elements(parts: &[OrderedPart], config: &RenderConfig) -> Vec<CardElement> {
    let mut elements = Vec::new();
    let mut i = 0;
    while i < parts.len() {
        let kind = kind_of(&parts[i]);
        match kind {
            PartKind::Text => {
                let mut buf = String::new();
                while i < parts.len() && kind_of(&parts[i]) == PartKind::Text {
                    if let PartPayload::Text { text } = &parts[i].payload {
                        if !buf.is_empty() {
                            buf.push_str("\n\n");
                        }
                        buf.push_str(text);
                    }
                    i += 1;
                }
                elements.push(CardElement::markdown(truncate_bytes(&buf, config.markdown_cap_bytes)));
            }
            PartKind::Reasoning => {
                let mut buf = String::new();
                while i < parts.len() && kind_of(&parts[i]) == PartKind::Reasoning {
                    if let PartPayload::Reasoning { text } = &parts[i].payload {
                        if !buf.is_empty() {
                            buf.push_str("\n\n");
                        }
                        buf.push_str(text);
                    }
                    i += 1;
                }
                elements.push(CardElement::panel(
                    "Reasoning",
                    false,
                    vec![CardElement::markdown(truncate_bytes(&buf, config.reasoning_cap_bytes))],
                ));
            }
            PartKind::ToolCall => {
                elements.push(tool_call_panel(&parts[i], config));
                i += 1;
            }
        }
    }
    elements
}

fn element_len(el: &CardElement) -> usize {
    serde_json::to_vec(el).map(|b| b.len()).unwrap_or(0)
}

/// Pack rendered elements into one or more cards, overflowing into
/// continuation cards titled `<title> (续N)` once the per-card byte
/// budget is exceeded (spec §4.5 "Per-card byte budget").
pub fn pack_into_cards(
    elements: Vec<CardElement>,
    title: &str,
    template: CardTemplate,
    config: &RenderConfig,
) -> Vec<Card> {
    if elements.is_empty() {
        let header = CardHeader::new(title.to_string(), template);
        return vec![Card::new(header)];
    }

    let mut cards = Vec::new();
    let mut current = Card::new(CardHeader::new(title.to_string(), template));
    let mut current_len = current.serialized_len();

    for element in elements {
        let added = element_len(&element);
        if current_len + added > config.per_card_byte_budget && !current.elements.is_empty() {
            cards.push(current);
            let continuation_title = format!("{title} (续{})", cards.len() + 1);
            current = Card::new(CardHeader::new(continuation_title, template));
            current_len = current.serialized_len();
        }
        current_len += added;
        current.elements.push(element);
    }
    cards.push(current);
    cards
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanebridge_core::part::SubtaskInfo;
    use serde_json::json;

    #[test]
    fn consecutive_text_parts_fuse_into_one_markdown_block() {
        let parts = vec![OrderedPart::text("p1", "hello "), OrderedPart::text("p2", "world")];
        let elements = render_elements(&parts, &RenderConfig::default());
        assert_eq!(elements.len(), 1);
        assert!(matches!(&elements[0], CardElement::Markdown { text } if text.contains("hello") && text.contains("world")));
    }

    #[test]
    fn tool_calls_each_get_their_own_panel_even_when_consecutive() {
        let parts = vec![
            OrderedPart {
                part_id: "t1".into(),
                payload: PartPayload::ToolCall {
                    name: "bash".into(),
                    state: ToolCallState::Completed,
                    input: json!({}),
                    output: None,
                    error: None,
                    time: None,
                    subtask: None,
                },
            },
            OrderedPart {
                part_id: "t2".into(),
                payload: PartPayload::ToolCall {
                    name: "grep".into(),
                    state: ToolCallState::Completed,
                    input: json!({}),
                    output: None,
                    error: None,
                    time: None,
                    subtask: None,
                },
            },
        ];
        let elements = render_elements(&parts, &RenderConfig::default());
        assert_eq!(elements.len(), 2);
    }

    #[test]
    fn markdown_block_is_truncated_past_the_cap_with_visible_suffix() {
        let config = RenderConfig { markdown_cap_bytes: 10, ..RenderConfig::default() };
        let parts = vec![OrderedPart::text("p1", "0123456789ABCDEF")];
        let elements = render_elements(&parts, &config);
        let CardElement::Markdown { text } = &elements[0] else { panic!("expected markdown") };
        assert!(text.starts_with("0123456789"));
        assert!(text.contains("truncated"));
    }

    #[test]
    fn duration_under_100ms_is_not_rendered_in_the_title() {
        let part = OrderedPart {
            part_id: "t1".into(),
            payload: PartPayload::ToolCall {
                name: "bash".into(),
                state: ToolCallState::Completed,
                input: json!({}),
                output: None,
                error: None,
                time: Some(42),
                subtask: None,
            },
        };
        let elements = render_elements(&[part], &RenderConfig::default());
        let CardElement::CollapsiblePanel { title, .. } = &elements[0] else { panic!("expected panel") };
        assert!(!title.contains("ms"));
    }

    #[test]
    fn duration_at_or_over_100ms_is_rendered() {
        let part = OrderedPart {
            part_id: "t1".into(),
            payload: PartPayload::ToolCall {
                name: "bash".into(),
                state: ToolCallState::Completed,
                input: json!({}),
                output: None,
                error: None,
                time: Some(150),
                subtask: None,
            },
        };
        let elements = render_elements(&[part], &RenderConfig::default());
        let CardElement::CollapsiblePanel { title, .. } = &elements[0] else { panic!("expected panel") };
        assert!(title.contains("150ms"));
    }

    #[test]
    fn overflow_spills_into_a_continuation_card() {
        let config = RenderConfig { per_card_byte_budget: 200, ..RenderConfig::default() };
        let elements: Vec<CardElement> = (0..10)
            .map(|i| CardElement::markdown(format!("block {i}: {}", "x".repeat(30))))
            .collect();
        let cards = pack_into_cards(elements, "Reply", CardTemplate::Processing, &config);
        assert!(cards.len() > 1);
        assert_eq!(cards[1].header.title, "Reply (续2)");
    }

    #[test]
    fn single_small_response_stays_on_one_card() {
        let elements = vec![CardElement::markdown("hi")];
        let cards = pack_into_cards(elements, "Reply", CardTemplate::Success, &RenderConfig::default());
        assert_eq!(cards.len(), 1);
    }

    #[test]
    fn subtask_metadata_renders_inside_the_tool_call_panel() {
        let part = OrderedPart {
            part_id: "d1".into(),
            payload: PartPayload::ToolCall {
                name: "delegate_task".into(),
                state: ToolCallState::Completed,
                input: json!({}),
                output: None,
                error: None,
                time: None,
                subtask: Some(SubtaskInfo {
                    agent_type: "reviewer".into(),
                    description: "review PR".into(),
                    tool_count: 3,
                    current_tool: None,
                    summary: None,
                    conclusion: Some("looks good".into()),
                    prompt: None,
                    streaming_text: None,
                }),
            },
        };
        let elements = render_elements(&[part], &RenderConfig::default());
        let CardElement::CollapsiblePanel { children, .. } = &elements[0] else { panic!("expected panel") };
        let joined: String = children
            .iter()
            .filter_map(|c| match c {
                CardElement::Markdown { text } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert!(joined.contains("review PR"));
        assert!(joined.contains("looks good"));
    }
}
