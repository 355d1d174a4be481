//! Follow-up question suggestions.

use std::sync::Arc;

use tracing::{debug, warn};

use sapa_core::retry::RetryPolicy;
use sapa_core::types::{Language, RetrievedPassage};
use sapa_llm::{ChatMessage, ChatModel};

const MIN_FOLLOW_UPS: usize = 2;

/// Suggests questions the user may ask next, in the turn's language.
pub struct FollowUpGenerator {
    model: Arc<dyn ChatModel>,
    policy: RetryPolicy,
    max: usize,
}

impl FollowUpGenerator {
    pub fn new(model: Arc<dyn ChatModel>, policy: RetryPolicy, max: usize) -> Self {
        Self { model, policy, max }
    }

    /// Up to `max` suggestions derived from the answer, topped up from the
    /// categories of the retrieved passages. Never fails: a provider error
    /// yields an empty list, and an ungrounded turn gets no suggestions.
    pub async fn generate(
        &self,
        language: Language,
        question: &str,
        answer: &str,
        passages: &[RetrievedPassage],
    ) -> Vec<String> {
        if passages.is_empty() || self.max == 0 {
            return Vec::new();
        }

        let messages = vec![ChatMessage::user(follow_up_prompt(language, question, answer))];
        let reply = self
            .policy
            .run("follow_ups", || self.model.complete(&messages, &[]))
            .await;

        let mut suggestions = match reply {
            Ok(reply) => reply.text().map(parse_follow_ups).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Follow-up generation failed");
                return Vec::new();
            }
        };

        if suggestions.len() < MIN_FOLLOW_UPS {
            for category in categories(passages) {
                if suggestions.len() >= MIN_FOLLOW_UPS {
                    break;
                }
                let question = category_question(language, &category);
                if !suggestions.contains(&question) {
                    suggestions.push(question);
                }
            }
        }

        suggestions.truncate(self.max);
        debug!(count = suggestions.len(), "Follow-ups generated");
        suggestions
    }
}

/// Prompt asking the model for follow-up questions, written in the turn's
/// language so the suggestions come back in it too.
pub fn follow_up_prompt(language: Language, question: &str, answer: &str) -> String {
    match language {
        Language::Vietnamese => format!(
            "Dựa trên câu hỏi và câu trả lời dưới đây, hãy đề xuất 2-3 câu hỏi tiếp theo mà \
             người dùng có thể quan tâm.\n\n\
             Câu hỏi: {}\nCâu trả lời: {}\n\n\
             Chỉ trả về danh sách câu hỏi, mỗi câu một dòng, không giải thích thêm.",
            question, answer
        ),
        Language::English => format!(
            "Based on the question and answer below, suggest 2-3 follow-up questions the user \
             might be interested in.\n\n\
             Question: {}\nAnswer: {}\n\n\
             Return only the questions, one per line, with no extra explanation.",
            question, answer
        ),
    }
}

/// One question per non-empty line, with list numbering and bullets removed.
pub fn parse_follow_ups(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        let question = strip_list_marker(line.trim()).trim();
        if !question.is_empty() && !out.iter().any(|q| q == question) {
            out.push(question.to_string());
        }
    }
    out
}

/// Remove a leading `1.` / `2)` numbering or a `-` / `*` / `•` bullet. A
/// number that is part of the question ("3 days in ...") stays.
fn strip_list_marker(line: &str) -> &str {
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let rest = if digits > 0 {
        match line[digits..].strip_prefix(['.', ')']) {
            Some(rest) => rest,
            None => return line,
        }
    } else {
        match line.strip_prefix(['-', '*', '•']) {
            Some(rest) => rest,
            None => return line,
        }
    };
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        rest
    } else {
        line
    }
}

fn categories(passages: &[RetrievedPassage]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for p in passages {
        let category = p.metadata.category.trim();
        if !category.is_empty() && !seen.iter().any(|c| c == category) {
            seen.push(category.to_string());
        }
    }
    seen
}

fn category_question(language: Language, category: &str) -> String {
    let topic = category.replace('_', " ");
    match language {
        Language::Vietnamese => format!("Bạn có thể gợi ý thêm về {} không?", topic),
        Language::English => format!("What else would you recommend for {}?", topic),
    }
}
