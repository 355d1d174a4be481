//! Prompt assembly for a conversation turn.
//!
//! A request is the system policy (answer language, grounding rules, tool
//! instructions and the retrieved passages) followed by the most recent
//! history turns and the new query.

use unicode_segmentation::UnicodeSegmentation;

use sapa_core::types::{Language, RetrievedPassage, Role, Turn};
use sapa_llm::ChatMessage;
use sapa_tools::LINK_LOOKUP_TOOL;

/// Marker placed in the system prompt when retrieval found nothing.
pub const NO_CONTEXT_MARKER: &str = "No relevant information found in knowledge base.";

/// Truncate `text` to at most `max` grapheme clusters.
///
/// Returns the input unchanged when it is already short enough.
pub fn truncate_graphemes(text: &str, max: usize) -> &str {
    match text.grapheme_indices(true).nth(max) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

/// Render passages as numbered `[Source i - category (language)]` blocks.
pub fn format_context(passages: &[RetrievedPassage]) -> String {
    if passages.is_empty() {
        return NO_CONTEXT_MARKER.to_string();
    }

    passages
        .iter()
        .enumerate()
        .map(|(i, p)| {
            format!(
                "[Source {} - {} ({})]\n{}\n",
                i + 1,
                p.metadata.category,
                p.metadata.language,
                p.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// System policy for one turn.
pub fn system_prompt(language: Language, passages: &[RetrievedPassage]) -> String {
    let grounding = if passages.is_empty() {
        "The knowledge base has nothing on this question. Say plainly that you are not sure, \
         keep the answer short and do not invent facts, prices or opening hours."
    } else {
        "Base your answer on the context below. If the context does not cover part of the \
         question, say so honestly instead of guessing."
    };

    format!(
        "You are a friendly travel advisor for Vietnam. You help with destinations, food, \
         culture and practical travel tips.\n\
         \n\
         Rules:\n\
         1. Respond in {language} only, whatever language the context is written in.\n\
         2. {grounding}\n\
         3. When you recommend a place, dish or activity, call the {tool} function to attach \
         maps, reviews, videos or articles.\n\
         4. Be concise and informative.\n\
         \n\
         Context from knowledge base:\n\
         {context}",
        language = language.display_name(),
        grounding = grounding,
        tool = LINK_LOOKUP_TOOL,
        context = format_context(passages),
    )
}

/// The last `window` turns of `history`, oldest first.
pub fn history_window(history: &[Turn], window: usize) -> &[Turn] {
    &history[history.len().saturating_sub(window)..]
}

/// Build the full message list for the first model call of a turn.
///
/// Tool invocations stored on past turns are not replayed; only their
/// final text is.
pub fn build_messages(
    language: Language,
    passages: &[RetrievedPassage],
    history: &[Turn],
    window: usize,
    query: &str,
) -> Vec<ChatMessage> {
    let recent = history_window(history, window);
    let mut messages = Vec::with_capacity(recent.len() + 2);
    messages.push(ChatMessage::system(system_prompt(language, passages)));
    messages.extend(recent.iter().map(|turn| match turn.role {
        Role::User => ChatMessage::user(turn.content.clone()),
        Role::Assistant => ChatMessage::assistant(turn.content.clone()),
    }));
    messages.push(ChatMessage::user(query));
    messages
}
