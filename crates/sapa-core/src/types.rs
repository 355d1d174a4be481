use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Conversation language. Serialized as `"vietnamese"` / `"english"`, the
/// same labels the ingestion pipeline writes into chunk metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    English,
    Vietnamese,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Vietnamese => "vietnamese",
        }
    }

    /// Name used when instructing the model which language to answer in.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Vietnamese => "Vietnamese (Tiếng Việt)",
        }
    }

    /// Apology returned when retrieval or generation is unavailable.
    pub fn apology(&self) -> &'static str {
        match self {
            Language::English => {
                "Sorry, an error occurred while processing your question. Please try again later."
            }
            Language::Vietnamese => {
                "Xin lỗi, đã xảy ra lỗi khi xử lý câu hỏi của bạn. Vui lòng thử lại sau."
            }
        }
    }

    /// Hedged answer used when nothing grounded could be produced.
    pub fn hedge(&self) -> &'static str {
        match self {
            Language::English => {
                "I don't have reliable information about that in my knowledge base, so I can't give a confident answer."
            }
            Language::Vietnamese => {
                "Tôi không có thông tin đáng tin cậy về vấn đề này trong cơ sở kiến thức, nên không thể trả lời chắc chắn."
            }
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "english" | "en" => Ok(Language::English),
            "vietnamese" | "vi" => Ok(Language::Vietnamese),
            other => Err(format!("unknown language '{}'", other)),
        }
    }
}

/// Author of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Kind of external link returned by the link-lookup tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Map,
    Review,
    Video,
    Article,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Map => "map",
            LinkType::Review => "review",
            LinkType::Video => "video",
            LinkType::Article => "article",
        }
    }
}

// =============================================================================
// Knowledge base
// =============================================================================

/// A pre-embedded piece of a knowledge-base document. Immutable once ingested.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub text: String,
    pub language: Language,
    pub source: String,
    pub category: String,
    pub embedding: Vec<f32>,
}

impl DocumentChunk {
    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            language: self.language,
            source: self.source.clone(),
            category: self.category.clone(),
        }
    }
}

/// Metadata carried alongside a chunk's vector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub language: Language,
    pub source: String,
    pub category: String,
}

/// A chunk returned from a similarity query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub chunk_id: String,
    pub text: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    pub metadata: ChunkMetadata,
}

// =============================================================================
// Tools
// =============================================================================

/// An external resource related to a topic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(rename = "type")]
    pub link_type: LinkType,
    pub url: String,
    pub label: String,
}

/// Declaration of a callable tool as advertised to the generative model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: serde_json::Value,
}

/// Outcome of a tool call as recorded in the transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ToolOutcome {
    Links(Vec<Link>),
    Error(String),
}

/// A single tool call made while producing an assistant turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub result: ToolOutcome,
}

// =============================================================================
// Sessions
// =============================================================================

/// One message in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_ups: Vec<String>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
            language: None,
            follow_ups: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            ..Self::user(content)
        }
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolInvocation>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_follow_ups(mut self, follow_ups: Vec<String>) -> Self {
        self.follow_ups = follow_ups;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// An ordered, append-only conversation transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A session with no turns yet.
    pub fn empty(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// The first user message, used as a list preview.
    pub fn first_user_message(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }
}

/// Listing entry for a stored session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub preview: String,
    pub turn_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
