//! Wire types of the Monica backend: the chat request body, the events of its
//! SSE stream, and the image tool job bodies.

use serde::{Deserialize, Deserializer, Serialize};

pub const AGENT_THINKING: &str = "thinking";
pub const AGENT_THINKING_DETAIL: &str = "thinking_detail_stream";

// ---------------------------------------------------------------------------
// Chat request (what we send TO the backend)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendChatRequest {
    pub task_uid: String,
    pub bot_uid: String,
    pub data: ConversationData,
    pub language: String,
    pub locale: String,
    pub task_type: String,
    pub tool_data: ToolData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationData {
    pub conversation_id: String,
    pub items: Vec<ConversationItem>,
    pub pre_generated_reply_id: String,
    pub pre_parent_item_id: String,
    pub origin: String,
    pub origin_page_title: String,
    pub trigger_by: String,
    pub use_model: String,
    pub is_incognito: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    pub conversation_id: String,
    pub item_id: String,
    /// "question" or "reply"
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_item_id: Option<String>,
    pub data: ItemData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemData {
    #[serde(rename = "type")]
    pub data_type: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolData {
    pub sys_skill_list: Vec<String>,
}

// ---------------------------------------------------------------------------
// Stream events (what the backend sends back, one per `data: ` line)
// ---------------------------------------------------------------------------

/// Explicit `null` decodes like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_status: Option<AgentStatus>,
}

impl BackendEvent {
    /// Kind of the out-of-band agent signal, if any. An empty kind counts as none.
    pub fn agent_kind(&self) -> Option<&str> {
        self.agent_status
            .as_ref()
            .map(|s| s.kind.as_str())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    #[serde(default, deserialize_with = "null_as_default")]
    pub uid: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: AgentMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reasoning_detail: String,
}

// ---------------------------------------------------------------------------
// Image tools
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageJobRequest {
    pub task_uid: String,
    pub image_count: u32,
    pub prompt: String,
    pub model_type: String,
    pub aspect_ratio: String,
    pub task_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePollRequest {
    pub image_tools_id: i64,
}

/// Envelope shared by all image tool responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageEnvelope<T> {
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub msg: String,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageJob {
    #[serde(default)]
    pub image_tools_id: i64,
    /// Seconds the backend expects the job to take.
    #[serde(default)]
    pub expected_time: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImagePollData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub record: ImageRecord,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub result: ImageResult,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub cdn_url_list: Vec<String>,
}
