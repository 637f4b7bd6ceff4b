//! Translate OpenAI Chat Completions requests into backend chat requests.
//!
//! The conversation is replayed as a chain of backend items: user and system
//! turns become `question` items, assistant turns become `reply` items, each
//! pointing at the previous one through `parent_item_id`.

use std::collections::HashMap;
use std::hash::BuildHasher;

use super::backend_types::{BackendChatRequest, ConversationData, ConversationItem, ItemData, ToolData};
use super::openai_types::ChatCompletionRequest;
use crate::error::{ProxyError, Result};
use crate::models::resolve_backend_model;

pub const DEFAULT_BOT_UID: &str = "monica";

/// Which backend bot receives the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotTarget<'a> {
    Default,
    Custom(&'a str),
}

/// Translate an OpenAI chat request into a backend chat request.
/// Pure apart from the fresh identifiers it mints.
pub fn openai_to_backend<S: BuildHasher>(
    req: &ChatCompletionRequest,
    target: BotTarget<'_>,
    locale: &str,
    model_map: &HashMap<String, String, S>,
) -> Result<BackendChatRequest> {
    if req.messages.is_empty() {
        return Err(ProxyError::EmptyMessages);
    }

    let conversation_id = format!("conv:{}", uuid::Uuid::new_v4());
    let mut items: Vec<ConversationItem> = Vec::with_capacity(req.messages.len());

    for msg in &req.messages {
        let item_type = match msg.role.as_str() {
            "assistant" => "reply",
            _ => "question",
        };
        let content = msg.content.as_ref().map(|c| c.as_text()).unwrap_or_default();

        items.push(ConversationItem {
            conversation_id: conversation_id.clone(),
            item_id: new_item_id(),
            item_type: item_type.to_string(),
            parent_item_id: items.last().map(|prev| prev.item_id.clone()),
            data: ItemData {
                data_type: "text".to_string(),
                content,
            },
        });
    }

    let pre_parent_item_id = items
        .last()
        .map(|item| item.item_id.clone())
        .unwrap_or_default();

    let bot_uid = match target {
        BotTarget::Default => DEFAULT_BOT_UID,
        BotTarget::Custom(uid) => uid,
    };

    Ok(BackendChatRequest {
        task_uid: format!("task:{}", uuid::Uuid::new_v4()),
        bot_uid: bot_uid.to_string(),
        data: ConversationData {
            conversation_id,
            items,
            pre_generated_reply_id: new_item_id(),
            pre_parent_item_id,
            origin: "https://monica.im/home".to_string(),
            origin_page_title: "Monica".to_string(),
            trigger_by: "auto".to_string(),
            use_model: resolve_backend_model(&req.model, model_map),
            is_incognito: true,
        },
        language: "auto".to_string(),
        locale: locale.to_string(),
        task_type: "chat".to_string(),
        tool_data: ToolData::default(),
    })
}

fn new_item_id() -> String {
    format!("msg:{}", uuid::Uuid::new_v4())
}
