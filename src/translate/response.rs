//! Fold a backend event stream into one OpenAI chat completion.

use futures::{Stream, StreamExt};

use super::backend_types::BackendEvent;
use super::openai_types::{
    ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage, COMPLETION_OBJECT, FINISH_STOP,
    ROLE_ASSISTANT,
};
use super::random_id;
use crate::error::Result;

/// Consume `events` to the end and return the aggregated completion.
///
/// Content is the in-order concatenation of every event's text, skipping
/// events that carry an agent status. The first error aborts the fold and no
/// partial completion is returned.
pub async fn collect_completion<S>(events: S, model: &str) -> Result<ChatCompletionResponse>
where
    S: Stream<Item = Result<BackendEvent>>,
{
    futures::pin_mut!(events);

    let mut content = String::new();
    while let Some(event) = events.next().await {
        let event = event?;
        if event.agent_kind().is_some() {
            continue;
        }
        content.push_str(&event.text);
    }

    Ok(completion(model, content))
}

/// Build a completion holding `content`. Usage is always zero because the
/// backend does not report token counts.
pub fn completion(model: &str, content: String) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: format!("chatcmpl-{}", random_id(29)),
        object: COMPLETION_OBJECT.to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: ROLE_ASSISTANT.to_string(),
                content,
            },
            finish_reason: Some(FINISH_STOP.to_string()),
        }],
        usage: ChatUsage::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;
    use crate::translate::backend_types::AgentStatus;
    use crate::translate::sse::{backend_events, SseLimits};
    use tokio_util::sync::CancellationToken;

    fn text(t: &str) -> BackendEvent {
        BackendEvent {
            text: t.to_string(),
            ..Default::default()
        }
    }

    fn agent(kind: &str, t: &str) -> BackendEvent {
        BackendEvent {
            text: t.to_string(),
            agent_status: Some(AgentStatus {
                kind: kind.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn collect(events: Vec<BackendEvent>) -> String {
        let resp = collect_completion(futures::stream::iter(events.into_iter().map(Ok)), "m")
            .await
            .unwrap();
        resp.choices[0].message.content.clone()
    }

    #[tokio::test]
    async fn test_collects_example_stream() {
        let input = b"data: {\"text\":\"Hi\"}\n\
data: {\"text\":\" there\"}\n\
data: {\"finished\":true}\n\
data: [DONE]\n";
        let events = backend_events(&input[..], CancellationToken::new(), SseLimits::default());

        let resp = collect_completion(events, "gpt-4o").await.unwrap();

        assert_eq!(resp.object, "chat.completion");
        assert_eq!(resp.model, "gpt-4o");
        assert!(resp.id.starts_with("chatcmpl-"));
        assert_eq!(resp.choices.len(), 1);
        assert_eq!(resp.choices[0].message.role, "assistant");
        assert_eq!(resp.choices[0].message.content, "Hi there");
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.total_tokens, 0);
    }

    #[tokio::test]
    async fn test_agent_status_events_contribute_nothing() {
        let content = collect(vec![
            agent("thinking", "hidden"),
            text("a"),
            agent("thinking_detail_stream", "hidden too"),
            text("b"),
            agent("web_search", "also hidden"),
        ])
        .await;

        assert_eq!(content, "ab");
    }

    #[tokio::test]
    async fn test_agent_event_order_is_irrelevant() {
        let first = collect(vec![agent("x", "1"), text("a"), agent("y", "2"), text("b")]).await;
        let second = collect(vec![agent("y", "2"), text("a"), text("b"), agent("x", "1")]).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_text_order_matters() {
        let forward = collect(vec![text("a"), text("b")]).await;
        let reversed = collect(vec![text("b"), text("a")]).await;
        assert_ne!(forward, reversed);
    }

    #[tokio::test]
    async fn test_decode_error_returns_no_partial_result() {
        let input = b"data: {\"text\":\"partial\"}\ndata: {not-json}\n";
        let events = backend_events(&input[..], CancellationToken::new(), SseLimits::default());

        let err = collect_completion(events, "m").await.unwrap_err();
        assert!(matches!(err, ProxyError::Decode { .. }));
    }
}
