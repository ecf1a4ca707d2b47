use crate::backends::ChatMessage;
use crate::mcp::BridgeClient;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

const PERSISTENCE_TOOL: &str = "context-persistence";
const HISTORY_LIMIT: u32 = 10;
const SIMILAR_LIMIT: u32 = 3;

/// Enriches requests with conversation history and similar-conversation
/// context fetched through the bridge. Every lookup is strictly additive
/// and best-effort: failure means "no context found", never a request
/// failure.
pub struct ContextManager {
    bridges: HashMap<String, Arc<BridgeClient>>,
}

impl ContextManager {
    pub fn new(bridges: HashMap<String, Arc<BridgeClient>>) -> Self {
        Self { bridges }
    }

    /// Returns [history..., similar-context system message, original...].
    pub async fn enrich_request(
        &self,
        messages: &[ChatMessage],
        conversation_id: Option<&str>,
    ) -> Vec<ChatMessage> {
        let Some(client) = self.bridges.get(PERSISTENCE_TOOL) else {
            debug!("context-persistence bridge not configured, skipping enrichment");
            return messages.to_vec();
        };

        let mut enriched = Vec::new();

        if let Some(conversation_id) = conversation_id {
            match self.load_history(client, conversation_id).await {
                Ok(history) if !history.is_empty() => {
                    debug!(count = history.len(), "added conversation history");
                    enriched.extend(history);
                }
                Ok(_) => {}
                Err(e) => warn!("failed to load conversation history: {e}"),
            }
        }

        if let Some(query) = last_user_message(messages) {
            match self.search_similar(client, &query).await {
                Ok(similar) if !similar.is_empty() => {
                    debug!(count = similar.len(), "added similar conversations");
                    enriched.push(ChatMessage::new("system", build_similar_context(&similar)));
                }
                Ok(_) => {}
                Err(e) => warn!("failed to search similar conversations: {e}"),
            }
        }

        enriched.extend(messages.iter().cloned());
        enriched
    }

    /// Persist a finished conversation. Callers fire-and-forget this.
    pub async fn save_conversation(
        &self,
        conversation_id: &str,
        messages: &[ChatMessage],
    ) -> anyhow::Result<()> {
        let Some(client) = self.bridges.get(PERSISTENCE_TOOL) else {
            anyhow::bail!("context-persistence bridge not configured");
        };

        let payload = serde_json::to_string(messages)?;
        client
            .call_tool(
                "save_conversation",
                json!({
                    "conversation_id": conversation_id,
                    "messages": payload,
                }),
            )
            .await?;
        Ok(())
    }

    async fn load_history(
        &self,
        client: &BridgeClient,
        conversation_id: &str,
    ) -> anyhow::Result<Vec<ChatMessage>> {
        let result = client
            .call_tool(
                "load_conversation_history",
                json!({
                    "conversation_id": conversation_id,
                    "limit": HISTORY_LIMIT,
                }),
            )
            .await?;

        let mut messages = Vec::new();
        for text in text_contents(&result) {
            if let Ok(parsed) = serde_json::from_str::<Vec<ChatMessage>>(&text) {
                messages.extend(parsed);
            }
        }
        Ok(messages)
    }

    async fn search_similar(
        &self,
        client: &BridgeClient,
        query: &str,
    ) -> anyhow::Result<Vec<Value>> {
        let result = client
            .call_tool(
                "search_similar_conversations",
                json!({
                    "query": query,
                    "limit": SIMILAR_LIMIT,
                }),
            )
            .await?;

        let mut similar = Vec::new();
        for text in text_contents(&result) {
            if let Ok(parsed) = serde_json::from_str::<Vec<Value>>(&text) {
                similar.extend(parsed);
            }
        }
        Ok(similar)
    }
}

/// MCP tool results wrap payloads as `{content: [{type: "text", text}]}`.
fn text_contents(result: &Value) -> Vec<String> {
    let Some(content) = result.get("content").and_then(Value::as_array) else {
        return Vec::new();
    };
    content
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn last_user_message(messages: &[ChatMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
}

fn build_similar_context(similar: &[Value]) -> String {
    let mut context = String::from("Relevant past conversations:\n\n");
    for (i, conv) in similar.iter().take(SIMILAR_LIMIT as usize).enumerate() {
        if let Some(summary) = conv.get("summary").and_then(Value::as_str) {
            let _ = writeln!(context, "{}. {summary}", i + 1);
        }
    }
    context.push_str("\nUse these past conversations to inform your response if relevant.");
    context
}
