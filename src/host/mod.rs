//! Routing Host: owns the tool servers and answers user requests.
//!
//! Startup spawns every configured server (partial startup is fine), builds
//! the merged catalog and wires the inference-backed oracle into the
//! dispatcher. After that the host is driven one request at a time by
//! `repl::run`.

pub mod config;
pub mod repl;

use std::sync::Arc;

use thiserror::Error;

use crate::agent_core::{
    ConversationState, DecisionAdapter, DecisionOracle, DispatchOutcome, Dispatcher, LlmOracle,
};
use crate::inference::{InferenceClient, InferenceError};
use crate::mcp_client::McpClient;

pub use config::{ConfigError, HostConfig};

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

pub struct RoutingHost {
    client: McpClient,
    dispatcher: Dispatcher,
    conversation: ConversationState,
}

impl RoutingHost {
    /// Wire a host around an already connected client.
    pub fn new(client: McpClient, oracle: Arc<dyn DecisionOracle>, config: &HostConfig) -> Self {
        Self {
            client,
            dispatcher: Dispatcher::new(DecisionAdapter::new(oracle), config.max_steps),
            conversation: ConversationState::new(config.system_prompt.as_str(), config.conversation)
                .with_history_limit(config.history_requests),
        }
    }

    /// Build the oracle, spawn the configured servers and connect to them.
    ///
    /// Only configuration problems are fatal. A server that fails to start
    /// is logged and left out of the catalog.
    pub async fn start(config: &HostConfig) -> Result<Self, HostError> {
        let inference = InferenceClient::from_config(config.model.clone())?;
        let oracle = LlmOracle::new(inference);
        tracing::info!(model = %oracle.model_name(), "decision oracle ready");

        let servers = config.servers_config()?;
        let mut client = McpClient::new(servers, config.working_dir.clone());
        client.set_call_timeout(config.call_timeout_ms);

        let errors = client.start_all().await;
        for (name, err) in &errors {
            tracing::warn!(server = %name, error = %err, "tool server failed to start (non-fatal)");
        }

        let running = client.running_server_count();
        if running == 0 {
            tracing::warn!("no tool servers running; requests can only be answered directly");
        }
        tracing::info!(
            running_servers = running,
            total_tools = client.tool_count(),
            servers = ?client.running_servers(),
            "routing host initialized"
        );

        Ok(Self::new(client, Arc::new(oracle), config))
    }

    /// Answer one user request.
    pub async fn handle_request(&mut self, text: &str) -> DispatchOutcome {
        self.dispatcher
            .run(&mut self.client, &mut self.conversation, text)
            .await
    }

    pub fn client(&self) -> &McpClient {
        &self.client
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub async fn shutdown(&mut self) {
        tracing::info!("shutting down tool servers");
        self.client.shutdown_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::{ConversationPolicy, OracleError, Proposal, Turn};
    use crate::inference::ToolCall;
    use crate::mcp_client::{McpServersConfig, ToolCatalog};
    use crate::mcp_server::demo;
    use crate::protocol::MemoryTransport;
    use async_trait::async_trait;
    use serde_json::json;

    /// Greets on the first consult of each request, answers with the result next.
    struct GreetThenAnswer;

    #[async_trait]
    impl DecisionOracle for GreetThenAnswer {
        async fn propose(
            &self,
            _catalog: &ToolCatalog,
            conversation: &ConversationState,
        ) -> Result<Proposal, OracleError> {
            match conversation.turns().last() {
                Some(Turn::ToolResult { content, .. }) => Ok(Proposal::Answer(content.clone())),
                _ => Ok(Proposal::ToolCalls(vec![ToolCall {
                    id: "call_1".into(),
                    name: "greet".into(),
                    arguments: json!({"message": "Hi"}),
                }])),
            }
        }
    }

    pub(crate) async fn demo_host(policy: ConversationPolicy) -> RoutingHost {
        let (client_end, mut server_end) = MemoryTransport::pair();
        let server = demo::server().unwrap();
        tokio::spawn(async move { server.serve(&mut server_end).await });

        let mut client = McpClient::new(McpServersConfig::default(), None);
        client.attach("demoFacade", Box::new(client_end)).await.unwrap();

        let config = HostConfig {
            conversation: policy,
            ..Default::default()
        };
        RoutingHost::new(client, Arc::new(GreetThenAnswer), &config)
    }

    #[tokio::test]
    async fn test_handle_request_routes_to_demo() {
        let mut host = demo_host(ConversationPolicy::Persist).await;
        let outcome = host.handle_request("say hi to the demo server").await;
        assert_eq!(
            outcome,
            DispatchOutcome::Answered {
                text: "Hello!".into(),
                steps_used: 1
            }
        );
    }

    #[tokio::test]
    async fn test_conversation_policy_applies_between_requests() {
        let mut host = demo_host(ConversationPolicy::Persist).await;
        host.handle_request("one").await;
        host.handle_request("two").await;
        assert_eq!(host.conversation().len(), 8);

        let mut host = demo_host(ConversationPolicy::Reset).await;
        host.handle_request("one").await;
        host.handle_request("two").await;
        assert_eq!(host.conversation().len(), 4);
    }

    #[tokio::test]
    async fn test_shutdown_clears_catalog() {
        let mut host = demo_host(ConversationPolicy::Persist).await;
        assert_eq!(host.client().tool_count(), 1);
        host.shutdown().await;
        assert_eq!(host.client().tool_count(), 0);
    }

    #[tokio::test]
    async fn test_start_requires_api_key() {
        let mut config = HostConfig::default();
        config.model.api_key_env = Some("__FACADE_RELAY_HOST_TEST_KEY__".into());
        config.mcp_servers = Some(Default::default());
        let err = RoutingHost::start(&config).await.err().unwrap();
        assert!(matches!(
            err,
            HostError::Inference(InferenceError::MissingApiKey { .. })
        ));
    }
}
