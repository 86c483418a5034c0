//! Tool servers run as real child processes of the host, over stdio.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use facade_relay::mcp_client::lifecycle::spawn_server;
use facade_relay::mcp_client::{McpClient, McpServersConfig, ServerConfig};
use facade_relay::protocol::McpError;
use serde_json::json;

fn facade(name: &str, cwd: Option<String>) -> ServerConfig {
    ServerConfig {
        command: env!("CARGO_BIN_EXE_facade-relay").to_string(),
        args: vec!["serve".to_string(), name.to_string()],
        env: BTreeMap::new(),
        cwd,
    }
}

fn client_for(servers: &[(&str, ServerConfig)]) -> McpClient {
    let servers = servers
        .iter()
        .map(|(id, config)| (id.to_string(), config.clone()))
        .collect();
    McpClient::new(McpServersConfig { servers }, None)
}

#[tokio::test]
async fn test_demo_server_over_child_stdio() {
    let mut client = client_for(&[("demoFacade", facade("demo", None))]);
    let errors = client.start_all().await;
    assert!(errors.is_empty(), "startup errors: {errors:?}");
    assert_eq!(client.catalog.tool_names(), vec!["demoFacade.greet"]);

    let result = client
        .call_tool("demoFacade", "greet", json!({"message": "Hi"}))
        .await
        .unwrap();
    assert_eq!(result.render_text(), "Hello!");

    let result = client
        .call_tool("demoFacade", "greet", json!({"message": "hello there"}))
        .await
        .unwrap();
    assert_eq!(
        result.render_text(),
        "I only respond to 'Hi', but you said: hello there"
    );

    // Well under the forced-kill deadline.
    let start = Instant::now();
    client.shutdown_all().await;
    assert!(start.elapsed() < Duration::from_secs(4));
    assert_eq!(client.running_server_count(), 0);
}

#[tokio::test]
async fn test_env_file_is_read_from_server_cwd() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(".env"),
        "EMAIL_USER=relay@example.com\nEMAIL_PASS=app-password\n",
    )
    .unwrap();

    let cwd = Some(dir.path().display().to_string());
    let mut client = client_for(&[("emailFacade", facade("email", cwd))]);
    let errors = client.start_all().await;
    assert!(errors.is_empty(), "startup errors: {errors:?}");
    assert!(client.catalog.get("emailFacade.send_email").is_some());
    assert!(client.catalog.get("emailFacade.get_latest_email").is_some());
    client.shutdown_all().await;
}

#[tokio::test]
async fn test_server_exiting_at_startup_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = facade("github", Some(dir.path().display().to_string()));
    // An empty token is treated as missing.
    config.env.insert("GITHUB_TOKEN".to_string(), String::new());

    let mut client = client_for(&[("githubFacade", config), ("demoFacade", facade("demo", None))]);
    let errors = client.start_all().await;

    assert_eq!(errors.len(), 1);
    let (name, err) = &errors[0];
    assert_eq!(name, "githubFacade");
    assert!(matches!(err, McpError::InitFailed { .. }), "got {err:?}");
    assert!(client.is_server_running("demoFacade"));
    assert!(!client.is_server_running("githubFacade"));

    let err = client
        .call_tool("githubFacade", "search_repositories", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::ServerUnavailable { .. }));
    client.shutdown_all().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_killed_server_is_transport_failure() {
    let mut server = spawn_server("demoFacade", &facade("demo", None), None)
        .await
        .unwrap();
    let pid = server.process_id().unwrap();

    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.is_alive() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!server.is_alive());

    let err = server
        .call_tool("greet", json!({"message": "Hi"}))
        .await
        .unwrap_err();
    assert!(err.is_transport_failure(), "got {err:?}");
}
