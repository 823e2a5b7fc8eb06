//! Execution specs: streaming, timeout, kill, multi-client broadcast.

use crate::prelude::*;

#[tokio::test]
async fn create_join_execute_streams_output() {
    let server = Server::start();
    let agent = server.fake_agent("agent.sh", CHATTY_AGENT);
    let server = server.restart(&[("PA_CLAUDE_BINARY", &agent.display().to_string())]);

    let mut client = server.client().await;
    let id = client.create_project(&server.workspace("p1")).await;
    client.join(&id).await;
    client.execute(&id, "hi").await;

    let executing = client.recv_state("EXECUTING").await;
    assert_eq!(executing["project_id"], id);

    let first = client.recv_type("agent_message").await;
    assert_eq!(first["data"]["text"], "starting");
    let second = client.recv_type("agent_message").await;
    assert_eq!(second["data"]["text"], "all done");

    let idle = client.recv_state("IDLE").await;
    assert_eq!(idle["data"]["session_id"], "sess-e2e");
}

#[tokio::test]
async fn timeout_yields_error_then_idle() {
    let server = Server::start();
    let agent = server.fake_agent("agent.sh", SLEEPY_AGENT);
    let server = server.restart(&[
        ("PA_CLAUDE_BINARY", &agent.display().to_string()),
        ("PA_COMMAND_TIMEOUT_MS", "100"),
        ("PA_KILL_GRACE_MS", "200"),
    ]);

    let mut client = server.client().await;
    let id = client.create_project(&server.workspace("p1")).await;
    client.join(&id).await;
    client.execute(&id, "hang").await;

    client.recv_state("EXECUTING").await;
    let error = client.recv_type("error").await;
    assert_eq!(error["data"]["code"], "EXECUTION_TIMEOUT");
    client.recv_state("IDLE").await;
}

#[tokio::test]
async fn agent_kill_cancels_and_returns_to_idle() {
    let server = Server::start();
    let agent = server.fake_agent("agent.sh", SLEEPY_AGENT);
    let server = server.restart(&[
        ("PA_CLAUDE_BINARY", &agent.display().to_string()),
        ("PA_KILL_GRACE_MS", "200"),
    ]);

    let mut client = server.client().await;
    let id = client.create_project(&server.workspace("p1")).await;
    client.join(&id).await;
    client.execute(&id, "hang").await;
    client.recv_state("EXECUTING").await;

    client.send(json!({"type": "agent_kill", "project_id": id})).await;
    let error = client.recv_type("error").await;
    assert_eq!(error["data"]["code"], "EXECUTION_FAILED");
    client.recv_state("IDLE").await;
}

#[tokio::test]
async fn delete_while_busy_then_after_idle() {
    let server = Server::start();
    let agent = server.fake_agent("agent.sh", SLEEPY_AGENT);
    let server = server.restart(&[
        ("PA_CLAUDE_BINARY", &agent.display().to_string()),
        ("PA_KILL_GRACE_MS", "200"),
    ]);

    let mut client = server.client().await;
    let id = client.create_project(&server.workspace("p1")).await;
    client.join(&id).await;
    client.execute(&id, "hang").await;
    client.recv_state("EXECUTING").await;

    client.send(json!({"type": "project_delete", "project_id": &id})).await;
    let busy = client.recv_type("error").await;
    assert_eq!(busy["data"]["code"], "PROCESS_ACTIVE");

    client.send(json!({"type": "agent_kill", "project_id": &id})).await;
    client.recv_state("IDLE").await;

    client.send(json!({"type": "project_delete", "project_id": &id})).await;
    client.recv_type("project_deleted").await;
}

#[tokio::test]
async fn both_subscribers_see_the_same_ordered_stream() {
    let server = Server::start();
    let agent = server.fake_agent(
        "agent.sh",
        r#"for i in 1 2 3 4 5; do echo "{\"n\":$i}"; done"#,
    );
    let server = server.restart(&[("PA_CLAUDE_BINARY", &agent.display().to_string())]);

    let mut alice = server.client().await;
    let mut bob = server.client().await;
    let id = alice.create_project(&server.workspace("p1")).await;
    alice.join(&id).await;
    bob.join(&id).await;

    alice.execute(&id, "count").await;

    for client in [&mut alice, &mut bob] {
        client.recv_state("EXECUTING").await;
        for expected in 1..=5 {
            let msg = client.recv_type("agent_message").await;
            assert_eq!(msg["data"]["n"], expected);
        }
        client.recv_state("IDLE").await;
    }
}

#[tokio::test]
async fn executing_twice_reports_process_active() {
    let server = Server::start();
    let agent = server.fake_agent("agent.sh", SLEEPY_AGENT);
    let server = server.restart(&[
        ("PA_CLAUDE_BINARY", &agent.display().to_string()),
        ("PA_KILL_GRACE_MS", "200"),
    ]);

    let mut client = server.client().await;
    let id = client.create_project(&server.workspace("p1")).await;
    client.join(&id).await;
    client.execute(&id, "first").await;
    client.recv_state("EXECUTING").await;

    client.execute(&id, "second").await;
    let busy = client.recv_type("error").await;
    assert_eq!(busy["data"]["code"], "PROCESS_ACTIVE");

    client.send(json!({"type": "agent_kill", "project_id": id})).await;
}

#[tokio::test]
async fn get_messages_returns_history_with_since_cursor() {
    let server = Server::start();
    let agent = server.fake_agent("agent.sh", CHATTY_AGENT);
    let server = server.restart(&[("PA_CLAUDE_BINARY", &agent.display().to_string())]);

    let mut client = server.client().await;
    let id = client.create_project(&server.workspace("p1")).await;
    client.join(&id).await;
    client.execute(&id, "hi").await;
    client.recv_state("IDLE").await;

    client.send(json!({"type": "get_messages", "project_id": id, "data": {"since": 0}})).await;
    let reply = client.recv_type("messages").await;
    let messages = reply["data"]["messages"].as_array().unwrap();

    // Prompt record plus two agent messages, in append order.
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["type"], "prompt");
    assert_eq!(messages[0]["payload"]["prompt"], "hi");
    assert_eq!(messages[1]["type"], "agent_message");
    assert_eq!(messages[2]["payload"]["text"], "all done");
}

#[tokio::test]
async fn late_joiner_gets_history_snapshot() {
    let server = Server::start();
    let agent = server.fake_agent("agent.sh", CHATTY_AGENT);
    let server = server.restart(&[("PA_CLAUDE_BINARY", &agent.display().to_string())]);

    let mut alice = server.client().await;
    let id = alice.create_project(&server.workspace("p1")).await;
    alice.join(&id).await;
    alice.execute(&id, "hi").await;
    alice.recv_state("IDLE").await;

    let mut bob = server.client().await;
    bob.send(json!({"type": "project_join", "project_id": id})).await;
    let joined = bob.recv_type("project_joined").await;
    let messages = joined["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(joined["data"]["project"]["session_id"], "sess-e2e");
}
