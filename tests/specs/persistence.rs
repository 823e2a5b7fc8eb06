//! Restart persistence specs.

use crate::prelude::*;

#[tokio::test]
async fn projects_and_session_ids_survive_restart() {
    let server = Server::start();
    let agent = server.fake_agent("agent.sh", CHATTY_AGENT);
    let agent_env = agent.display().to_string();
    let server = server.restart(&[("PA_CLAUDE_BINARY", &agent_env)]);

    let root = server.workspace("p1");
    let id = {
        let mut client = server.client().await;
        let id = client.create_project(&root).await;
        client.join(&id).await;
        client.execute(&id, "hi").await;
        let idle = client.recv_state("IDLE").await;
        assert_eq!(idle["data"]["session_id"], "sess-e2e");
        id
    };

    let server = server.restart(&[("PA_CLAUDE_BINARY", &agent_env)]);
    let mut client = server.client().await;

    client.send(json!({"type": "project_list"})).await;
    let reply = client.recv_type("project_list_response").await;
    let projects = reply["data"]["projects"].as_array().unwrap();

    let restored = projects
        .iter()
        .find(|p| p["id"] == id.as_str())
        .expect("project missing after restart");
    assert_eq!(restored["path"], root);
    assert_eq!(restored["session_id"], "sess-e2e");
    assert_eq!(restored["state"], "IDLE");
}

#[tokio::test]
async fn message_history_survives_restart() {
    let server = Server::start();
    let agent = server.fake_agent("agent.sh", CHATTY_AGENT);
    let agent_env = agent.display().to_string();
    let server = server.restart(&[("PA_CLAUDE_BINARY", &agent_env)]);

    let id = {
        let mut client = server.client().await;
        let id = client.create_project(&server.workspace("p1")).await;
        client.join(&id).await;
        client.execute(&id, "remember me").await;
        client.recv_state("IDLE").await;
        id
    };

    let server = server.restart(&[("PA_CLAUDE_BINARY", &agent_env)]);
    let mut client = server.client().await;

    client.send(json!({"type": "get_messages", "project_id": id, "data": {"since": 0}})).await;
    let reply = client.recv_type("messages").await;
    let messages = reply["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["payload"]["prompt"], "remember me");
}

#[tokio::test]
async fn corrupt_metadata_does_not_block_startup() {
    let server = Server::start();
    let root = server.workspace("good");
    let data_projects = {
        let mut client = server.client().await;
        client.create_project(&root).await;
        // Plant a corrupt sibling next to the good project.
        server.project_data_dir()
    };
    let bad = data_projects.join("prj-corrupt");
    std::fs::create_dir_all(&bad).unwrap();
    std::fs::write(bad.join("metadata.json"), b"{ nope").unwrap();

    let server = server.restart(&[]);
    let mut client = server.client().await;

    client.send(json!({"type": "project_list"})).await;
    let reply = client.recv_type("project_list_response").await;
    let projects = reply["data"]["projects"].as_array().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["path"], root);
}
