//! Project lifecycle specs: create, list, nesting, limits, delete.

use crate::prelude::*;

#[tokio::test]
async fn create_project_replies_with_idle_state() {
    let server = Server::start();
    let mut client = server.client().await;
    let root = server.workspace("p1");

    client.send(json!({"type": "project_create", "data": {"path": root}})).await;
    let reply = client.recv_type("project_state").await;

    assert_eq!(reply["data"]["path"], server.workspace("p1"));
    assert_eq!(reply["data"]["state"], "IDLE");
    assert_eq!(reply["data"]["session_id"], "");
    assert!(reply["timestamp"].as_u64().is_some());

    // The envelope round-trips through the typed wire layer.
    let typed: pa_wire::Outbound = serde_json::from_value(reply).unwrap();
    assert_eq!(typed.kind, pa_wire::OutboundKind::ProjectState);
}

#[tokio::test]
async fn created_projects_appear_in_list() {
    let server = Server::start();
    let mut client = server.client().await;

    let id_a = client.create_project(&server.workspace("a")).await;
    let id_b = client.create_project(&server.workspace("b")).await;

    client.send(json!({"type": "project_list"})).await;
    let reply = client.recv_type("project_list_response").await;
    let ids: Vec<&str> = reply["data"]["projects"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|p| p["id"].as_str())
        .collect();

    assert!(ids.contains(&id_a.as_str()));
    assert!(ids.contains(&id_b.as_str()));
}

#[tokio::test]
async fn nested_project_is_rejected() {
    let server = Server::start();
    let mut client = server.client().await;
    let parent = server.workspace("a");
    let child = server.workspace("a/b");

    client.create_project(&parent).await;

    client.send(json!({"type": "project_create", "data": {"path": child}})).await;
    let reply = client.recv_type("error").await;
    assert_eq!(reply["data"]["code"], "PROJECT_NESTING");
}

#[tokio::test]
async fn invalid_path_is_rejected() {
    let server = Server::start();
    let mut client = server.client().await;

    client.send(json!({"type": "project_create", "data": {"path": "not/absolute"}})).await;
    assert_eq!(client.recv_type("error").await["data"]["code"], "INVALID_PATH");

    client
        .send(json!({"type": "project_create", "data": {"path": "/definitely/missing/dir"}}))
        .await;
    assert_eq!(client.recv_type("error").await["data"]["code"], "INVALID_PATH");
}

#[tokio::test]
async fn project_limit_boundary() {
    let server = Server::start_with_env(&[("PA_MAX_PROJECTS", "2")]);
    let mut client = server.client().await;

    client.create_project(&server.workspace("a")).await;
    client.create_project(&server.workspace("b")).await;

    client
        .send(json!({"type": "project_create", "data": {"path": server.workspace("c")}}))
        .await;
    let reply = client.recv_type("error").await;
    assert_eq!(reply["data"]["code"], "PROJECT_LIMIT");
}

#[tokio::test]
async fn delete_returns_paths_to_reuse() {
    let server = Server::start();
    let mut client = server.client().await;
    let root = server.workspace("p1");

    let id = client.create_project(&root).await;
    client.send(json!({"type": "project_delete", "project_id": &id})).await;
    let reply = client.recv_type("project_deleted").await;
    assert_eq!(reply["project_id"], id);

    // The path registers again after deletion.
    client.create_project(&root).await;
}

#[tokio::test]
async fn unknown_message_type_is_invalid() {
    let server = Server::start();
    let mut client = server.client().await;

    client.send(json!({"type": "make_coffee"})).await;
    let reply = client.recv_type("error").await;
    assert_eq!(reply["data"]["code"], "INVALID_MESSAGE");
}
