//! End-to-end scenarios over real TCP connections against an in-process
//! gateway.

mod common;

use serde_json::json;

use common::{allow_localhost, start_server, test_config, FakeDriver, TestClient, TEST_SECRET};
use db_gateway::db::sqlite::SqliteDriver;
use db_gateway::server::message::UNKNOWN_TYPE_REPLY;
use db_gateway::server::AllowedIps;

#[test]
fn allow_list_file_ignores_comments_and_whitespace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("allowed_ips.txt");
    std::fs::write(
        &path,
        "# trusted hosts\n\n  127.0.0.1  \n10.0.0.7\nnot-an-ip\n::1\n",
    )
    .unwrap();

    let allow = AllowedIps::load(&path).unwrap();
    assert_eq!(allow.len(), 3);
    assert!(allow.is_allowed(&"127.0.0.1".parse().unwrap()));
    assert!(allow.is_allowed(&"10.0.0.7".parse().unwrap()));
    assert!(allow.is_allowed(&"::1".parse().unwrap()));
    assert!(!allow.is_allowed(&"192.168.0.1".parse().unwrap()));

    // A missing file is a startup error, never a silently empty list.
    assert!(AllowedIps::load(&dir.path().join("nope.txt")).is_err());
}

#[test]
fn config_validation_requires_a_secret() {
    let mut config = test_config("");
    config.metrics_port = 9080;
    config.port = 9000;
    assert!(config.validate().is_err());

    let mut config = test_config(TEST_SECRET);
    config.metrics_port = 9080;
    config.port = 9000;
    assert!(config.validate().is_ok());
}

#[tokio::test]
async fn disallowed_address_is_dropped_with_zero_bytes() {
    // The allow-list admits only a remote address, never the test client.
    let allow = AllowedIps::from_ips(["10.1.2.3".parse().unwrap()]);
    let (addr, _state) = start_server(FakeDriver::new(), allow, test_config(TEST_SECRET)).await;

    let mut client = TestClient::connect(addr).await;
    assert!(client.recv_line().await.is_none());
}

#[tokio::test]
async fn bad_secret_disconnects_client() {
    let (addr, _state) =
        start_server(FakeDriver::new(), allow_localhost(), test_config(TEST_SECRET)).await;

    let mut client = TestClient::connect(addr).await;
    client.send("not-the-secret", &json!({ "type": "db.query" })).await;
    assert!(client.recv_line().await.is_none());
}

#[tokio::test]
async fn unknown_type_reply_is_exact_and_connection_survives() {
    let (addr, _state) =
        start_server(FakeDriver::new(), allow_localhost(), test_config(TEST_SECRET)).await;

    let mut client = TestClient::connect(addr).await;
    client.send(TEST_SECRET, &json!({ "type": "bogus" })).await;
    assert_eq!(client.recv_line().await.unwrap(), UNKNOWN_TYPE_REPLY);

    // Still connected: the next message gets answered too.
    client.send(TEST_SECRET, &json!({ "type": "bogus" })).await;
    assert_eq!(client.recv_line().await.unwrap(), UNKNOWN_TYPE_REPLY);
}

#[tokio::test]
async fn end_to_end_database_flow() {
    let dir = tempfile::tempdir().unwrap();
    let driver = SqliteDriver::new(dir.path().join("gateway.db"));
    let (addr, _state) = start_server(driver, allow_localhost(), test_config(TEST_SECRET)).await;

    let mut client = TestClient::connect(addr).await;

    client
        .send(
            TEST_SECRET,
            &json!({ "type": "db.query", "sql": "CREATE TABLE users (id INTEGER, name TEXT)" }),
        )
        .await;
    let reply = client.recv_json().await;
    assert_eq!(reply["type"], "db.query_ack");
    assert_eq!(reply["ok"], true);

    client
        .send(
            TEST_SECRET,
            &json!({ "type": "db.insert", "table": "users", "values": { "id": 1, "name": "kim" } }),
        )
        .await;
    let reply = client.recv_json().await;
    assert_eq!(reply["type"], "db.insert_ack");
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["affected"], 1);

    client
        .send(
            TEST_SECRET,
            &json!({
                "type": "db.select",
                "table": "users",
                "columns": ["name"],
                "where": { "id": 1 },
                "limit": 1,
            }),
        )
        .await;
    let reply = client.recv_json().await;
    assert_eq!(reply["type"], "db.select_ack");
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["rows"], json!([{ "name": "kim" }]));

    // A failing statement is a handler-level error, not a disconnect.
    client
        .send(
            TEST_SECRET,
            &json!({ "type": "db.select", "table": "missing_table", "limit": 1 }),
        )
        .await;
    let reply = client.recv_json().await;
    assert_eq!(reply["type"], "db.select_ack");
    assert_eq!(reply["ok"], false);
    assert!(reply["error"].as_str().is_some());

    client
        .send(
            TEST_SECRET,
            &json!({ "type": "db.query", "sql": "SELECT name FROM users", "params": [] }),
        )
        .await;
    let reply = client.recv_json().await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["rows"], json!([{ "name": "kim" }]));
}

#[tokio::test]
async fn parameterized_query_binds_values() {
    let dir = tempfile::tempdir().unwrap();
    let driver = SqliteDriver::new(dir.path().join("gateway.db"));
    let (addr, _state) = start_server(driver, allow_localhost(), test_config(TEST_SECRET)).await;

    let mut client = TestClient::connect(addr).await;
    client
        .send(
            TEST_SECRET,
            &json!({ "type": "db.query", "sql": "CREATE TABLE kv (k TEXT, v INTEGER)" }),
        )
        .await;
    client.recv_json().await;

    client
        .send(
            TEST_SECRET,
            &json!({
                "type": "db.query",
                "sql": "INSERT INTO kv (k, v) VALUES (?, ?)",
                "params": ["answer", 42],
            }),
        )
        .await;
    let reply = client.recv_json().await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["affected"], 1);

    client
        .send(
            TEST_SECRET,
            &json!({
                "type": "db.query",
                "sql": "SELECT v FROM kv WHERE k = ?",
                "params": ["answer"],
            }),
        )
        .await;
    let reply = client.recv_json().await;
    assert_eq!(reply["rows"], json!([{ "v": 42 }]));
}

#[tokio::test]
async fn login_binds_nickname_and_rejects_collisions() {
    let (addr, state) =
        start_server(FakeDriver::new(), allow_localhost(), test_config(TEST_SECRET)).await;

    let mut first = TestClient::connect(addr).await;
    first.send(TEST_SECRET, &json!({ "type": "login", "nickname": "kim" })).await;
    let reply = first.recv_json().await;
    assert_eq!(reply["type"], "login_ack");
    assert_eq!(reply["ok"], true);

    let found = state
        .coordinator
        .find_session_by_nickname("kim")
        .expect("nickname should resolve to the logged-in session");
    assert!(found.is_nickname_registered());

    // A second session asking for the same nickname is rejected and stays
    // unauthenticated.
    let mut second = TestClient::connect(addr).await;
    second.send(TEST_SECRET, &json!({ "type": "login", "nickname": "kim" })).await;
    let reply = second.recv_json().await;
    assert_eq!(reply["ok"], false);
    assert!(reply["error"].as_str().unwrap().contains("kim"));

    // It may still pick a free nickname afterwards.
    second.send(TEST_SECRET, &json!({ "type": "login", "nickname": "lee" })).await;
    let reply = second.recv_json().await;
    assert_eq!(reply["ok"], true);

    // A nickname binds at most once per session; a relogin is refused and
    // must not plant a claim for the new name.
    first.send(TEST_SECRET, &json!({ "type": "login", "nickname": "park" })).await;
    let reply = first.recv_json().await;
    assert_eq!(reply["ok"], false);
    assert!(state.coordinator.find_session_by_nickname("park").is_none());
    assert!(state.coordinator.find_session_by_nickname("kim").is_some());
}

#[tokio::test]
async fn concurrent_queries_share_the_pool_safely() {
    let driver = FakeDriver::new();
    let mut config = test_config(TEST_SECRET);
    config.db_pool_size = 4;
    let (addr, _state) = start_server(driver.clone(), allow_localhost(), config).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        tasks.push(tokio::spawn(async move {
            let mut client = TestClient::connect(addr).await;
            client
                .send(TEST_SECRET, &json!({ "type": "db.query", "sql": "SELECT 1" }))
                .await;
            client.recv_json().await
        }));
    }

    for task in tasks {
        let reply = task.await.unwrap();
        assert_eq!(reply["type"], "db.query_ack");
        assert_eq!(reply["ok"], true);
    }

    assert!(!driver.saw_shared_use());
    assert_eq!(driver.statements(), 8);
}
