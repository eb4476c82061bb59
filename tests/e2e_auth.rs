//! Authentication and permission enforcement over the wire.

mod common;

use common::{Client, TestServer};
use serde_json::json;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_success_and_failure() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(dir.path()).await;

    // Default admin credential works and returns the user view
    let mut client = Client::connect(server.addr);
    let reply = client.send(json!({"username": "admin", "password": "admin"}));
    assert_eq!(reply["status"], "OK");
    assert_eq!(reply["user"]["username"], "admin");
    assert_eq!(reply["user"]["role"], "admin");

    // Bad password: one error line, then the server closes the connection
    let mut client = Client::connect(server.addr);
    let reply = client.send(json!({"username": "admin", "password": "nope"}));
    assert_eq!(reply["status"], "ERROR");

    // Malformed first frame
    let mut client = Client::connect(server.addr);
    let reply = client.send(json!({"type": "GET"}));
    assert_eq!(reply["status"], "ERROR");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn created_user_logs_in_with_scoped_permissions() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(dir.path()).await;

    let mut admin = Client::login(server.addr, "admin", "admin");
    admin.ok(json!({"type": "CREATE_SPACE", "space": "s"}));
    admin.ok(json!({"type": "CREATE_SPACE", "space": "other"}));
    admin.ok(json!({
        "type": "CREATE_USER", "new_user": "dana", "data": "pw", "value": "read",
    }));
    admin.ok(json!({
        "type": "GRANT_USER", "user": "dana", "space": "s", "value": "write",
    }));
    admin.ok(json!({"type": "PUT", "space": "other", "key": "k", "value": "v"}));

    let mut dana = Client::login(server.addr, "dana", "pw");
    // Write on the granted space
    dana.ok(json!({"type": "PUT", "space": "s", "key": "k", "value": "v"}));
    // Read anywhere (global read role), write denied elsewhere
    dana.ok(json!({"type": "GET", "space": "other", "key": "k"}));
    let reply = dana.send(json!({"type": "PUT", "space": "other", "key": "k", "value": "x"}));
    assert_eq!(reply["status"], "ERROR");

    // Admin-only surface stays closed, and the session survives the denial
    let reply = dana.send(json!({"type": "LIST_SPACES"}));
    assert_eq!(reply["status"], "ERROR");
    dana.ok(json!({"type": "USE_SPACE", "space": "s"}));

    // Deleted users can no longer log in
    admin.ok(json!({"type": "DELETE_USER", "delete_user": "dana"}));
    let mut gone = Client::connect(server.addr);
    let reply = gone.send(json!({"username": "dana", "password": "pw"}));
    assert_eq!(reply["status"], "ERROR");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn users_survive_restart() {
    let dir = TempDir::new().unwrap();
    {
        let server = TestServer::start(dir.path()).await;
        let mut admin = Client::login(server.addr, "admin", "admin");
        admin.ok(json!({
            "type": "CREATE_USER", "new_user": "erin", "data": "secret", "value": "write",
        }));
        server.stop().await;
    }

    let server = TestServer::start(dir.path()).await;
    let mut erin = Client::login(server.addr, "erin", "secret");
    let reply = erin.send(json!({"type": "LIST_SPACES"}));
    assert_eq!(reply["status"], "ERROR");
    server.stop().await;
}
