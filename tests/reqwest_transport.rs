use std::sync::Arc;

use acme_engine::{
    key_pair::KeyAlgorithm,
    transport::{HttpRequest, ReqwestTransport, Transport, JOSE_JSON},
    AccountConfig, AccountManager, AcmeClient, MemCredentialStore,
};
use mockito::{Matcher, Server};
use serde_json::json;

fn directory_body(base: &str) -> String {
    json!({
        "newNonce": format!("{}/acme/new-nonce", base),
        "newAccount": format!("{}/acme/new-acct", base),
        "newOrder": format!("{}/acme/new-order", base),
        "meta": {"termsOfService": format!("{}/terms", base)}
    })
    .to_string()
}

#[test]
fn test_round_trip_headers() {
    let mut server = Server::new();
    let base = server.url();
    let mock = server
        .mock("GET", "/directory")
        .match_header("user-agent", Matcher::Regex("^acme-engine/".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("replay-nonce", "dir-nonce")
        .with_header("link", "<https://ca/index>;rel=\"index\"")
        .with_body(directory_body(&base))
        .create();

    let transport = ReqwestTransport::new().unwrap();
    let response = transport
        .execute(&HttpRequest::get(format!("{}/directory", base)))
        .unwrap();

    mock.assert();
    assert_eq!(response.status, 200);
    assert_eq!(response.replay_nonce(), Some("dir-nonce"));
    assert_eq!(response.header("Replay-Nonce"), Some("dir-nonce"));
    assert_eq!(response.link("index").as_deref(), Some("https://ca/index"));
}

#[test]
fn test_connection_failure_is_transport_error() {
    let transport = ReqwestTransport::new().unwrap();
    // 保留埠 0 無法連線
    let result = transport.execute(&HttpRequest::head("http://127.0.0.1:0/acme/new-nonce"));
    assert!(result.is_err());
}

#[test]
fn test_register_over_http() {
    let mut server = Server::new();
    let base = server.url();
    let account_url = format!("{}/acme/acct/384", base);

    let directory = server
        .mock("GET", "/directory")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(directory_body(&base))
        .expect(1)
        .create();
    let nonce = server
        .mock("HEAD", "/acme/new-nonce")
        .with_status(200)
        .with_header("replay-nonce", "head-nonce")
        .expect(1)
        .create();
    let new_account = server
        .mock("POST", "/acme/new-acct")
        .match_header("content-type", JOSE_JSON)
        .match_body(Matcher::Regex("\"protected\"".to_string()))
        .with_status(201)
        .with_header("location", &account_url)
        .with_header("replay-nonce", "acct-nonce")
        .with_header("content-type", "application/json")
        .with_body(json!({"status": "valid"}).to_string())
        .create();

    let client = Arc::new(AcmeClient::new(&base).unwrap());
    let config = AccountConfig::new("acct")
        .key_algorithm(KeyAlgorithm::Ec)
        .agree_to_terms_of_service(true);
    let mut manager =
        AccountManager::new(client.clone(), Arc::new(MemCredentialStore::new()), &config).unwrap();

    assert!(manager.register().unwrap());
    assert_eq!(manager.account_url().unwrap(), account_url);
    assert_eq!(
        client.nonce_cache().peek().unwrap().as_deref(),
        Some("acct-nonce")
    );

    directory.assert();
    nonce.assert();
    new_account.assert();
}
