use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::{Path, Query};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use dgu_core::config::DirectorySettings;
use dgu_core::contract::{Directory, DirectoryError};
use dgu_core::directory::DirectoryClient;

const EXPECTED_AUTH: &str = "Basic Y2thbjpzZWNyZXQ=";

fn xml(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

fn rpc_value(value: &str) -> Response {
    xml(
        StatusCode::OK,
        format!(
            "<?xml version=\"1.0\"?>\n<methodResponse><params><param><value>{value}</value></param></params></methodResponse>"
        ),
    )
}

fn rpc_fault(code: i64, message: &str) -> Response {
    xml(
        StatusCode::OK,
        format!(
            "<?xml version=\"1.0\"?>\n<methodResponse><fault><value><struct>\
             <member><name>faultCode</name><value><int>{code}</int></value></member>\
             <member><name>faultString</name><value><string>{message}</string></value></member>\
             </struct></value></fault></methodResponse>"
        ),
    )
}

fn between<'a>(body: &'a str, open: &str, close: &str) -> &'a str {
    body.split_once(open)
        .and_then(|(_, rest)| rest.split_once(close))
        .map(|(inner, _)| inner)
        .unwrap_or("")
}

async fn fake_xmlrpc(headers: HeaderMap, body: String) -> Response {
    let authorised = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(EXPECTED_AUTH);
    if !authorised {
        return xml(StatusCode::UNAUTHORIZED, String::new());
    }

    let method = between(&body, "<methodName>", "</methodName>");
    let param = between(&body, "<string>", "</string>");
    match (method, param) {
        ("user.retrieve", "42") => rpc_value(
            "<struct><member><name>uid</name><value><string>42</string></value></member>\
             <member><name>name</name><value><string>jo</string></value></member></struct>",
        ),
        ("user.retrieve", _) => rpc_fault(1, "Access denied for user anonymous"),
        ("session.retrieve", "expired") => rpc_value("<string>0</string>"),
        ("session.retrieve", _) => rpc_value("<string>17</string>"),
        ("organisation.department", "11") => rpc_value(
            "<struct><member><name>7</name><value><string>Cabinet Office</string></value></member></struct>",
        ),
        ("organisation.department", "12") => rpc_value("<struct></struct>"),
        ("organisation.department", "13") => rpc_value(
            "<struct><member><name>7</name><value>A</value></member>\
             <member><name>8</name><value>B</value></member></struct>",
        ),
        ("organisation.department", _) => rpc_fault(404, "There is no organisation"),
        ("organisation.one", "11") => rpc_value("<string>Cabinet Office</string>"),
        ("organisation.one", "500") => xml(StatusCode::INTERNAL_SERVER_ERROR, String::new()),
        ("organisation.one", "junk") => xml(StatusCode::OK, "<html>oops</html>".to_string()),
        ("organisation.one", _) => rpc_fault(404, "There is no organisation"),
        ("organisation.match", "Cabinet Office") => rpc_value("<string>11</string>"),
        ("organisation.match", _) => rpc_fault(404, "No match"),
        ("publisher.list", _) => rpc_value(
            "<struct><member><name>11</name><value>Cabinet Office</value></member></struct>",
        ),
        ("publisher.details", "11") => rpc_value(
            "<struct><member><name>title</name><value>Cabinet Office</value></member></struct>",
        ),
        ("publisher.details", _) => rpc_fault(404, "Not found"),
        _ => rpc_fault(-32601, "Unknown method"),
    }
}

async fn fake_node(Path(nid): Path<String>) -> Response {
    if nid == "1" {
        Json(json!({"nid": "1", "type": "app", "title": "Fix My Street"})).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn fake_nodes(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let nodes = vec![
        json!({"nid": "1", "type": "app"}),
        json!({"nid": "2", "type": "blog"}),
        json!({"nid": "3", "type": "app"}),
    ];
    let filtered = match params.get("parameters[type]") {
        Some(t) => nodes.into_iter().filter(|n| n["type"] == t.as_str()).collect(),
        None => nodes,
    };
    Json(Value::Array(filtered))
}

async fn fake_replies(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    Json(json!([{
        "entity_type": params.get("entity_type").cloned().unwrap_or_default(),
        "entity_id": "4,490",
        "reply id": "7,255",
        "uid": "1,234",
        "subject": "Great, thanks",
    }]))
}

async fn fake_organogram(Path(fid): Path<String>) -> Response {
    match fid.as_str() {
        "9" => Json(json!({"fid": "9", "filename": "org.xls"})).into_response(),
        "bad" => (StatusCode::OK, "<html>not json</html>").into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn fake_drupal() -> Router {
    Router::new()
        .route("/services/xmlrpc", post(fake_xmlrpc))
        .route("/services/rest/node", get(fake_nodes))
        .route("/services/rest/node/:nid", get(fake_node))
        .route("/services/rest/views/replies", get(fake_replies))
        .route(
            "/services/rest/views/dataset_referrers",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        )
        .route(
            "/services/rest/organogram",
            get(|| async { Json(json!([{"fid": "9"}])) }),
        )
        .route("/services/rest/organogram/:fid", get(fake_organogram))
}

async fn spawn_fake_drupal() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, fake_drupal()).await.expect("serve fake drupal") });
    addr
}

fn settings(addr: SocketAddr) -> DirectorySettings {
    DirectorySettings {
        scheme: "http".to_string(),
        domain: Some(addr.to_string()),
        username: Some("ckan".to_string()),
        password: Some("secret".to_string()),
    }
}

async fn client() -> DirectoryClient {
    let addr = spawn_fake_drupal().await;
    DirectoryClient::new(&settings(addr)).expect("client")
}

#[tokio::test]
async fn test_user_properties_are_decoded() {
    let client = client().await;
    let user = client.get_user_properties(42).await.unwrap();
    assert_eq!(user, json!({"uid": "42", "name": "jo"}));
}

#[tokio::test]
async fn test_user_fault_is_a_request_error() {
    let client = client().await;
    let err = client.get_user_properties(99).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Request(_)), "{err:?}");
}

#[tokio::test]
async fn test_session_zero_means_no_user() {
    let client = client().await;
    assert_eq!(
        client.get_user_id_from_session_id("abc123").await.unwrap(),
        Some("17".to_string())
    );
    assert_eq!(
        client.get_user_id_from_session_id("expired").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_department_lookup_requires_exactly_one_parent() {
    let client = client().await;
    assert_eq!(
        client.get_department_from_organisation("11").await.unwrap(),
        "7"
    );
    for org in ["12", "13", "404"] {
        let err = client
            .get_department_from_organisation(org)
            .await
            .unwrap_err();
        assert!(
            matches!(err, DirectoryError::NotFound(_)),
            "organisation {org}: {err:?}"
        );
    }
}

#[tokio::test]
async fn test_organisation_name_failure_mapping() {
    let client = client().await;
    assert_eq!(
        client.get_organisation_name("11").await.unwrap(),
        "Cabinet Office"
    );
    assert!(matches!(
        client.get_organisation_name("404").await,
        Err(DirectoryError::NotFound(_))
    ));
    assert!(matches!(
        client.get_organisation_name("500").await,
        Err(DirectoryError::Request(_))
    ));
    assert!(matches!(
        client.get_organisation_name("junk").await,
        Err(DirectoryError::Request(_))
    ));
}

#[tokio::test]
async fn test_match_organisation_and_publishers() {
    let client = client().await;
    assert_eq!(
        client.match_organisation("Cabinet Office").await.unwrap(),
        "11"
    );
    assert!(matches!(
        client.match_organisation("Ministry of Silly Walks").await,
        Err(DirectoryError::NotFound(_))
    ));
    assert_eq!(
        client.get_organisation_list().await.unwrap(),
        json!({"11": "Cabinet Office"})
    );
    assert_eq!(
        client.get_organisation_details("11").await.unwrap()["title"],
        "Cabinet Office"
    );
    assert!(matches!(
        client.get_organisation_details("12").await,
        Err(DirectoryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_missing_credentials_are_rejected_as_request_error() {
    let addr = spawn_fake_drupal().await;
    let anonymous = DirectorySettings {
        username: None,
        password: None,
        ..settings(addr)
    };
    let client = DirectoryClient::new(&anonymous).unwrap();
    assert!(matches!(
        client.get_organisation_list().await,
        Err(DirectoryError::Request(_))
    ));
}

#[tokio::test]
async fn test_refused_connection_is_a_request_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = DirectoryClient::new(&settings(addr)).unwrap();
    let err = client.get_organisation_name("11").await.unwrap_err();
    match err {
        DirectoryError::Request(msg) => {
            assert!(msg.contains("Socket error"), "{msg}");
            assert!(!msg.contains("secret"), "password leaked: {msg}");
        }
        other => panic!("expected request error, got {other:?}"),
    }
    assert!(matches!(
        client.get_node("1").await,
        Err(DirectoryError::Request(_))
    ));
}

#[tokio::test]
async fn test_rest_node_lookup() {
    let client = client().await;
    assert_eq!(client.get_node("1").await.unwrap()["title"], "Fix My Street");
    assert!(matches!(
        client.get_node("2").await,
        Err(DirectoryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_node_id_cannot_reach_another_endpoint() {
    let client = client().await;
    for nid in ["1?parameters[type]=app", "1/comments"] {
        assert!(
            matches!(client.get_node(nid).await, Err(DirectoryError::NotFound(_))),
            "node {nid}"
        );
    }
    assert!(matches!(
        client.get_organogram_file_properties("9?x=1").await,
        Err(DirectoryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_nodes_type_filter() {
    let client = client().await;
    assert_eq!(client.get_nodes(None).await.unwrap().len(), 3);
    let apps = client.get_nodes(Some("app")).await.unwrap();
    assert_eq!(apps.len(), 2);
    assert!(apps.iter().all(|n| n["type"] == "app"));
}

#[tokio::test]
async fn test_comments_lose_thousands_separators() {
    let client = client().await;
    let comments = client.get_comments("4490").await.unwrap();
    assert_eq!(comments[0]["entity_type"], "node");
    assert_eq!(comments[0]["entity_id"], "4490");
    assert_eq!(comments[0]["reply id"], "7255");
    assert_eq!(comments[0]["uid"], "1234");
    assert_eq!(comments[0]["subject"], "Great, thanks");

    let dataset_comments = client.get_dataset_comments("abc").await.unwrap();
    assert_eq!(dataset_comments[0]["entity_type"], "ckan_dataset");
}

#[tokio::test]
async fn test_organograms_and_referrers() {
    let client = client().await;
    assert_eq!(
        client.get_organogram_files().await.unwrap(),
        json!([{"fid": "9"}])
    );
    assert_eq!(
        client.get_organogram_file_properties("9").await.unwrap()["filename"],
        "org.xls"
    );
    assert!(matches!(
        client.get_organogram_file_properties("missing").await,
        Err(DirectoryError::NotFound(_))
    ));
    assert!(matches!(
        client.get_organogram_file_properties("bad").await,
        Err(DirectoryError::Request(_))
    ));
    assert!(matches!(
        client.get_dataset_referrers().await,
        Err(DirectoryError::Request(_))
    ));
}
