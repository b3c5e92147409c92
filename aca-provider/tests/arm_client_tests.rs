//! ArmClient against a local fake of the token and resource manager endpoints.

use aca_provider::credential::{AZURE_CLIENT_ID, AZURE_CLIENT_SECRET, AZURE_TENANT_ID};
use aca_provider::{
    ArmClient, ArmClientOptions, ChainedTokenCredential, ContainerApp, EnvironmentCredential,
    ProviderError, ProvisioningState, WorkloadClient,
};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Form, Json, Router};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
enum DeleteMode {
    NoContent,
    AcceptedLocation,
    Missing,
}

#[derive(Debug)]
struct FakeState {
    base: String,
    app: Option<Value>,
    create_async: bool,
    reject_put: bool,
    /// GET keeps reporting `InProgress`.
    stuck_provisioning: bool,
    operation_statuses: VecDeque<&'static str>,
    location_polls: usize,
    delete_mode: DeleteMode,
    token_requests: usize,
    /// (method, path, authorization header)
    requests: Vec<(String, String, Option<String>)>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            base: String::new(),
            app: None,
            create_async: true,
            reject_put: false,
            stuck_provisioning: false,
            operation_statuses: VecDeque::from(["InProgress", "Succeeded"]),
            location_polls: 1,
            delete_mode: DeleteMode::NoContent,
            token_requests: 0,
            requests: Vec::new(),
        }
    }
}

type Fake = Arc<Mutex<FakeState>>;

async fn token(
    State(fake): State<Fake>,
    Path(tenant): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    fake.lock().unwrap().token_requests += 1;
    if tenant != "tenant1" || form.get("client_secret").map(String::as_str) != Some("secret1") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_client", "error_description": "bad secret"})),
        )
            .into_response();
    }
    assert_eq!(form["grant_type"], "client_credentials");
    assert!(form["scope"].ends_with("/.default"));
    Json(json!({"token_type": "Bearer", "access_token": "arm-token", "expires_in": 3600}))
        .into_response()
}

async fn container_app(
    State(fake): State<Fake>,
    method: Method,
    Path((sub, rg, name)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = fake.lock().unwrap();
    state.requests.push((
        method.to_string(),
        format!("{sub}/{rg}/{name}"),
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    ));
    assert_eq!(query.get("api-version").map(String::as_str), Some("2024-03-01"));

    match method {
        Method::PUT => {
            if state.reject_put {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": {"code": "InvalidParameterValue", "message": "bad cpu"}})),
                )
                    .into_response();
            }
            let mut app: Value = serde_json::from_slice(&body).unwrap();
            app["name"] = json!(name);
            app["properties"]["provisioningState"] = json!("InProgress");
            state.app = Some(app.clone());

            if state.create_async {
                let operation = format!("{}/operations/op1", state.base);
                (
                    StatusCode::CREATED,
                    [("azure-asyncoperation", operation)],
                    Json(app),
                )
                    .into_response()
            } else {
                (StatusCode::CREATED, Json(app)).into_response()
            }
        }
        Method::GET => {
            let stuck = state.stuck_provisioning;
            match state.app.as_mut() {
                Some(app) if stuck => Json(app.clone()).into_response(),
                Some(app) => {
                    app["properties"]["provisioningState"] = json!("Succeeded");
                    app["properties"]["runningStatus"] = json!("Running");
                    app["properties"]["configuration"]["ingress"]["fqdn"] =
                        json!(format!("{name}.fake.azurecontainerapps.io"));
                    Json(app.clone()).into_response()
                }
                None => (
                    StatusCode::NOT_FOUND,
                    Json(json!({"error": {"code": "ResourceNotFound", "message": "not found"}})),
                )
                    .into_response(),
            }
        }
        Method::DELETE => match state.delete_mode {
            DeleteMode::NoContent => {
                state.app = None;
                StatusCode::NO_CONTENT.into_response()
            }
            DeleteMode::Missing => StatusCode::NOT_FOUND.into_response(),
            DeleteMode::AcceptedLocation => {
                state.app = None;
                let location = format!("{}/operations/loc1", state.base);
                (StatusCode::ACCEPTED, [("location", location)]).into_response()
            }
        },
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn operation(State(fake): State<Fake>, Path(id): Path<String>) -> Response {
    let mut state = fake.lock().unwrap();
    if id == "loc1" {
        if state.location_polls > 0 {
            state.location_polls -= 1;
            return StatusCode::ACCEPTED.into_response();
        }
        return StatusCode::OK.into_response();
    }

    let status = if state.operation_statuses.len() > 1 {
        state.operation_statuses.pop_front().unwrap_or("Succeeded")
    } else {
        state.operation_statuses.front().copied().unwrap_or("Succeeded")
    };
    let mut doc = json!({"id": id, "status": status});
    if status == "Failed" {
        doc["error"] = json!({"code": "ContainerAppOperationError", "message": "image pull failed"});
    }
    Json(doc).into_response()
}

async fn start_fake(state: FakeState) -> (Fake, String) {
    let fake: Fake = Arc::new(Mutex::new(state));
    let app = Router::new()
        .route("/{tenant}/oauth2/v2.0/token", post(token))
        .route(
            "/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.App/containerApps/{name}",
            any(container_app),
        )
        .route("/operations/{id}", get(operation))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    fake.lock().unwrap().base = base.clone();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (fake, base)
}

fn client(base: &str, secret: &str) -> ArmClient {
    client_with_timeout(base, secret, Duration::from_secs(5))
}

fn client_with_timeout(base: &str, secret: &str, operation_timeout: Duration) -> ArmClient {
    let http = ArmClient::http_client(Duration::from_secs(5)).unwrap();
    let env: BTreeMap<String, String> = [
        (AZURE_TENANT_ID, "tenant1"),
        (AZURE_CLIENT_ID, "client1"),
        (AZURE_CLIENT_SECRET, secret),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let credential = Arc::new(ChainedTokenCredential::new(vec![Arc::new(
        EnvironmentCredential::new(http.clone(), base, &env),
    )]));

    ArmClient::new(
        http,
        credential,
        "sub1",
        ArmClientOptions {
            endpoint: base.to_string(),
            api_version: "2024-03-01".to_string(),
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
            operation_timeout,
        },
    )
}

fn app() -> ContainerApp {
    serde_json::from_value(json!({
        "location": "swedencentral",
        "properties": {
            "managedEnvironmentId": "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.App/managedEnvironments/env1",
            "template": {"containers": [{"name": "container", "image": "repo/image:tag"}]}
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn test_create_follows_async_operation() {
    let (fake, base) = start_fake(FakeState::default()).await;
    let client = client(&base, "secret1");

    let poller = client
        .begin_create_or_update("rg1", "aca1", &app())
        .await
        .unwrap();
    let created = poller.result().await.unwrap();

    assert_eq!(created.provisioning_state(), Some(ProvisioningState::Succeeded));
    assert_eq!(created.ingress_fqdn(), Some("aca1.fake.azurecontainerapps.io"));

    let state = fake.lock().unwrap();
    assert_eq!(state.token_requests, 1, "token should be cached");
    assert_eq!(state.requests[0].0, "PUT");
    assert_eq!(state.requests[0].1, "sub1/rg1/aca1");
    assert_eq!(state.requests[0].2.as_deref(), Some("Bearer arm-token"));
    assert_eq!(state.requests.last().unwrap().0, "GET");
}

#[tokio::test]
async fn test_create_without_operation_header_polls_resource() {
    let (fake, base) = start_fake(FakeState {
        create_async: false,
        ..Default::default()
    })
    .await;

    let created = client(&base, "secret1")
        .begin_create_or_update("rg1", "aca2", &app())
        .await
        .unwrap()
        .await
        .unwrap();
    assert!(created.is_running());
    assert_eq!(fake.lock().unwrap().requests.len(), 2);
}

#[tokio::test]
async fn test_failed_operation_surfaces_message() {
    let (_fake, base) = start_fake(FakeState {
        operation_statuses: VecDeque::from(["Failed"]),
        ..Default::default()
    })
    .await;

    let err = client(&base, "secret1")
        .begin_create_or_update("rg1", "aca1", &app())
        .await
        .unwrap()
        .result()
        .await
        .unwrap_err();
    match err {
        ProviderError::OperationFailed { status, message, .. } => {
            assert_eq!(status, "Failed");
            assert_eq!(message, "image pull failed");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_rejected_create_maps_error_body() {
    let (_fake, base) = start_fake(FakeState {
        reject_put: true,
        ..Default::default()
    })
    .await;

    let err = client(&base, "secret1")
        .begin_create_or_update("rg1", "aca1", &app())
        .await
        .unwrap_err();
    match err {
        ProviderError::Api {
            status,
            code,
            message,
        } => {
            assert_eq!(status, 400);
            assert_eq!(code, "InvalidParameterValue");
            assert_eq!(message, "bad cpu");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_get_missing_app_is_not_found() {
    let (_fake, base) = start_fake(FakeState::default()).await;
    let err = client(&base, "secret1").get("rg1", "nope").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_bad_secret_is_authentication_error() {
    let (fake, base) = start_fake(FakeState::default()).await;
    let err = client(&base, "wrong").get("rg1", "aca1").await.unwrap_err();
    assert!(matches!(err, ProviderError::Authentication(_)));
    assert!(fake.lock().unwrap().requests.is_empty());
}

#[tokio::test]
async fn test_delete_variants() {
    let (_fake, base) = start_fake(FakeState::default()).await;
    client(&base, "secret1")
        .begin_delete("rg1", "aca1")
        .await
        .unwrap()
        .result()
        .await
        .unwrap();

    let (_fake, base) = start_fake(FakeState {
        delete_mode: DeleteMode::Missing,
        ..Default::default()
    })
    .await;
    client(&base, "secret1")
        .begin_delete("rg1", "aca1")
        .await
        .unwrap()
        .result()
        .await
        .unwrap();

    let (fake, base) = start_fake(FakeState {
        delete_mode: DeleteMode::AcceptedLocation,
        location_polls: 2,
        ..Default::default()
    })
    .await;
    client(&base, "secret1")
        .begin_delete("rg1", "aca1")
        .await
        .unwrap()
        .result()
        .await
        .unwrap();
    assert_eq!(fake.lock().unwrap().location_polls, 0);
}

fn assert_timed_out(err: ProviderError) {
    match err {
        ProviderError::OperationFailed { status, .. } => assert_eq!(status, "TimedOut"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_operation_that_never_finishes_times_out() {
    let (_fake, base) = start_fake(FakeState {
        operation_statuses: VecDeque::from(["InProgress"]),
        ..Default::default()
    })
    .await;

    let err = client_with_timeout(&base, "secret1", Duration::from_millis(200))
        .begin_create_or_update("rg1", "aca1", &app())
        .await
        .unwrap()
        .result()
        .await
        .unwrap_err();
    assert_timed_out(err);
}

#[tokio::test]
async fn test_provisioning_that_never_settles_times_out() {
    let (fake, base) = start_fake(FakeState {
        create_async: false,
        stuck_provisioning: true,
        ..Default::default()
    })
    .await;

    let err = client_with_timeout(&base, "secret1", Duration::from_millis(200))
        .begin_create_or_update("rg1", "aca1", &app())
        .await
        .unwrap()
        .result()
        .await
        .unwrap_err();
    assert_timed_out(err);
    assert!(fake.lock().unwrap().requests.len() > 2);
}
