//! HTTP surface over a local record store.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::Record;
use rollcall_store::protocol::{
    ChangeAck, ErrorBody, HealthStatus, InsertAck, InsertRequest, QueryRequest, ServerInfo,
    UpdateRequest, COUNT_PATH, DELETE_PATH, HEALTH_PATH, INFO_PATH, INSERT_PATH, SELECT_PATH,
    SELECT_SINGLE_PATH, UPDATE_PATH,
};
use rollcall_store::{assign_ids, LocalStore, RecordStore, StoreError};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info_span, Level};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LocalStore>,
    /// Port actually bound, reported by `/api/info`.
    pub port: u16,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest { status: StatusCode, message: String },
    Store(StoreError),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest { status, message } => (status, message),
            AppError::Store(err) => {
                let status = match &err {
                    StoreError::Conflict { .. } => StatusCode::CONFLICT,
                    StoreError::MissingId { .. }
                    | StoreError::Record(_)
                    | StoreError::Decode(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                } else {
                    tracing::debug!(error = %err, "request rejected");
                }
                (status, err.to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(INFO_PATH, get(info))
        .route(SELECT_PATH, post(select))
        .route(SELECT_SINGLE_PATH, post(select_single))
        .route(INSERT_PATH, post(insert))
        .route(UPDATE_PATH, post(update))
        .route(DELETE_PATH, post(delete))
        .route(COUNT_PATH, post(count))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        "http_request",
                        uri = ?request.uri(),
                        method = ?request.method(),
                    )
                })
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO))
                .on_failure(tower_http::trace::DefaultOnFailure::new().level(Level::WARN)),
        )
}

/// Serve until `signal` resolves.
pub async fn serve<F>(
    store: Arc<LocalStore>,
    listener: TcpListener,
    signal: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let port = listener.local_addr()?.port();
    let app = router(AppState { store, port });
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        message: Some("Server is running".to_string()),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Non-loopback IPv4 addresses of this host.
fn network_addresses() -> Vec<String> {
    match local_ip_address::list_afinet_netifas() {
        Ok(ifaces) => ifaces
            .into_iter()
            .filter_map(|(_, ip)| match ip {
                IpAddr::V4(v4) if !v4.is_loopback() => Some(v4.to_string()),
                _ => None,
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "could not list network interfaces");
            Vec::new()
        }
    }
}

async fn info(State(state): State<AppState>) -> Json<ServerInfo> {
    let network_addresses = network_addresses();
    let host = network_addresses
        .first()
        .cloned()
        .unwrap_or_else(|| "localhost".to_string());
    Json(ServerInfo {
        port: state.port,
        access_url: format!("http://{host}:{}", state.port),
        network_addresses,
    })
}

async fn select(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<Vec<Record>> {
    let Json(req) = payload?;
    let filter = req.filters.unwrap_or_default();
    Ok(Json(state.store.select(req.table, &filter).await?))
}

async fn select_single(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<Option<Record>> {
    let Json(req) = payload?;
    let filter = req.filters.unwrap_or_default();
    Ok(Json(state.store.select_single(req.table, &filter).await?))
}

async fn insert(
    State(state): State<AppState>,
    payload: Result<Json<InsertRequest>, JsonRejection>,
) -> ApiResult<InsertAck> {
    let Json(req) = payload?;
    let mut records = req.data.into_records();
    assign_ids(&mut records);
    let ids = state.store.insert(req.table, records).await?;
    Ok(Json(InsertAck {
        success: true,
        count: ids.len(),
    }))
}

async fn update(
    State(state): State<AppState>,
    payload: Result<Json<UpdateRequest>, JsonRejection>,
) -> ApiResult<ChangeAck> {
    let Json(req) = payload?;
    let filter = req.filters.unwrap_or_default();
    let changes = state.store.update(req.table, &filter, &req.updates).await?;
    Ok(Json(ChangeAck {
        success: true,
        changes,
    }))
}

async fn delete(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<ChangeAck> {
    let Json(req) = payload?;
    let filter = req.filters.unwrap_or_default();
    let changes = state.store.delete(req.table, &filter).await?;
    Ok(Json(ChangeAck {
        success: true,
        changes,
    }))
}

async fn count(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<usize> {
    let Json(req) = payload?;
    let filter = req.filters.unwrap_or_default();
    Ok(Json(state.store.count(req.table, &filter).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{Session, Table};
    use rollcall_store::{Filter, RecordAccess, Via};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    struct TestServer {
        url: String,
        store: Arc<LocalStore>,
        shutdown: Option<oneshot::Sender<()>>,
        task: JoinHandle<std::io::Result<()>>,
    }

    impl TestServer {
        async fn stop(mut self) {
            if let Some(tx) = self.shutdown.take() {
                let _ = tx.send(());
            }
            self.task.await.unwrap().unwrap();
        }
    }

    async fn spawn_server() -> TestServer {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(store.clone(), listener, async {
            let _ = rx.await;
        }));
        TestServer {
            url,
            store,
            shutdown: Some(tx),
            task,
        }
    }

    async fn client_access(server: &TestServer) -> RecordAccess {
        let local = Arc::new(LocalStore::open_in_memory().await.unwrap());
        RecordAccess::connect(local, Some(&server.url), Duration::from_secs(5))
            .await
            .unwrap()
    }

    fn rec(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_health_and_info() {
        let server = spawn_server().await;
        let access = client_access(&server).await;
        assert!(access.is_remote_mode());
        assert!(access.check_health().await);

        let info = access.server_info().await.unwrap();
        let port: u16 = server.url.rsplit(':').next().unwrap().parse().unwrap();
        assert_eq!(info.port, port);
        assert!(info.access_url.ends_with(&format!(":{port}")));
        assert!(info.network_addresses.iter().all(|a| a != "127.0.0.1"));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_insert_generates_id_and_reads_back_remotely() {
        let server = spawn_server().await;
        let access = client_access(&server).await;

        let served = access
            .insert(Table::Students, vec![rec(json!({"name": "Asha", "usn": "U1"}))])
            .await
            .unwrap();
        assert_eq!(served.via, Via::Remote);
        let id = served.value[0].clone();
        assert!(!id.is_empty());

        let row = access
            .select_single(Table::Students, &Filter::by("id", id.as_str()))
            .await
            .unwrap();
        assert_eq!(row.via, Via::Remote);
        assert_eq!(row.value.unwrap()["usn"], "U1");

        // Written to the service's store, not the client's local one.
        assert_eq!(server.store.count(Table::Students, &Filter::all()).await.unwrap(), 1);
        assert_eq!(access.local_store().count(Table::Students, &Filter::all()).await.unwrap(), 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_update_does_not_stamp_ended_at() {
        let server = spawn_server().await;
        let access = client_access(&server).await;
        let session = Session::new("Lecture", "c1", chrono::Utc::now(), 60, "admin");
        let record = rollcall_core::to_record(&session).unwrap();
        access.insert(Table::Sessions, vec![record]).await.unwrap();

        let changed = access
            .update(
                Table::Sessions,
                &Filter::by("id", session.id.as_str()),
                &rec(json!({"status": "ended"})),
            )
            .await
            .unwrap();
        assert_eq!(changed.value, 1);

        let row = access
            .select_single(Table::Sessions, &Filter::by("id", session.id.as_str()))
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        assert_eq!(row["status"], "ended");
        assert!(row.get("ended_at").is_none());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_filters_travel_over_the_wire() {
        let server = spawn_server().await;
        let access = client_access(&server).await;
        access
            .insert(
                Table::Students,
                vec![
                    rec(json!({"name": "C", "semester": 5})),
                    rec(json!({"name": "A", "semester": 5})),
                    rec(json!({"name": "B", "semester": 3})),
                ],
            )
            .await
            .unwrap();

        let rows = access
            .select(
                Table::Students,
                &Filter::by("semester", 5).order_by("name", false).limit(1),
            )
            .await
            .unwrap()
            .into_inner();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "C");

        let n = access
            .count(Table::Students, &Filter::by("semester", 5).limit(1))
            .await
            .unwrap();
        assert_eq!(n.value, 2);

        let removed = access
            .delete(Table::Students, &Filter::by("semester", 3))
            .await
            .unwrap();
        assert_eq!(removed.value, 1);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_remote_conflict_is_not_retried_locally() {
        let server = spawn_server().await;
        let access = client_access(&server).await;
        let pair = json!({"session_id": "x", "student_id": "s"});
        access
            .insert(Table::Attendance, vec![rec(pair.clone())])
            .await
            .unwrap();

        let err = access
            .insert(Table::Attendance, vec![rec(pair)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { table: Table::Attendance, .. }), "got {err}");
        assert_eq!(access.local_store().count(Table::Attendance, &Filter::all()).await.unwrap(), 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_raw_protocol_bodies() {
        let server = spawn_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{}{}", server.url, SELECT_PATH))
            .json(&json!({"table": "studnets"}))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
        let body: ErrorBody = resp.json().await.unwrap();
        assert!(!body.error.is_empty());

        let resp = reqwest::Client::new()
            .post(format!("{}{}", server.url, INSERT_PATH))
            .json(&json!({"table": "students", "data": [{"name": "x"}, {"name": "y"}]}))
            .send()
            .await
            .unwrap();
        let ack: InsertAck = resp.json().await.unwrap();
        assert!(ack.success);
        assert_eq!(ack.count, 2);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_server_going_away_falls_back_to_local() {
        let server = spawn_server().await;
        let local = Arc::new(LocalStore::open_in_memory().await.unwrap());
        local
            .insert(Table::Classes, vec![rec(json!({"id": "c1", "section_name": "A"}))])
            .await
            .unwrap();
        let access = RecordAccess::connect(local.clone(), Some(&server.url), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(access.is_remote_mode());
        assert!(access
            .select(Table::Classes, &Filter::all())
            .await
            .unwrap()
            .value
            .is_empty());

        server.stop().await;

        let served = access.select(Table::Classes, &Filter::all()).await.unwrap();
        assert_eq!(served.via, Via::Local);
        assert_eq!(served.value, local.select(Table::Classes, &Filter::all()).await.unwrap());
    }
}
