use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{signal, sync::watch};

use crate::{
    config::Config,
    dataset::DocumentRecord,
    history::{HistoryError, SearchHistory},
    results::{self, PageLayout, ResultPage},
    semantic::{PipelineState, QueryError, SearchPipeline},
    translate::{TranslateError, TranslationRelay},
};

struct SharedState {
    pipeline: Arc<Mutex<SearchPipeline>>,
    readiness: watch::Receiver<PipelineState>,
    history: Mutex<SearchHistory>,
    relay: TranslationRelay,
    layout: PageLayout,
}

pub fn start_daemon(
    config: Config,
    pipeline: SearchPipeline,
    history: SearchHistory,
) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(config, pipeline, history))
}

async fn start_app(
    config: Config,
    pipeline: SearchPipeline,
    history: SearchHistory,
) -> anyhow::Result<()> {
    let readiness = pipeline.readiness();
    let pipeline = Arc::new(Mutex::new(pipeline));

    let shared_state = Arc::new(SharedState {
        pipeline: pipeline.clone(),
        readiness,
        history: Mutex::new(history),
        relay: TranslationRelay::new(&config.translate)?,
        layout: config.results.layout(),
    });

    spawn_init(pipeline.clone());

    let app = router(shared_state, config.server.public_dir.as_deref());

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    log::info!("listening on {}", config.server.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::warn!("waiting for search pipeline to stop");
    tokio::task::spawn_blocking(move || match pipeline.lock() {
        Ok(mut pipeline) => pipeline.shutdown(),
        Err(_) => log::error!("search pipeline lock poisoned, skipping shutdown"),
    })
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize the pipeline in the background. Readiness is published through
/// the pipeline's watch channel.
fn spawn_init(pipeline: Arc<Mutex<SearchPipeline>>) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let Ok(mut pipeline) = pipeline.lock() else {
            log::error!("search pipeline lock poisoned, skipping init");
            return;
        };
        // failure is logged by the pipeline and reported through readiness
        let _ = pipeline.init();
    })
}

fn router(shared_state: Arc<SharedState>, public_dir: Option<&str>) -> Router {
    let app = Router::new()
        .route("/api/ready", get(ready))
        .route("/api/search", post(search))
        .route("/api/history", get(history).delete(clear_history))
        .route("/dataset.json", get(dataset))
        .route("/translate", post(translate))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state);

    match public_dir {
        Some(dir) => app.fallback_service(tower_http::services::ServeDir::new(dir)),
        None => app,
    }
}

#[derive(Debug)]
enum HttpError {
    NotReady(PipelineState),
    Query(QueryError),
    History(HistoryError),
    Translate(TranslateError),
    Internal(String),
}

impl From<QueryError> for HttpError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::NotReady(state) => HttpError::NotReady(state),
            err => HttpError::Query(err),
        }
    }
}

impl From<HistoryError> for HttpError {
    fn from(err: HistoryError) -> Self {
        HttpError::History(err)
    }
}

impl From<TranslateError> for HttpError {
    fn from(err: TranslateError) -> Self {
        HttpError::Translate(err)
    }
}

impl From<tokio::task::JoinError> for HttpError {
    fn from(err: tokio::task::JoinError) -> Self {
        HttpError::Internal(err.to_string())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            HttpError::NotReady(state) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Search is not ready (state: {state:?})"),
            ),
            HttpError::Query(QueryError::EmptyQuery) => {
                (StatusCode::BAD_REQUEST, QueryError::EmptyQuery.to_string())
            }
            HttpError::Query(err) => {
                log::error!("{err:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            HttpError::History(err) => {
                log::error!("{err:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            HttpError::Translate(err) => {
                log::error!("{err:?}");
                (StatusCode::BAD_GATEWAY, err.to_string())
            }
            HttpError::Internal(message) => {
                log::error!("{message}");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, HttpError> {
    mutex
        .lock()
        .map_err(|_| HttpError::Internal("lock poisoned".to_string()))
}

/// Reject early, without waiting on the pipeline lock held by init.
fn ensure_ready(state: &SharedState) -> Result<(), HttpError> {
    match *state.readiness.borrow() {
        PipelineState::Ready | PipelineState::Querying => Ok(()),
        other => Err(HttpError::NotReady(other)),
    }
}

#[derive(Serialize)]
struct ReadyResponse {
    state: PipelineState,
    ready: bool,
}

async fn ready(State(state): State<Arc<SharedState>>) -> Json<ReadyResponse> {
    let current = *state.readiness.borrow();
    Json(ReadyResponse {
        state: current,
        ready: matches!(current, PipelineState::Ready | PipelineState::Querying),
    })
}

fn first_page() -> usize {
    1
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "first_page")]
    page: usize,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<ResultPage>, HttpError> {
    ensure_ready(&state)?;

    let query = request.query.trim().to_string();
    if query.is_empty() {
        return Err(QueryError::EmptyQuery.into());
    }

    let page = tokio::task::spawn_blocking(move || -> Result<ResultPage, HttpError> {
        let (ranked, documents) = {
            let mut pipeline = lock(&state.pipeline)?;
            (pipeline.search(&query)?, pipeline.shared_documents())
        };

        if let Err(err) = lock(&state.history)?.record(&query) {
            log::warn!("failed to record search history: {err}");
        }

        Ok(results::paginate(
            &query,
            &ranked,
            &documents,
            state.layout,
            request.page,
        ))
    })
    .await??;

    Ok(Json(page))
}

async fn dataset(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<Vec<DocumentRecord>>, HttpError> {
    ensure_ready(&state)?;

    let pipeline = state.pipeline.clone();
    let documents = tokio::task::spawn_blocking(move || -> Result<_, HttpError> {
        Ok(lock(&pipeline)?.shared_documents())
    })
    .await??;

    Ok(Json(documents.to_vec()))
}

#[derive(Serialize)]
struct HistoryResponse {
    queries: Vec<String>,
}

async fn history(State(state): State<Arc<SharedState>>) -> Result<Json<HistoryResponse>, HttpError> {
    let queries = lock(&state.history)?.entries().to_vec();
    Ok(Json(HistoryResponse { queries }))
}

async fn clear_history(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<HistoryResponse>, HttpError> {
    tokio::task::spawn_blocking(move || -> Result<(), HttpError> {
        lock(&state.history)?.clear()?;
        Ok(())
    })
    .await??;

    Ok(Json(HistoryResponse { queries: vec![] }))
}

#[derive(Deserialize)]
struct TranslateRequest {
    texts: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    translated_texts: Vec<String>,
}

async fn translate(
    State(state): State<Arc<SharedState>>,
    Json(request): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>, HttpError> {
    let translated_texts = state.relay.translate_all(&request.texts).await?;
    Ok(Json(TranslateResponse { translated_texts }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslateConfig;
    use crate::storage::BackendLocal;
    use crate::tests::support::{self, VocabularyLoader, CAT_DOG};
    use serde_json::Value;

    struct TestServer {
        url: String,
        pipeline: Arc<Mutex<SearchPipeline>>,
        readiness: watch::Receiver<PipelineState>,
        client: reqwest::Client,
        _tmp: tempfile::TempDir,
    }

    impl TestServer {
        async fn start(dataset: &str) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let pipeline = support::pipeline(tmp.path(), dataset, VocabularyLoader::default());
            let readiness = pipeline.readiness();
            let pipeline = Arc::new(Mutex::new(pipeline));

            let history_store = Arc::new(BackendLocal::new(tmp.path()).unwrap());
            let translate = TranslateConfig {
                servers: vec!["http://127.0.0.1:9".to_string()],
                ..Default::default()
            };

            let shared_state = Arc::new(SharedState {
                pipeline: pipeline.clone(),
                readiness: readiness.clone(),
                history: Mutex::new(SearchHistory::load(history_store, 10).unwrap()),
                relay: TranslationRelay::new(&translate).unwrap(),
                layout: PageLayout::default(),
            });

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let app = router(shared_state, None);
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                url: format!("http://{addr}"),
                pipeline,
                readiness,
                client: reqwest::Client::new(),
                _tmp: tmp,
            }
        }

        async fn init(&mut self) {
            spawn_init(self.pipeline.clone()).await.unwrap();
            self.readiness
                .wait_for(|s| *s == PipelineState::Ready)
                .await
                .unwrap();
        }

        async fn search(&self, body: Value) -> reqwest::Response {
            self.client
                .post(format!("{}/api/search", self.url))
                .json(&body)
                .send()
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_search_before_ready_is_rejected() {
        let server = TestServer::start(CAT_DOG).await;

        let ready: Value = reqwest::get(format!("{}/api/ready", server.url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(ready["ready"], false);
        assert_eq!(ready["state"], "uninitialized");

        let resp = server.search(json!({ "query": "cat" })).await;
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        let resp = reqwest::get(format!("{}/dataset.json", server.url)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_search_after_ready() {
        let mut server = TestServer::start(CAT_DOG).await;
        server.init().await;

        let resp = server.search(json!({ "query": "cat" })).await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let page: Value = resp.json().await.unwrap();
        assert_eq!(page["query"], "cat");
        assert_eq!(page["page"], 1);
        assert_eq!(page["total"], 2);
        assert_eq!(page["results"][0]["index"], 0);
        assert_eq!(page["results"][0]["title"], "A");
        assert_eq!(page["results"][0]["rank"], 1);

        let history: Value = reqwest::get(format!("{}/api/history", server.url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history["queries"], json!(["cat"]));
    }

    #[tokio::test]
    async fn test_empty_query_is_bad_request() {
        let mut server = TestServer::start(CAT_DOG).await;
        server.init().await;

        let resp = server.search(json!({ "query": "   " })).await;
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].is_string());

        let ready: Value = reqwest::get(format!("{}/api/ready", server.url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(ready["ready"], true);
    }

    #[tokio::test]
    async fn test_unaddressable_page_keeps_pipeline_usable() {
        let mut server = TestServer::start(CAT_DOG).await;
        server.init().await;

        let resp = server
            .search(json!({ "query": "cat", "page": usize::MAX }))
            .await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let page: Value = resp.json().await.unwrap();
        assert_eq!(page["results"], json!([]));
        assert_eq!(page["total"], 2);

        let resp = server.search(json!({ "query": "dog" })).await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let page: Value = resp.json().await.unwrap();
        assert_eq!(page["results"][0]["index"], 1);

        let resp = reqwest::get(format!("{}/dataset.json", server.url)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(server.pipeline.lock().unwrap().state(), PipelineState::Ready);
    }

    #[tokio::test]
    async fn test_dataset_served_when_ready() {
        let mut server = TestServer::start(CAT_DOG).await;
        server.init().await;

        let documents: Value = reqwest::get(format!("{}/dataset.json", server.url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(documents.as_array().unwrap().len(), 2);
        assert_eq!(documents[1]["content"], "dog");
    }

    #[tokio::test]
    async fn test_clear_history() {
        let mut server = TestServer::start(CAT_DOG).await;
        server.init().await;
        server.search(json!({ "query": "dog" })).await;

        let resp = server
            .client
            .delete(format!("{}/api/history", server.url))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let history: Value = reqwest::get(format!("{}/api/history", server.url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history["queries"], json!([]));
    }

    #[tokio::test]
    async fn test_translate_upstream_down_is_bad_gateway() {
        let server = TestServer::start(CAT_DOG).await;

        let resp = server
            .client
            .post(format!("{}/translate", server.url))
            .json(&json!({ "texts": ["hola"] }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_failed_init_reports_not_ready() {
        let tmp = tempfile::tempdir().unwrap();
        let pipeline = support::pipeline(tmp.path(), CAT_DOG, VocabularyLoader::failing());
        let mut readiness = pipeline.readiness();
        let pipeline = Arc::new(Mutex::new(pipeline));

        spawn_init(pipeline.clone()).await.unwrap();

        let state = *readiness.wait_for(|s| *s == PipelineState::Failed).await.unwrap();
        assert_eq!(state, PipelineState::Failed);
    }
}
