//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one task per connection. Shutdown stops the
//! accept loop, asks open connections to finish their current request and
//! waits a bounded time for them to drain.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::auth::JwtValidator;
use crate::cache::{spawn_cleanup_task, ExpiringCache, StoreConfig};
use crate::chat::identity::{InMemoryUserDirectory, MongoUserDirectory, UserDirectory};
use crate::chat::machine::{ChatDeps, ConversationMachine};
use crate::chat::transport::{ChatTransport, ConvoniteTransport, LogTransport};
use crate::config::Args;
use crate::db::MongoClient;
use crate::logging::UsageLogger;
use crate::routes;
use crate::services::catalog::{CourseCatalog, HttpCatalog};
use crate::services::evaluation::{
    EvaluationEngine, EvaluationStore, InMemoryEvaluationStore, MongoEvaluationStore,
};
use crate::services::generation::GenerationOrchestrator;
use crate::services::generator::{HttpQuestionGenerator, QuestionGenerator};
use crate::services::plans::PremiumCatalog;
use crate::services::progress::{InMemoryProgressStore, MongoProgressStore, ProgressStore};
use crate::services::quota::{InMemoryQuotaStore, MongoQuotaStore, QuotaLedger, QuotaStore};
use crate::services::reports::ReportService;
use crate::services::subscriptions::{
    InMemorySubscriptionStore, MongoSubscriptionStore, PlanResolver, SubscriptionStore,
};
use crate::services::vault::{
    AnswerVault, GenerationStore, InMemoryGenerationStore, MongoGenerationStore,
};
use crate::types::{ExamdeskError, Result};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// How long shutdown waits for open connections
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Persistence behind the services
pub struct Stores {
    pub quota: Arc<dyn QuotaStore>,
    pub generations: Arc<dyn GenerationStore>,
    pub evaluations: Arc<dyn EvaluationStore>,
    pub progress: Arc<dyn ProgressStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub users: Arc<dyn UserDirectory>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            quota: Arc::new(InMemoryQuotaStore::new()),
            generations: Arc::new(InMemoryGenerationStore::new()),
            evaluations: Arc::new(InMemoryEvaluationStore::new()),
            progress: Arc::new(InMemoryProgressStore::new()),
            subscriptions: Arc::new(InMemorySubscriptionStore::new()),
            users: Arc::new(InMemoryUserDirectory::new()),
        }
    }

    /// Open every collection, applying indexes
    pub async fn mongo(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            quota: Arc::new(MongoQuotaStore::new(mongo).await?),
            generations: Arc::new(MongoGenerationStore::new(mongo).await?),
            evaluations: Arc::new(MongoEvaluationStore::new(mongo).await?),
            progress: Arc::new(MongoProgressStore::new(mongo).await?),
            subscriptions: Arc::new(MongoSubscriptionStore::new(mongo).await?),
            users: Arc::new(MongoUserDirectory::new(mongo).await?),
        })
    }
}

/// Outbound services the backend calls
pub struct Upstreams {
    pub generator: Arc<dyn QuestionGenerator>,
    pub catalog: Arc<dyn CourseCatalog>,
    pub transport: Arc<dyn ChatTransport>,
}

impl Upstreams {
    pub fn from_args(args: &Args) -> Self {
        let transport: Arc<dyn ChatTransport> =
            match (&args.chat.chat_api_key, &args.chat.chat_channel_id) {
                (Some(key), Some(channel)) => Arc::new(ConvoniteTransport::new(
                    args.chat.chat_api_url.clone(),
                    key.clone(),
                    channel.clone(),
                    Duration::from_secs(args.chat.chat_timeout_secs),
                )),
                _ => {
                    warn!("Chat transport credentials not set - outbound chat messages are only logged");
                    Arc::new(LogTransport)
                }
            };

        Self {
            generator: Arc::new(HttpQuestionGenerator::new(
                args.generator_url.clone(),
                args.generator_timeout(),
            )),
            catalog: Arc::new(HttpCatalog::new(
                args.catalog_url.clone(),
                args.catalog_timeout(),
            )),
            transport,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub mongo: Option<MongoClient>,
    pub jwt: JwtValidator,
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub engine: Arc<EvaluationEngine>,
    pub reports: Arc<ReportService>,
    pub chat: Arc<ConversationMachine>,
    /// Conversation sessions
    pub sessions: Arc<ExpiringCache>,
    /// Inbound message dedupe markers, bounded apart from sessions
    pub dedupe: Arc<ExpiringCache>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the services over the given stores and upstreams
    pub fn new(
        args: Args,
        mongo: Option<MongoClient>,
        stores: Stores,
        upstreams: Upstreams,
        usage: UsageLogger,
    ) -> Result<Self> {
        let jwt = match args.jwt_secret() {
            Some(secret) => JwtValidator::new(&secret, args.jwt_expiry_seconds)?,
            None => return Err(ExamdeskError::Config("JWT_SECRET is not set".into())),
        };

        let premium = match &args.premium_chapters_file {
            Some(path) => PremiumCatalog::from_file(path)?,
            None => PremiumCatalog::default(),
        };

        let resolver = PlanResolver::new(stores.subscriptions);
        let quota = Arc::new(
            QuotaLedger::new(stores.quota, args.plans.catalog()).with_usage_logger(usage.clone()),
        );
        let vault = Arc::new(AnswerVault::new(stores.generations));

        let orchestrator = Arc::new(
            GenerationOrchestrator::new(
                resolver.clone(),
                premium,
                Arc::clone(&quota),
                upstreams.generator,
                Arc::clone(&vault),
            )
            .with_usage_logger(usage.clone()),
        );
        let engine = Arc::new(
            EvaluationEngine::new(
                resolver.clone(),
                Arc::clone(&quota),
                Arc::clone(&vault),
                Arc::clone(&stores.evaluations),
                Arc::clone(&stores.progress),
            )
            .with_usage_logger(usage),
        );
        let reports = Arc::new(ReportService::new(
            resolver,
            quota,
            stores.evaluations,
            stores.progress,
            vault,
        ));

        let cleanup_interval = Duration::from_secs(args.store_cleanup_interval_secs.max(1));
        let sessions = Arc::new(ExpiringCache::new(StoreConfig::new(
            args.session_max_entries,
            cleanup_interval,
        )));
        let dedupe = Arc::new(ExpiringCache::new(StoreConfig::new(
            args.dedupe_max_entries,
            cleanup_interval,
        )));
        let chat = Arc::new(ConversationMachine::new(
            ChatDeps {
                transport: upstreams.transport,
                catalog: upstreams.catalog,
                orchestrator: Arc::clone(&orchestrator),
                engine: Arc::clone(&engine),
                users: stores.users,
            },
            sessions.clone(),
            dedupe.clone(),
            args.session_ttl(),
            args.dedupe_ttl(),
        ));

        Ok(Self {
            args,
            mongo,
            jwt,
            orchestrator,
            engine,
            reports,
            chat,
            sessions,
            dedupe,
            started_at: Instant::now(),
        })
    }
}

/// Run the HTTP server until Ctrl-C
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!("Examdesk listening on {}", state.args.listen);

    if state.args.dev_mode {
        warn!("Development mode enabled - using the development JWT secret when none is set");
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };
    serve(state, listener, shutdown).await
}

/// Accept connections on `listener` until `shutdown` resolves
pub async fn serve(
    state: Arc<AppState>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    spawn_cleanup_task(Arc::clone(&state.sessions));
    spawn_cleanup_task(Arc::clone(&state.dedupe));
    info!(
        "Session store enabled (max {} sessions, {} dedupe markers)",
        state.sessions.config().max_entries,
        state.dedupe.config().max_entries
    );

    let (drain_tx, drain_rx) = watch::channel(false);
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    connections.spawn(serve_connection(
                        Arc::clone(&state),
                        stream,
                        addr,
                        drain_rx.clone(),
                    ));
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown requested, draining {} connections", connections.len());
                break;
            }
        }

        while connections.try_join_next().is_some() {}
    }

    drop(listener);
    let _ = drain_tx.send(true);

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Connections still open after {:?}, aborting them", DRAIN_TIMEOUT);
        connections.shutdown().await;
    }

    info!("Server stopped");
    Ok(())
}

async fn serve_connection(
    state: Arc<AppState>,
    stream: TcpStream,
    addr: SocketAddr,
    mut drain: watch::Receiver<bool>,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        async move { handle_request(state, addr, req).await }
    });

    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(err) = result {
                error!("Error serving connection from {}: {:?}", addr, err);
            }
        }
        _ = drain.changed() => {
            conn.as_mut().graceful_shutdown();
            if let Err(err) = conn.await {
                error!("Error draining connection from {}: {:?}", addr, err);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::OPTIONS, _) => preflight_response(),

        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            routes::readiness_check(Arc::clone(&state)).await
        }
        (Method::GET, "/version") => routes::version_info(),

        (Method::POST, "/api/mcq/generate") => routes::handle_generate(req, state).await,
        (Method::POST, "/api/mcq/submit") => routes::handle_submit(req, state).await,
        (Method::GET, "/api/mcq/dashboard") => routes::handle_dashboard(req, state).await,
        (Method::GET, "/api/mcq/progress") => routes::handle_progress(req, state).await,
        (Method::GET, "/api/mcq/results") => routes::handle_results(req, state).await,
        (Method::GET, "/api/mcq/last-attempted") => {
            routes::handle_last_attempted(req, state).await
        }
        (Method::GET, "/api/mcq/last-attempted-list") => {
            routes::handle_last_attempted_list(req, state).await
        }

        (Method::POST, "/webhook") | (Method::POST, "/wati/webhook") => {
            routes::handle_webhook(req, state).await
        }

        _ => not_found_response(&path),
    };

    Ok(to_boxed(response))
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    routes::json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({
            "success": false,
            "error": "Not Found",
            "path": path,
        }),
    )
}
