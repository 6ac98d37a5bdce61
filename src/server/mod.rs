use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderName, Method},
    middleware,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
};

use crate::config::{Limits, ServerConfig};
use pipeline::Route;
use rate_limit::{BurstyWindowLimiter, Throttle};
use response_cache::{ResponseCache, ResponseCacheConfig};
use storage::{PgExecutor, QueryExecutor};

pub mod errors;
pub mod handlers;
pub mod params;
pub mod pipeline;
pub mod query_context;
pub mod rate_limit;
pub mod response_cache;
pub mod storage;

/// Largest accepted request body.
const BODY_LIMIT: usize = 16 * 1024 * 1024;

pub struct AppState {
    pub config: ServerConfig,
    pub executor: Arc<dyn QueryExecutor>,
    pub cache: ResponseCache,
    pub throttle: Option<Throttle>,
}

impl AppState {
    pub fn new(config: ServerConfig, executor: Arc<dyn QueryExecutor>) -> Self {
        let throttle = match config.throttle_rate_per_minute {
            0 => None,
            rate => Some(Throttle::new(
                Arc::new(BurstyWindowLimiter::new(rate)),
                &config.throttle_unlimited,
            )),
        };
        AppState {
            cache: ResponseCache::new(ResponseCacheConfig::from(&config)),
            config,
            executor,
            throttle,
        }
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn limits(&self) -> Limits {
        Limits::from(&self.config)
    }
}

/// Client identity for throttling and cache keys: the whole
/// `x-forwarded-for` value, else the peer address. The value is compared as
/// a unit, so a client-written leading entry cannot impersonate another
/// address.
pub fn client_id(req: &Request) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(addr) = forwarded {
        return addr.to_string();
    }

    peer_ip(req).map(|ip| ip.to_string()).unwrap_or_default()
}

/// Socket peer address, ignoring any forwarding headers.
pub fn peer_ip(req: &Request) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn api_route(router: Router<Arc<AppState>>, route: Arc<Route>) -> Router<Arc<AppState>> {
    let path = route.spec.path;
    let for_post = route.clone();
    router.route(
        path,
        get(move |State(state): State<Arc<AppState>>, req: Request| {
            pipeline::dispatch(state, route.clone(), req)
        })
        .post(move |State(state): State<Arc<AppState>>, req: Request| {
            pipeline::dispatch(state, for_post.clone(), req)
        }),
    )
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static("x-app-name")]);

    let mut router = Router::new()
        .route("/", get(handlers::docs_redirect))
        .route("/health", get(handlers::health_check))
        .route("/v2/admin/flushcache", get(handlers::flush_cache));

    for route in crate::routes::all() {
        router = api_route(router, route);
    }

    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::throttle,
        ))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(CatchPanicLayer::new())
        .layer(cors)
        .layer(TimeoutLayer::new(Duration::from_secs(
            state.config.request_timeout_secs,
        )))
        .with_state(state)
}

pub async fn run_with_config(config: ServerConfig) {
    log::info!(
        "Server configuration: http={}:{}, response_max={}, cache={}, throttle={}/min",
        config.http_host,
        config.http_port,
        config.response_max,
        config.cache_enabled,
        config.throttle_rate_per_minute
    );

    let executor = match PgExecutor::connect(&config).await {
        Ok(executor) => executor,
        Err(e) => {
            log::error!("✗ Failed to connect to the database: {}", e);
            std::process::exit(1);
        }
    };

    let http_bind_address = format!("{}:{}", config.http_host, config.http_port);
    let state = Arc::new(AppState::new(config, Arc::new(executor)));
    let app = build_router(state);

    let listener = match TcpListener::bind(&http_bind_address).await {
        Ok(listener) => {
            log::info!("Successfully bound HTTP listener to {}", http_bind_address);
            listener
        }
        Err(e) => {
            log::error!(
                "✗ FATAL: Failed to bind HTTP listener to {}: {}",
                http_bind_address,
                e
            );
            std::process::exit(1);
        }
    };

    log::info!("lexiquery is running on http://{}", http_bind_address);

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received shutdown signal, shutting down...");
        }
    });

    if let Err(e) = server.await {
        log::error!("HTTP server fatal error: {:?}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_client_id_keeps_whole_forwarded_header() {
        let mut req = Request::builder()
            .header("x-forwarded-for", "127.0.0.1, 203.0.113.7")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 5555))));
        assert_eq!(client_id(&req), "127.0.0.1, 203.0.113.7");
        assert_eq!(peer_ip(&req), Some(IpAddr::from([192, 0, 2, 1])));
    }

    #[test]
    fn test_client_id_from_connect_info() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 5555))));
        assert_eq!(client_id(&req), "192.0.2.1");

        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_id(&bare), "");
    }
}
