//! Route handlers for the ipwarden server

pub mod admin;
pub mod auth;
pub mod ingress;

use crate::abuse::{AnomalyScanner, LocalRateLimiter, RateLimiter, RedisRateLimiter};
use crate::cache::{GeoCache, LocalGeoCache};
use crate::config::Config;
use crate::db::PgStore;
use crate::geo::{GeoLocator, GeoProvider, GeoResolver, IpApiProvider};
use crate::pipeline::{IngressPipeline, RateRule};
use crate::redis::RedisGeoCache;
use crate::store::{AuditLog, BlockList, FlagStore};
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use fred::clients::Client as RedisClient;
use sqlx::PgPool;
use std::sync::Arc;

/// Storage and provider handles behind the application state
#[derive(Clone)]
pub struct Backends {
    pub blocklist: Arc<dyn BlockList>,
    pub audit: Arc<dyn AuditLog>,
    pub flags: Arc<dyn FlagStore>,
    pub cache: Arc<dyn GeoCache>,
    pub limiter: Arc<dyn RateLimiter>,
    pub provider: Arc<dyn GeoProvider>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<IngressPipeline>,
    pub scanner: Arc<AnomalyScanner>,
    pub blocklist: Arc<dyn BlockList>,
    pub audit: Arc<dyn AuditLog>,
    pub flags: Arc<dyn FlagStore>,
    pub cache: Arc<dyn GeoCache>,
    /// Set when the rate limiter runs in-process, for periodic cleanup
    pub local_limiter: Option<Arc<LocalRateLimiter>>,
    /// Set when the geo cache runs in-process, for periodic cleanup
    pub local_cache: Option<Arc<LocalGeoCache>>,
}

impl AppState {
    /// Postgres for durable state; Redis for the geo cache and rate limiter
    /// when configured, in-process equivalents otherwise
    pub fn new(config: Config, db: PgPool, redis: Option<RedisClient>) -> anyhow::Result<Self> {
        let store = Arc::new(PgStore::new(db));
        let provider = Arc::new(IpApiProvider::new(&config.geo_provider_url, config.geo_timeout)?);

        let cache: Arc<dyn GeoCache>;
        let limiter: Arc<dyn RateLimiter>;
        let mut local_limiter = None;
        let mut local_cache = None;
        match redis {
            Some(client) => {
                cache = Arc::new(RedisGeoCache::new(client.clone()));
                limiter = Arc::new(RedisRateLimiter::new(client));
            }
            None => {
                let local = Arc::new(LocalRateLimiter::new());
                let geo = Arc::new(LocalGeoCache::new());
                cache = geo.clone();
                limiter = local.clone();
                local_limiter = Some(local);
                local_cache = Some(geo);
            }
        }

        let mut state = Self::with_backends(
            config,
            Backends {
                blocklist: store.clone(),
                audit: store.clone(),
                flags: store,
                cache,
                limiter,
                provider,
            },
        );
        state.local_limiter = local_limiter;
        state.local_cache = local_cache;
        Ok(state)
    }

    pub fn with_backends(config: Config, backends: Backends) -> Self {
        let locator = GeoLocator::new(
            GeoResolver::new(backends.provider, config.geo_timeout),
            backends.cache.clone(),
            config.geo_cache_ttl,
            config.geo_negative_ttl,
        );

        let pipeline = IngressPipeline::new(
            backends.blocklist.clone(),
            backends.limiter,
            locator,
            backends.audit.clone(),
        )
        .with_rate_rule(RateRule::login(
            &config.login_path,
            config.login_rate_authenticated.clone(),
            config.login_rate_anonymous.clone(),
        ));

        let scanner = AnomalyScanner::new(
            backends.audit.clone(),
            backends.flags.clone(),
            config.scan_rules.clone(),
        );

        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            scanner: Arc::new(scanner),
            blocklist: backends.blocklist,
            audit: backends.audit,
            flags: backends.flags,
            cache: backends.cache,
            local_limiter: None,
            local_cache: None,
        }
    }
}

/// Build the full application router.
///
/// Public routes run behind the ingress middleware; `/health` and the admin
/// API are not tracked.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .merge(auth::router(&state.config.login_path))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), ingress::track_request));

    Router::new()
        .route("/health", get(health_check))
        .nest("/_admin/api", admin::router())
        .merge(public)
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_status = state.audit.ping().await.map(|_| "ok").unwrap_or("error");
    let cache_status = state.cache.ping().await.map(|_| "ok").unwrap_or("error");

    let status = if db_status == "ok" && cache_status == "ok" {
        "healthy"
    } else {
        "degraded"
    };

    Json(serde_json::json!({
        "status": status,
        "db": db_status,
        "cache": cache_status,
    }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::geo::testing::FakeProvider;
    use crate::store::memory::MemoryStore;
    use axum::body::Body;
    use http_body_util::BodyExt;

    pub struct TestApp {
        pub state: AppState,
        pub store: Arc<MemoryStore>,
        pub cache: Arc<LocalGeoCache>,
        pub provider: Arc<FakeProvider>,
    }

    impl TestApp {
        pub fn router(&self) -> Router {
            router(self.state.clone())
        }
    }

    pub fn config(vars: &[(&str, &str)]) -> Config {
        let mut all = vec![("DATABASE_URL", "postgres://localhost/ipwarden_test")];
        all.extend_from_slice(vars);
        Config::from_vars(|key| {
            all.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    pub fn app(admin_token: Option<&str>) -> TestApp {
        match admin_token {
            Some(token) => app_with_vars(&[("ADMIN_TOKEN", token)]),
            None => app_with_vars(&[]),
        }
    }

    pub fn app_with_vars(vars: &[(&str, &str)]) -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(LocalGeoCache::new());
        let provider = Arc::new(FakeProvider::answering("US", "Mountain View"));

        let state = AppState::with_backends(
            config(vars),
            Backends {
                blocklist: store.clone(),
                audit: store.clone(),
                flags: store.clone(),
                cache: cache.clone(),
                limiter: Arc::new(LocalRateLimiter::new()),
                provider: provider.clone(),
            },
        );

        TestApp {
            state,
            store,
            cache,
            provider,
        }
    }

    pub async fn body_string(body: Body) -> String {
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}
