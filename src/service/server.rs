//! Service instance lifecycle and routing
//!
//! `Starting → ProbeEmpty → {SeedingFromFile | SkipSeed} → Serving →
//! Draining → BackupToFile → Stopped`

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::handlers;
use super::state::AppState;
use crate::cli::GridConfig;
use crate::shutdown::{self, Shutdown};
use crate::storage::{self, CityStore};

/// Build the instance router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/cities", post(handlers::create_city))
        .route("/cities/", post(handlers::create_city))
        .route(
            "/cities/:id",
            get(handlers::get_city)
                .put(handlers::update_population)
                .delete(handlers::delete_city),
        )
        .route("/info/region", post(handlers::list_by_region))
        .route("/info/district", post(handlers::list_by_district))
        .route("/info/population", post(handlers::list_by_population))
        .route("/info/foundation", post(handlers::list_by_foundation))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the store and seed it from the backup file when it looks empty.
///
/// Store errors are fatal; seed errors are logged and startup continues
/// with whatever rows were inserted.
pub async fn prepare_store(config: &GridConfig) -> Result<CityStore> {
    let store = CityStore::open(&config.store.path, config.store.busy_timeout())
        .context("Cannot open the city store")?;

    let empty = store
        .is_empty()
        .await
        .context("Cannot probe the city store")?;

    if empty {
        info!(
            "Store is probably empty, reading data from {:?}",
            config.backup.path
        );
        match storage::seed_from_file(&store, &config.backup.path).await {
            Ok(report) => info!(
                "Seeded {} cities from {:?}",
                report.inserted, config.backup.path
            ),
            Err(e) => {
                warn!("Seeding failed: {}", e);
                warn!("Starting with a partially seeded or empty store");
            }
        }
    }

    Ok(store)
}

/// A service instance that is accepting requests
pub struct RunningInstance {
    local_addr: SocketAddr,
    store: CityStore,
    shutdown: Shutdown,
    server: JoinHandle<()>,
    config: GridConfig,
}

impl RunningInstance {
    /// Prepare the store, bind the listen address and start serving
    pub async fn start(config: GridConfig) -> Result<Self> {
        let store = prepare_store(&config).await?;

        let addr = config.server.listen_addr();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context(format!("Failed to bind {}", addr))?;
        let local_addr = listener.local_addr()?;

        let app = router(Arc::new(AppState::new(store.clone())));
        let shutdown = Shutdown::new();
        let signal = shutdown.wait();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
            {
                error!("Instance server error: {}", e);
            }
        });

        info!("Store connected, waiting for requests on {}", local_addr);

        Ok(Self {
            local_addr,
            store,
            shutdown,
            server,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Drain in-flight requests, then dump the store if this instance owns the backup
    pub async fn stop(self) -> Result<()> {
        let RunningInstance {
            store,
            shutdown,
            mut server,
            config,
            ..
        } = self;

        shutdown.trigger();
        let drained = shutdown::drain(
            async {
                let _ = (&mut server).await;
            },
            config.server.grace_period(),
            "Instance",
        )
        .await;
        if !drained {
            server.abort();
        }

        if config.backup.enabled {
            storage::write_backup(&store, &config.backup.path)
                .await
                .context("Backup on shutdown failed")?;
        } else {
            info!("Backup disabled for this instance, skipping");
        }

        info!("Instance stopped");
        Ok(())
    }
}

/// Run one instance until a shutdown signal arrives
pub async fn run_instance(config: GridConfig, supervised: bool) -> Result<()> {
    let instance = RunningInstance::start(config).await?;

    if supervised {
        tokio::select! {
            _ = shutdown::signal() => {}
            _ = shutdown::stdin_closed() => {}
        }
    } else {
        shutdown::signal().await;
    }

    info!("Stopping instance on {}", instance.local_addr());
    instance.stop().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::path::Path;

    fn test_config(dir: &Path) -> GridConfig {
        let mut config = GridConfig::default();
        config.server.port = 0;
        config.store.path = dir.join("cities.db");
        config.backup.path = dir.join("cities.csv");
        config
    }

    fn tula_json(id: i64) -> String {
        format!(
            r#"{{"id":{},"name":"Tula","region":"Tula","district":"Central","population":475000,"foundation":1146}}"#,
            id
        )
    }

    async fn post(base: &str, path: &str, body: &str) -> (StatusCode, String) {
        let resp = reqwest::Client::new()
            .post(format!("{}{}", base, path))
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        (resp.status(), resp.text().await.unwrap())
    }

    async fn get(base: &str, path: &str) -> (StatusCode, String) {
        let resp = reqwest::get(format!("{}{}", base, path)).await.unwrap();
        (resp.status(), resp.text().await.unwrap())
    }

    async fn start(dir: &Path) -> (RunningInstance, String) {
        let instance = RunningInstance::start(test_config(dir)).await.unwrap();
        let base = format!("http://{}", instance.local_addr());
        (instance, base)
    }

    #[tokio::test]
    async fn test_create_then_get_returns_supplied_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, base) = start(dir.path()).await;

        let (status, body) = post(&base, "/cities", &tula_json(71)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, "City Tula added\n");

        let (status, body) = get(&base, "/cities/71").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Tula Tula Central 475000 1146");

        instance.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_rejects_bad_and_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, base) = start(dir.path()).await;

        let (status, body) = get(&base, "/cities/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "ID must be of int type");

        let (status, body) = get(&base, "/cities/404").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "no city with such ID was found");

        instance.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_rejects_bad_body_and_duplicate_id() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, base) = start(dir.path()).await;

        let (status, _) = post(&base, "/cities", r#"{"id":1,"name":"Tula"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post(&base, "/cities", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        post(&base, "/cities", &tula_json(1)).await;
        let (status, body) = post(&base, "/cities", &tula_json(1)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("already exists"));

        instance.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_negative_population_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, base) = start(dir.path()).await;

        let body = r#"{"id":5,"name":"Ghost","region":"Nowhere","district":"None","population":-20,"foundation":-300}"#;
        let (status, _) = post(&base, "/cities", body).await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, body) = get(&base, "/cities/5").await;
        assert_eq!(body, "Ghost Nowhere None -20 -300");

        instance.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_id_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, base) = start(dir.path()).await;
        let client = reqwest::Client::new();

        let resp = client
            .delete(format!("{}/cities/12345", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "Deleted city with ID 12345");

        let resp = client
            .delete(format!("{}/cities/twelve", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        instance.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, base) = start(dir.path()).await;
        post(&base, "/cities", &tula_json(9)).await;

        let resp = reqwest::Client::new()
            .delete(format!("{}/cities/9", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let (status, _) = get(&base, "/cities/9").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        instance.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_population() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, base) = start(dir.path()).await;
        post(&base, "/cities", &tula_json(3)).await;
        let client = reqwest::Client::new();

        let resp = client
            .put(format!("{}/cities/3", base))
            .body(r#"{"value":480000}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.text().await.unwrap(), "New population set\n");

        let (_, body) = get(&base, "/cities/3").await;
        assert_eq!(body, "Tula Tula Central 480000 1146");

        let resp = client
            .put(format!("{}/cities/3", base))
            .body(r#"{"value":"many"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        instance.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_by_region_and_district() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, base) = start(dir.path()).await;
        post(&base, "/cities", &tula_json(1)).await;
        post(&base, "/cities", &tula_json(2)).await;

        let (status, body) = post(&base, "/info/region", r#"{"request":"Tula"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            "1 Tula Tula Central 475000 1146\n2 Tula Tula Central 475000 1146\n"
        );

        let (status, body) = post(&base, "/info/district", r#"{"request":"North"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "No cities were found in district North");

        let (status, _) = post(&base, "/info/region", "{").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        instance.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_population_range_rules() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, base) = start(dir.path()).await;
        for (id, population) in [(1, 0), (2, 50), (3, 150), (4, -5)] {
            let body = format!(
                r#"{{"id":{},"name":"C{}","region":"R","district":"D","population":{},"foundation":1900}}"#,
                id, id, population
            );
            post(&base, "/cities", &body).await;
        }

        // Both bounds omitted: effectively unbounded above, population >= 0
        let (status, body) = post(&base, "/info/population", "{}").await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body.lines().map(|l| l.split(' ').next().unwrap()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        // max=0 is read as "no upper bound", never as "population <= 0"
        let (status, body) =
            post(&base, "/info/population", r#"{"min_value":0,"max_value":0}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.lines().count(), 3);

        let (status, body) =
            post(&base, "/info/population", r#"{"min_value":100,"max_value":50}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("population range"));

        let (status, body) =
            post(&base, "/info/population", r#"{"min_value":100,"max_value":0}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "3 C3 R D 150 1900\n");

        let (status, body) =
            post(&base, "/info/population", r#"{"min_value":1000,"max_value":2000}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            "No cities were found with population range from 1000 to 2000"
        );

        instance.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_foundation_range_rules() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, base) = start(dir.path()).await;
        post(&base, "/cities", &tula_json(1)).await;

        let (status, body) =
            post(&base, "/info/foundation", r#"{"min_value":1100,"max_value":1200}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "1 Tula Tula Central 475000 1146\n");

        let (status, body) = post(&base, "/info/foundation", r#"{"min_value":1500}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "No cities were found with foundation starting from 1500");

        let (status, body) =
            post(&base, "/info/foundation", r#"{"min_value":1500,"max_value":1200}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("foundation range"));

        instance.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_seeds_empty_store_and_shutdown_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cities.csv"),
            "1,Moscow,Moscow,Central,12655050,1147\n2,Kazan,Tatarstan,Volga,1257000,1005\n",
        )
        .unwrap();

        let (instance, base) = start(dir.path()).await;
        let (_, body) = get(&base, "/cities/2").await;
        assert_eq!(body, "Kazan Tatarstan Volga 1257000 1005");

        post(&base, "/cities", &tula_json(3)).await;
        instance.stop().await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("cities.csv")).unwrap();
        assert_eq!(
            written,
            "1,Moscow,Moscow,Central,12655050,1147\n\
             2,Kazan,Tatarstan,Volga,1257000,1005\n\
             3,Tula,Tula,Central,475000,1146\n"
        );
    }

    #[tokio::test]
    async fn test_startup_survives_missing_or_bad_seed_file() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, base) = start(dir.path()).await;
        let (status, _) = get(&base, "/health").await;
        assert_eq!(status, StatusCode::OK);
        instance.stop().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cities.csv"),
            "1,Moscow,Moscow,Central,12655050,1147\nbroken row\n",
        )
        .unwrap();
        let (instance, base) = start(dir.path()).await;
        let (status, _) = get(&base, "/cities/1").await;
        assert_eq!(status, StatusCode::OK);
        instance.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_owner_does_not_write_backup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.backup.enabled = false;

        let instance = RunningInstance::start(config).await.unwrap();
        instance.stop().await.unwrap();
        assert!(!dir.path().join("cities.csv").exists());
    }

    #[tokio::test]
    async fn test_store_failure_maps_to_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let (instance, base) = start(dir.path()).await;

        let conn = rusqlite::Connection::open(dir.path().join("cities.db")).unwrap();
        conn.execute("DROP TABLE citydata", []).unwrap();
        drop(conn);

        let (status, _) = get(&base, "/cities/1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        // Backup cannot snapshot a missing table
        assert!(instance.stop().await.is_err());
    }

    #[tokio::test]
    async fn test_unopenable_store_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.store.path = dir.path().join("missing").join("cities.db");
        assert!(RunningInstance::start(config).await.is_err());
    }
}
