#[macro_use]
extern crate rocket;

pub mod alerts;
pub mod auth;
pub mod classifier;
pub mod config;
pub mod db;
pub mod email_log;
pub mod error;
pub mod imports;
pub mod models;
pub mod notifications;
pub mod outbound;
pub mod position_search;
pub mod request_logger;
pub mod routes;
pub mod scheduler;
pub mod semaphore;
pub mod store;
pub mod week;

use crate::classifier::PersonaClassifier;
use crate::config::AppConfig;
use crate::db::FocusDb;
use crate::outbound::http::{HttpActorClient, HttpCalendarClient};
use crate::outbound::llm::HttpLlmClient;
use crate::outbound::mailer::HttpMailer;
use crate::outbound::Collaborators;
use crate::request_logger::RequestLogger;
use crate::scheduler::SchedulerContext;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let app_config = AppConfig::from_env().expect("configuration incomplete");
    std::fs::create_dir_all(&app_config.upload_dir).expect("upload directory");

    let collaborators = Collaborators {
        actor: Arc::new(HttpActorClient::new(app_config.apify_token.clone())),
        llm: Arc::new(HttpLlmClient::new(app_config.llm_key.clone())),
        mailer: Arc::new(HttpMailer::new(
            app_config.mailer_endpoint.clone(),
            app_config.sender_identity.clone(),
        )),
        calendar: Arc::new(HttpCalendarClient::new(
            app_config.calendar_api_url.clone(),
            app_config.calendar_token.clone(),
        )),
    };

    // Configure CORS
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
            ]
            .into_iter()
            .map(From::from)
            .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    rocket::build()
        .attach(RequestLogger)
        .attach(FocusDb::init())
        .attach(cors)
        .manage(app_config)
        .manage(collaborators)
        // Run store migrations (index bootstrap) on startup
        .attach(AdHoc::try_on_ignite("Run Migrations", |rocket| async move {
            match FocusDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    match store::run_migrations(&pool).await {
                        Ok(_) => {
                            log::info!("database migrations successful");
                            Ok(rocket)
                        }
                        Err(e) => {
                            log::error!("database migrations failed: {}", e);
                            Err(rocket)
                        }
                    }
                }
                None => {
                    log::error!("database pool not available for migrations");
                    Err(rocket)
                }
            }
        }))
        // Clone the pool into state for background jobs and the classifier
        .attach(AdHoc::try_on_ignite(
            "Manage DB Pool and Classifier",
            |rocket| async move {
                match FocusDb::fetch(&rocket) {
                    Some(db) => {
                        let pool = (**db).clone();
                        let classifier = PersonaClassifier::new(pool.clone());
                        Ok(rocket.manage(pool).manage(classifier))
                    }
                    None => Err(rocket),
                }
            },
        ))
        // Spawn the periodic scheduler in the background
        .attach(AdHoc::on_liftoff("Spawn Scheduler", |rocket| {
            Box::pin(async move {
                let pool = rocket.state::<rocket_db_pools::sqlx::PgPool>();
                let classifier = rocket.state::<PersonaClassifier>();
                let collaborators = rocket.state::<Collaborators>();

                match (pool, classifier, collaborators) {
                    (Some(pool), Some(classifier), Some(collaborators)) => {
                        scheduler::spawn(SchedulerContext {
                            pool: pool.clone(),
                            classifier: classifier.clone(),
                            collaborators: collaborators.clone(),
                        });
                    }
                    _ => {
                        log::error!("failed to spawn scheduler: missing state");
                    }
                }
            })
        }))
        .mount(
            "/api/v1",
            openapi_get_routes![
                // Health
                routes::health::live_health,
                routes::health::ready_health,
                // LinkedIn import lifecycle
                routes::imports::preview,
                routes::imports::start,
                routes::imports::progress,
                routes::imports::list_jobs,
                routes::imports::cancel,
                routes::imports::weekly_status,
                routes::imports::conflicts,
                routes::imports::invalid_rows,
                routes::imports::parse_failures,
                // Keyword dictionary & classification
                routes::keywords::list_keywords,
                routes::keywords::create_keyword,
                routes::keywords::create_keywords_bulk,
                routes::keywords::delete_keyword,
                routes::keywords::list_priorities,
                routes::keywords::set_priorities,
                routes::keywords::classify,
                routes::keywords::reclassify,
                // Scheduler
                routes::schedules::list_schedules,
                routes::schedules::create_schedule,
                routes::schedules::update_schedule,
                routes::schedules::delete_schedule,
                routes::schedules::run_now,
                // Semaphore
                routes::semaphore::semaphore_status,
                // Notifications & alerts
                routes::notifications::list_notifications,
                routes::notifications::mark_notification_read,
                routes::notifications::list_alerts,
                routes::notifications::resolve_alert,
                // Position search
                routes::position_search::run_search,
                routes::position_search::status,
                routes::position_search::sync_keywords,
                // Contacts & companies
                routes::contacts::get_contact,
                routes::contacts::list_contacts,
                routes::contacts::list_companies,
            ],
        )
        // Multipart upload and raw CSV downloads carry no OpenAPI schema
        .mount(
            "/api/v1",
            routes![
                routes::imports::upload_csv,
                routes::imports::conflicts_csv,
                routes::imports::invalid_rows_csv,
                routes::imports::parse_failures_csv,
            ],
        )
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Focus API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::PgPool;

    pub use database::{TestDatabase, TestDatabaseError};

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{GenericImage, ImageExt, core::WaitFor};
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("TEST_DATABASE_URL not set")]
            MissingUrl,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database factory for integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            /// Provision a fresh database in a disposable Postgres container.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                Self::new().await
            }

            pub async fn new() -> Result<Self, TestDatabaseError> {
                let image = GenericImage::new("postgres", "16-alpine")
                    .with_wait_for(WaitFor::message_on_stdout(
                        "database system is ready to accept connections",
                    ))
                    .with_wait_for(WaitFor::message_on_stderr(
                        "database system is ready to accept connections",
                    ));

                let request = image
                    .with_env_var("POSTGRES_DB", "postgres")
                    .with_env_var("POSTGRES_USER", "postgres")
                    .with_env_var("POSTGRES_PASSWORD", "postgres");

                let container = request.start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                let base_options: PgConnectOptions =
                    admin_url.parse().map_err(TestDatabaseError::Sqlx)?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql)
                    .execute(&admin_pool)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container: Some(container),
                })
            }

            /// Pool reference for use in tests and Rocket state.
            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            /// Clone of the pooled connection handle.
            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Re-run migrations (idempotent).
            pub async fn reset(&self) -> Result<(), TestDatabaseError> {
                MIGRATOR.run(self.pool()).await?;
                Ok(())
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ =
                                drop_database_with_fallback(admin_options.clone(), &db_name).await;
                        });
                    } else {
                        std::thread::spawn(move || {
                            if let Ok(rt) = tokio::runtime::Runtime::new() {
                                rt.block_on(async move {
                                    pool.close().await;
                                    let _ = drop_database_with_fallback(
                                        admin_options.clone(),
                                        &db_name,
                                    )
                                    .await;
                                });
                            }
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for Rocket instances tailored to integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        pg_pool: Option<PgPool>,
        config: Option<crate::config::AppConfig>,
    }

    impl TestRocketBuilder {
        /// Random port, logging off, a throwaway secret key.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                pg_pool: None,
                config: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Manage a `PgPool` for database-backed routes.
        pub fn manage_pg_pool(mut self, pool: PgPool) -> Self {
            self.pg_pool = Some(pool);
            self
        }

        /// Manage an explicit app config (defaults to a test config).
        pub fn manage_config(mut self, config: crate::config::AppConfig) -> Self {
            self.config = Some(config);
            self
        }

        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(pool) = self.pg_pool {
                let classifier = crate::classifier::PersonaClassifier::new(pool.clone());
                rocket = rocket.manage(pool).manage(classifier);
            }

            let config = self.config.unwrap_or_else(test_config);
            rocket.manage(config)
        }

        /// Blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }

    /// App config with throwaway values for tests.
    pub fn test_config() -> crate::config::AppConfig {
        crate::config::AppConfig {
            secret_key: "test-secret".to_string(),
            apify_token: String::new(),
            hubspot_token: String::new(),
            llm_key: String::new(),
            sender_identity: "test@localhost".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            upload_dir: std::env::temp_dir().join("focus-test-uploads"),
            mailer_endpoint: "http://localhost:8025/send".to_string(),
            calendar_api_url: "http://localhost:8026".to_string(),
            calendar_token: String::new(),
        }
    }

    /// Mint a bearer token the auth guard accepts for `test_config`.
    pub fn test_token(subject: &str) -> String {
        use jsonwebtoken::{EncodingKey, Header, encode};
        use serde::Serialize;

        #[derive(Serialize)]
        struct Claims {
            sub: String,
            exp: usize,
        }

        encode(
            &Header::default(),
            &Claims {
                sub: subject.to_string(),
                exp: (chrono::Utc::now().timestamp() + 3600) as usize,
            },
            &EncodingKey::from_secret(b"test-secret"),
        )
        .expect("token encodes")
    }
}
