#[macro_use]
extern crate rocket;

pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod notify;
pub mod request_logger;
pub mod routes;

use crate::config::{DatabaseConfig, ImportConfig, NotifyConfig, UploadConfig};
use crate::db::PgSessionFactory;
use crate::import::{CsvImporter, ImportRegistry};
use crate::notify::Notifications;
use crate::request_logger::RequestLogger;
use env_logger::Env;
use rocket::data::{Limits, ToByteUnit};
use rocket::fairing::AdHoc;
use rocket::fs::FileServer;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::Once;

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

fn allowed_origins(origin: &str) -> AllowedOrigins {
    if origin.trim() == "*" {
        AllowedOrigins::all()
    } else {
        AllowedOrigins::some_exact(&[origin.trim()])
    }
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let database_config = DatabaseConfig::from_env();
    let import_config = ImportConfig::from_env();
    let upload_config = UploadConfig::from_env();
    let notifications = match Notifications::from_config(&NotifyConfig::from_env()) {
        Ok(notifications) => notifications,
        Err(e) => {
            log::error!("completion emails disabled: {}", e);
            Notifications::disabled()
        }
    };

    log::info!(
        "imports: {} bind parameters per statement, VARCHAR({}) columns, uploads in {}",
        import_config.max_bind_params,
        import_config.column_width,
        upload_config.upload_dir.display()
    );

    let limits = Limits::default()
        .limit("file", upload_config.max_bytes.bytes())
        .limit("data-form", upload_config.max_bytes.bytes());
    let figment = rocket::Config::figment().merge(("limits", limits));

    // Configure CORS
    let cors = CorsOptions::default()
        .allowed_origins(allowed_origins(&upload_config.cors_allowed_origin))
        .allowed_methods(
            vec![Method::Get, Method::Post]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    let static_dir = upload_config.static_dir.clone();

    let mut rocket = rocket::custom(figment)
        .attach(RequestLogger)
        .attach(cors)
        // Connect, migrate, then hand the pool to the importer
        .attach(AdHoc::try_on_ignite(
            "Database Pool and Migrations",
            move |rocket| async move {
                let pool = match db::connect(&database_config).await {
                    Ok(pool) => pool,
                    Err(e) => {
                        log::error!("failed to connect to database: {}", e);
                        return Err(rocket);
                    }
                };

                match db::run_migrations(&pool).await {
                    Ok(()) => log::info!("database migrations successful"),
                    Err(e) => {
                        log::error!("database migrations failed: {}", e);
                        return Err(rocket);
                    }
                }

                let importer =
                    CsvImporter::new(PgSessionFactory::from_pool(pool.clone()), import_config);
                Ok(rocket.manage(pool).manage(importer))
            },
        ))
        // Running imports stop at their next row once shutdown begins
        .attach(AdHoc::on_shutdown("Cancel Running Imports", |rocket| {
            Box::pin(async move {
                if let Some(registry) = rocket.state::<ImportRegistry>() {
                    log::info!("shutdown requested, cancelling running imports");
                    registry.shutdown();
                }
            })
        }))
        .manage(ImportRegistry::new())
        .manage(upload_config)
        .manage(notifications)
        .mount("/", routes![routes::uploads::upload])
        .mount(
            "/api/v1",
            openapi_get_routes![
                // Health routes
                routes::health::health_check,
                // Upload history routes
                routes::history::list_uploads,
                // Import routes
                routes::imports::list_imports,
                routes::imports::cancel_import,
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
                    spec_urls: vec![UrlObject::new("CSV Import API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        );

    if static_dir.is_dir() {
        log::info!("serving static files from {}", static_dir.display());
        rocket = rocket.mount("/", FileServer::from(static_dir));
    }

    rocket
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::config::{ImportConfig, UploadConfig};
    use crate::db::PgSessionFactory;
    use crate::import::{CsvImporter, ImportRegistry};
    use crate::notify::Notifications;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use sqlx::PgPool;
    use std::path::PathBuf;

    pub use database::{TestDatabase, TestDatabaseError};

    /// Read-side helpers for asserting on imported tables.
    pub struct TestFixtures<'a> {
        pool: &'a PgPool,
    }

    impl<'a> TestFixtures<'a> {
        /// Create a fixture helper bound to the provided pool.
        pub fn new(pool: &'a PgPool) -> Self {
            Self { pool }
        }

        /// Number of rows in `table`.
        pub async fn row_count(&self, table: &str) -> Result<i64, sqlx::Error> {
            let sql = format!(
                "SELECT COUNT(*) FROM {}",
                crate::import::database_operations::quote_identifier(table)
            );
            sqlx::query_scalar(&sql).fetch_one(self.pool).await
        }

        /// Column names of `table` in ordinal order.
        pub async fn column_names(&self, table: &str) -> Result<Vec<String>, sqlx::Error> {
            sqlx::query_scalar(
                "SELECT column_name::text FROM information_schema.columns WHERE table_schema = current_schema() AND table_name = $1 ORDER BY ordinal_position",
            )
            .bind(table)
            .fetch_all(self.pool)
            .await
        }

        /// Number of provenance records written for `table`.
        pub async fn upload_records(&self, table: &str) -> Result<i64, sqlx::Error> {
            sqlx::query_scalar("SELECT COUNT(*) FROM upload_history WHERE table_name = $1")
                .bind(table)
                .fetch_one(self.pool)
                .await
        }
    }

    pub mod database {
        use log::LevelFilter;
        use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use sqlx::{ConnectOptions, PgPool};
        use testcontainers::{GenericImage, ImageExt, core::WaitFor};
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        impl TestDatabaseError {
            /// Whether the failure means no container runtime is available.
            pub fn is_unavailable(&self) -> bool {
                matches!(self, TestDatabaseError::Container(_))
            }
        }

        /// Ephemeral database factory for integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            /// Provision a fresh, migrated database in a disposable Postgres container.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let image = GenericImage::new("postgres", "16-alpine")
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

                let base_options = PgConnectOptions::new()
                    .host(&host)
                    .port(port)
                    .username("postgres")
                    .password("postgres")
                    .log_statements(LevelFilter::Off);

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;

                let new_db_name = format!("csv_import_{}", Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql).execute(&admin_pool).await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.database(&new_db_name))
                    .await?;

                crate::db::run_migrations(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container: Some(container),
                })
            }

            /// Cloneable connection pool for use in tests and Rocket state.
            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            /// Convenience method returning a clone of the pooled connection handle.
            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await?;

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
                            let _ = drop_database_with_fallback(admin_options, &db_name).await;
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        pg_pool: Option<PgPool>,
        import_config: Option<ImportConfig>,
        upload_dir: Option<PathBuf>,
        notifications: Option<Notifications>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                ..Default::default()
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Mount routes at the root, where the upload form posts.
        pub fn mount_root_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/".to_string(), routes));
            self
        }

        /// Manage a `PgPool` instance for tests that exercise database-backed routes.
        pub fn manage_pg_pool(mut self, pool: PgPool) -> Self {
            self.pg_pool = Some(pool);
            self
        }

        /// Replace the default (disabled) completion notifications.
        pub fn manage_notifications(mut self, notifications: Notifications) -> Self {
            self.notifications = Some(notifications);
            self
        }

        /// Manage an importer, registry and upload settings backed by the managed pool.
        pub fn manage_importer(mut self, config: ImportConfig, upload_dir: PathBuf) -> Self {
            self.import_config = Some(config);
            self.upload_dir = Some(upload_dir);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment)
                .manage(ImportRegistry::new())
                .manage(self.notifications.unwrap_or_default());

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let (Some(pool), Some(config)) = (&self.pg_pool, self.import_config) {
                let importer = CsvImporter::new(PgSessionFactory::from_pool(pool.clone()), config);
                rocket = rocket.manage(importer);
            }

            if let Some(upload_dir) = self.upload_dir {
                rocket = rocket.manage(UploadConfig {
                    upload_dir,
                    ..UploadConfig::default()
                });
            }

            if let Some(pool) = self.pg_pool {
                rocket = rocket.manage(pool);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
