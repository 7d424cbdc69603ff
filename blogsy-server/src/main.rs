use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{get, get_service, post, put},
    Router,
};
use blogsy_api::{AuthToken, Uuid};
use structopt::StructOpt;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

mod cache;
mod comments;
mod db;
mod error;
mod extractors;
mod handlers;
mod mailer;
mod media;
mod posts;
mod users;


use error::Error;
use extractors::{AppState, Settings};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(Debug, StructOpt)]
#[structopt(name = "blogsy-server", about = "Blogging platform backend")]
struct Opt {
    /// Postgres connection string
    #[structopt(long, env = "DATABASE_URL")]
    database_url: String,

    #[structopt(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    #[structopt(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:5000")]
    listen_addr: SocketAddr,

    /// Bearer token allowing access to the admin endpoints, which are disabled when unset
    #[structopt(long, env = "ADMIN_TOKEN")]
    admin_token: Option<Uuid>,

    /// Directory uploaded media files are written to
    #[structopt(long, env = "UPLOADS_DIR", default_value = "uploads")]
    uploads_dir: PathBuf,

    /// URL the frontend is reachable at, used in emailed links
    #[structopt(long, env = "PUBLIC_URL", default_value = "http://127.0.0.1:3000")]
    public_url: String,

    #[structopt(long, env = "BCRYPT_COST", default_value = "12")]
    bcrypt_cost: u32,

    /// Largest accepted uploaded file in bytes, 50 MiB when unset
    #[structopt(long, env = "MAX_FILE_SIZE")]
    max_file_size: Option<usize>,
}

pub async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(db_url)
        .await
        .with_context(|| format!("Error opening database {db_url:?}"))
}

pub fn app(state: AppState) -> Router {
    let uploads = get_service(ServeDir::new(&state.settings.uploads_dir)).handle_error(
        |err: std::io::Error| async move {
            tracing::error!(?err, "failed serving uploaded file");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed serving file")
        },
    );
    let upload_limit = state
        .settings
        .max_file_size
        .saturating_mul(media::MAX_FILES_PER_UPLOAD)
        .saturating_add(1024 * 1024);
    Router::new()
        .route("/", get(handlers::banner))
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/auth/me", get(handlers::me))
        .route("/api/auth/forgot-password", post(handlers::forgot_password))
        .route(
            "/api/auth/reset-password/:token",
            put(handlers::reset_password),
        )
        .route(
            "/api/posts",
            get(handlers::list_posts).post(handlers::create_post),
        )
        .route("/api/posts/search", get(handlers::search_posts))
        .route("/api/posts/drafts", get(handlers::drafts))
        .route(
            "/api/posts/:id",
            get(handlers::get_post)
                .put(handlers::update_post)
                .delete(handlers::delete_post),
        )
        .route("/api/posts/:id/like", put(handlers::like_post))
        .route("/api/posts/:id/publish", put(handlers::publish_post))
        .route("/api/users/me", get(handlers::me).put(handlers::update_me))
        .route("/api/users/profile/:username", get(handlers::profile))
        .route("/api/comments", post(handlers::add_comment))
        .route(
            "/api/comments/:id",
            get(handlers::list_comments).delete(handlers::delete_comment),
        )
        .route("/api/comments/:id/like", post(handlers::like_comment))
        .route("/api/comments/:id/dislike", post(handlers::dislike_comment))
        .route(
            "/api/media",
            post(handlers::upload_media).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/admin/create-user",
            post(handlers::admin_create_user),
        )
        .route(
            "/api/admin/reset-password",
            post(handlers::admin_reset_password),
        )
        .nest_service("/uploads", uploads)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let opt = Opt::from_args();

    let pool = create_sqlx_pool(&opt.database_url).await?;
    MIGRATOR
        .run(&pool)
        .await
        .context("running database migrations")?;
    let cache = cache::RedisCache::connect(&opt.redis_url).await?;
    tokio::fs::create_dir_all(&opt.uploads_dir)
        .await
        .with_context(|| format!("creating uploads directory {:?}", opt.uploads_dir))?;

    let state = AppState {
        store: Arc::new(db::PgStore::new(pool)),
        cache: Arc::new(cache),
        media: Arc::new(media::LocalMedia::new(opt.uploads_dir.clone())),
        mailer: Arc::new(mailer::LogMailer),
        admin_token: opt.admin_token.map(AuthToken),
        settings: Arc::new(Settings {
            bcrypt_cost: opt.bcrypt_cost,
            public_url: opt.public_url,
            uploads_dir: opt.uploads_dir,
            max_file_size: opt.max_file_size.unwrap_or(media::MAX_FILE_SIZE),
        }),
    };
    if state.admin_token.is_none() {
        tracing::info!("no admin token configured, admin endpoints are disabled");
    }

    tracing::info!("listening on {}", opt.listen_addr);
    axum::Server::bind(&opt.listen_addr)
        .serve(app(state).into_make_service())
        .await
        .context("serving axum webserver")
}
