use tracing_subscriber::EnvFilter;
use utoipa_swagger_ui::SwaggerUi;

use atlas_crm::{db, docs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let pool = db::init().await?;
    let app = atlas_crm::create_app(pool).await?;

    let app = app.merge(
        SwaggerUi::new("/docs").url("/api-docs/openapi.json", docs::build_openapi()),
    );

    let port = std::env::var("APP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "listening");

    axum::serve(listener, app).await?;

    Ok(())
}

fn load_env() {
    // When run from a container the CWD may differ; fall back to the
    // crate-local .env.
    if dotenvy::dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
