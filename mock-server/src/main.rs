use mock_server::{AppState, DEFAULT_API_ID, DEFAULT_API_SECRET};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let api_id = std::env::var("API_ID").unwrap_or_else(|_| DEFAULT_API_ID.to_string());
    let api_secret = std::env::var("API_SECRET").unwrap_or_else(|_| DEFAULT_API_SECRET.to_string());

    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, api_id, "mock service listening");
    mock_server::run(listener, AppState::new(&api_id, &api_secret)).await
}
