use clap::Parser;
use order_book_engine::utils::shutdown_token;
use order_book_engine::{api, config::Config, state::AppState};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "order-book-engine")]
#[command(version = "0.1", about = "A single-symbol limit order book service")]
struct Cli {
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "startup recovery failed, refusing to serve traffic");
            std::process::exit(1);
        }
    };

    let token = shutdown_token();
    let app = api::router(state);
    let ep = format!("0.0.0.0:{}", cli.port);
    let listener = tokio::net::TcpListener::bind(&ep).await?;

    tracing::info!(endpoint = %ep, "HTTP/WS server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(token.cancelled_owned())
        .await?;
    Ok(())
}
