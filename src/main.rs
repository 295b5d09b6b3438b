//! Callcore - real-time outbound voice agent core.

use callcore::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO so call lifecycle transitions are visible; RUST_LOG
    // overrides as usual.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    cli::run().await
}
