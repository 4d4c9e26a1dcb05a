use clap::Parser;
use pr_reviewer_lib::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let config = Config::parse();

    let filter = if config.verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "pr_reviewer=debug,pr_reviewer_lib=debug,tower_http=debug".into())
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "pr_reviewer=info,pr_reviewer_lib=info,tower_http=info".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    log::info!(
        "Starting pr-reviewer on {} (database {})",
        config.socket_addr(),
        config.database_path.display()
    );

    match pr_reviewer_lib::run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
