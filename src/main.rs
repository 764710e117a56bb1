/// OCSP responder daemon
///
/// Answers RFC 6960 status queries for certificates issued by one CA and
/// provides the operator commands to revoke and register certificates.

use clap::Parser;
use ocsp_responder::{
    cli::{Cli, Commands},
    config::LogFormat,
};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // Flags read their defaults from the environment, so load .env first
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(cli.log_format);

    if matches!(cli.command, Commands::Start(_)) {
        print_banner();
    }

    if let Err(e) = ocsp_responder::cli::run(cli).await {
        error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ocsp_responder=info,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

fn print_banner() {
    println!(
        r#"
   ____  ___________ ____
  / __ \/ ____/ ___// __ \
 / / / / /    \__ \/ /_/ /
/ /_/ / /___ ___/ / ____/
\____/\____//____/_/

        OCSP Responder v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
