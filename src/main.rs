use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wacheck::app;
use wacheck::bridge::BridgeClient;
use wacheck::config::{Config, Settings};
use wacheck_core::client::DemoClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging(cli.debug);

    // Load settings: file, then environment, then flags
    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.merge_env();
    settings.merge_cli(&cli);
    settings.validate();

    let code = if cli.is_demo_mode() {
        tracing::info!("Demo mode: serving from a scripted session");
        app::run(settings, DemoClient::showcase()).await
    } else {
        let client = BridgeClient::new(&settings.session);
        app::run(settings, client).await
    };

    std::process::exit(code)
}

fn setup_logging(debug: bool) {
    let default_filter = if debug {
        "wacheck=debug,wacheck_core=debug"
    } else {
        "wacheck=info,wacheck_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
