use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use marketscout::{
    AppState, ConfigManager, DatabaseProvider, MarketScoutConfig, SessionManager, Strategy,
    ToolGateway,
    api::routes::build_app,
    cli::{
        Cli, Commands,
        init::{self, InitConfig, InitResult},
        output::Output,
    },
    utils::toml_config::{LogFormat, ServerConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Init { path, force } => match init::run(InitConfig { path, force }, &output) {
            InitResult::Success | InitResult::AlreadyExists => Ok(()),
            InitResult::Error(e) => anyhow::bail!("init failed: {}", e),
        },
        Commands::Run { prompt, strategy } => {
            run_once(&cli.config, cli.verbose, &prompt, strategy, &output).await
        }
        Commands::Serve => serve(&cli.config, cli.verbose, &output).await,
    }
}

/// Logs go to stderr so `run` can print events on stdout.
fn init_tracing(server: &ServerConfig, default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},libsql=warn,hyper=warn", default_level)));
    let registry = tracing_subscriber::registry().with(filter);

    match server.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn serve(config_path: &Path, verbose: bool, output: &Output) -> anyhow::Result<()> {
    if !config_path.exists() {
        output.error(&format!("{} not found", config_path.display()));
        output.hint("Run `marketscout-server init` to create one");
        anyhow::bail!("missing configuration file {}", config_path.display());
    }

    let mut config_manager = ConfigManager::new(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let config = config_manager.config();

    let level = if verbose { "debug" } else { config.server.log_level.as_str() };
    init_tracing(&config.server, level);

    for warning in config.validate_with_warnings()? {
        warn!("{}", warning);
    }
    if let Err(e) = config_manager.start_watching() {
        warn!(error = %e, "config hot reload disabled");
    }

    let repo = DatabaseProvider::from_config(&config.database)
        .create_repository()
        .await
        .context("failed to open session store")?;

    let gateway = Arc::new(ToolGateway::from_config(&config.tools));
    for (kind, backend) in gateway.registry().backends() {
        info!(provider = %kind, backend, "tool provider ready");
    }

    let config_manager = Arc::new(config_manager);
    let sessions = Arc::new(SessionManager::new(repo, gateway, config_manager.clone()));
    let sweeper = sessions.start_sweeper();

    let app = build_app(AppState {
        config_manager,
        sessions: sessions.clone(),
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("MarketScout listening on http://{}", addr);

    let stopping = sessions.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            // cancel runs and end event streams before connections drain
            stopping.shutdown();
        })
        .await?;

    let _ = sweeper.await;
    Ok(())
}

/// Run one session against an in-memory store and print its events.
async fn run_once(
    config_path: &Path,
    verbose: bool,
    prompt: &str,
    strategy: Strategy,
    output: &Output,
) -> anyhow::Result<()> {
    let config = if config_path.exists() {
        MarketScoutConfig::load(config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?
    } else {
        MarketScoutConfig::default()
    };
    init_tracing(&config.server, if verbose { "debug" } else { "warn" });

    let repo = DatabaseProvider::Memory.create_repository().await?;
    let gateway = Arc::new(ToolGateway::from_config(&config.tools));

    output.banner();
    output.kv("strategy", strategy.as_str());
    for (kind, backend) in gateway.registry().backends() {
        output.kv(kind.as_str(), backend);
    }

    let sessions = Arc::new(SessionManager::new(
        repo,
        gateway,
        Arc::new(ConfigManager::from_config(config)),
    ));

    let session = match sessions.create(prompt, strategy).await {
        Ok(session) => session,
        Err(e) => {
            output.error(&e.to_string());
            return Err(e.into());
        }
    };

    output.header("Events");
    output.newline();
    let mut events = sessions.subscribe(&session.id, 0).await?;
    let handle = sessions.run(&session.id).await?;

    let interrupt = {
        let sessions = sessions.clone();
        let id = session.id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = sessions.cancel(&id).await;
            }
        })
    };

    while let Some(event) = events.next().await {
        output.event(&event);
    }
    interrupt.abort();

    match handle.await? {
        Ok(report) => {
            output.memo(&report.markdown);
            output.complete(&format!("Memo ready with {} sources", report.sources.len()));
            Ok(())
        }
        Err(e) => {
            output.error(&e.to_string());
            Err(e.into())
        }
    }
}
