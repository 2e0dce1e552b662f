//! Init command implementation
//!
//! Scaffolds a MarketScout project: `marketscout.toml`, `.env.example`,
//! `.gitignore` and the `data/` directory.

use super::output::Output;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the generated configuration file
pub const CONFIG_FILE: &str = "marketscout.toml";

/// Result of the init operation
#[derive(Debug, PartialEq, Eq)]
pub enum InitResult {
    /// Initialization completed successfully
    Success,
    /// Project already exists (marketscout.toml found)
    AlreadyExists,
    /// An error occurred during initialization
    Error(String),
}

/// Configuration for the init command
pub struct InitConfig {
    /// Directory to initialize
    pub path: PathBuf,
    /// Overwrite existing files
    pub force: bool,
}

/// Run the init command
pub fn run(config: InitConfig, output: &Output) -> InitResult {
    output.banner();
    output.header("Initializing MarketScout Project");

    let base_path = &config.path;
    let config_path = base_path.join(CONFIG_FILE);
    if config_path.exists() && !config.force {
        output.warning(&format!("{} already exists!", CONFIG_FILE));
        output.hint("Use --force to overwrite existing files");
        return InitResult::AlreadyExists;
    }

    let data_dir = base_path.join("data");
    if data_dir.exists() {
        output.skipped("data", "already exists");
    } else if let Err(e) = fs::create_dir_all(&data_dir) {
        output.error(&format!("Failed to create data: {}", e));
        return InitResult::Error(e.to_string());
    } else {
        output.created_dir("data");
    }

    let files = [
        ("config", CONFIG_FILE, default_config_toml()),
        ("env", ".env.example", generate_env_example()),
    ];
    for (kind, name, content) in files {
        if let Err(e) = write_file(&base_path.join(name), content, config.force) {
            output.error(&format!("Failed to create {}: {}", name, e));
            return InitResult::Error(e.to_string());
        }
        output.created(kind, name);
    }

    let gitignore_path = base_path.join(".gitignore");
    if !gitignore_path.exists() {
        match write_file(&gitignore_path, generate_gitignore(), false) {
            Ok(()) => output.created("file", ".gitignore"),
            Err(e) => output.warning(&format!("Failed to create .gitignore: {}", e)),
        }
    }

    output.complete("MarketScout project initialized successfully!");

    output.header("Next Steps");
    output.newline();
    output.info("1. Optionally add provider API keys (mock data is used without them):");
    output.command("cp .env.example .env");
    output.newline();
    output.info("2. Try a one-shot run:");
    output.command("marketscout-server run --prompt \"Generate a market report about Competitor X\"");
    output.newline();
    output.info("3. Start the server:");
    output.command("marketscout-server serve");

    InitResult::Success
}

fn write_file(path: &Path, content: &str, force: bool) -> std::io::Result<()> {
    if path.exists() && !force {
        return Ok(());
    }
    fs::write(path, content)
}

/// The default configuration, every key at its default value.
pub fn default_config_toml() -> &'static str {
    r#"# MarketScout configuration

[server]
host = "127.0.0.1"
port = 8000
log_level = "info"     # RUST_LOG overrides this
log_format = "pretty"  # or "json"
cors_origins = ["http://localhost:3000", "http://localhost:3001"]

[database]
# Local SQLite file, or ":memory:"
url = "./data/marketscout.db"
# Remote Turso (requires the `turso` feature)
# turso_url_env = "TURSO_DATABASE_URL"
# turso_token_env = "TURSO_AUTH_TOKEN"

[tools.search]
backend = "auto"  # auto | mock | live
api_key_env = "TAVILY_API_KEY"
timeout_ms = 12000

[tools.finance]
backend = "auto"
api_key_env = "ALPHAVANTAGE_API_KEY"
timeout_ms = 12000

[tools.cache]
ttl_secs = 300
max_entries = 1024

[tools.retry]
max_attempts = 3
base_delay_ms = 250
max_delay_ms = 4000
jitter = 0.1

[planner]
default_symbol = "MSFT"

[manager]
redispatch = true

[manager.sufficiency]
min_news_results = 2
require_price = true
# Mock-backed findings are always flagged low-confidence, and a follow-up
# against a mock backend returns the same data. Enable this only when both
# providers are live, otherwise every hierarchical run re-dispatches.
reject_low_confidence = false

[sessions]
retention_secs = 3600
sweep_interval_secs = 60
event_buffer = 256
"#
}

fn generate_env_example() -> &'static str {
    r#"# MarketScout environment
# Providers fall back to deterministic mock data when a key is missing.
TAVILY_API_KEY=
ALPHAVANTAGE_API_KEY=

# Logging (overrides server.log_level)
# RUST_LOG=marketscout=debug,tower_http=info
"#
}

fn generate_gitignore() -> &'static str {
    r#"# MarketScout Generated Files
/data/
*.db
*.db-journal

# Environment
.env
.env.local

# Rust
/target/
"#
}
