//! CLI module for the guadzefie command-line interface.
//!
//! Subcommands drive a [`SessionBridge`] over the configured storage file:
//! - `status` - Show who is signed in and where the session came from
//! - `sign-in` / `sign-up` / `sign-out` - Account actions
//! - `reset-password` - Request a password recovery email
//! - `refresh` - Refresh the primary session
//! - `watch` - Keep the bridge running until interrupted
//! - `config check` - Validate configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::auth::{AuthProvider, AuthStateChange, GoTrueClient, NoopProvider};
use crate::bridge::{AuthView, BridgeSettings, SessionBridge};
use crate::config::Config;
use crate::notifications::{ConsoleNotifier, Notifier, TracingNotifier};
use crate::storage::{DurableStorage, FileStorage};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "guadzefie")]
#[command(author, version, about = "Marketplace session bridge", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "guadzefie.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Auth service URL (overrides auth.url)
    #[arg(long, env = "GUADZEFIE_AUTH_URL")]
    pub auth_url: Option<String>,

    /// Public API key for the auth service (overrides auth.anon_key)
    #[arg(long, env = "GUADZEFIE_ANON_KEY", hide_env_values = true)]
    pub anon_key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the current session
    Status {
        /// Print the full view as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sign in with email and password
    SignIn {
        email: String,
        #[arg(long, env = "GUADZEFIE_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create a new account
    SignUp {
        email: String,
        #[arg(long, env = "GUADZEFIE_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
    },

    /// Sign out and clear every stored session copy
    SignOut,

    /// Send a password recovery email
    ResetPassword { email: String },

    /// Refresh the primary session
    Refresh,

    /// Run the bridge until Ctrl+C
    Watch,

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

impl Cli {
    /// Apply command-line and environment overrides on top of the file
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(url) = &self.auth_url {
            config.auth.url = Some(url.clone());
        }
        if let Some(key) = &self.anon_key {
            config.auth.anon_key = Some(key.clone());
        }
    }
}

/// Run a CLI command
pub async fn run_command(cli: &Cli, config: Config) -> Result<()> {
    if let Commands::Config(ConfigCommands::Check) = &cli.command {
        return cmd_config_check(cli, &config);
    }

    config.validate().context("Invalid configuration")?;
    // Long-running watch reports through the log, one-shot commands print
    let notifier: Arc<dyn Notifier> = match cli.command {
        Commands::Watch => Arc::new(TracingNotifier),
        _ => Arc::new(ConsoleNotifier),
    };
    let (bridge, provider) = build_bridge(&config, notifier)?;
    let mut changes = provider.subscribe();

    match &cli.command {
        Commands::Status { json } => {
            bridge.reconcile().await;
            apply_pending(&bridge, &mut changes);
            print_status(&bridge.view(), *json)?;
        }
        Commands::SignIn { email, password } => {
            bridge.sign_in(email, password).await?;
            apply_pending(&bridge, &mut changes);
        }
        Commands::SignUp {
            email,
            password,
            first_name,
            last_name,
        } => {
            bridge
                .sign_up(email, password, first_name, last_name)
                .await?;
            apply_pending(&bridge, &mut changes);
        }
        Commands::SignOut => {
            bridge.reconcile().await;
            bridge.sign_out().await;
            apply_pending(&bridge, &mut changes);
            println!("Signed out");
        }
        Commands::ResetPassword { email } => {
            bridge.reset_password(email).await?;
        }
        Commands::Refresh => {
            bridge.reconcile().await;
            if !bridge.refresh_session().await {
                anyhow::bail!("No session could be refreshed");
            }
            apply_pending(&bridge, &mut changes);
            print_status(&bridge.view(), false)?;
        }
        Commands::Watch => {
            drop(changes);
            cmd_watch(&bridge).await;
        }
        Commands::Config(_) => {}
    }

    Ok(())
}

fn build_bridge(
    config: &Config,
    notifier: Arc<dyn Notifier>,
) -> Result<(Arc<SessionBridge>, Arc<dyn AuthProvider>)> {
    let storage: Arc<dyn DurableStorage> = Arc::new(FileStorage::new(&config.storage.path));

    let provider: Arc<dyn AuthProvider> = if config.auth.is_configured() {
        let client = GoTrueClient::new(&config.auth)
            .context("Failed to create auth client")?
            .with_storage(storage.clone());
        Arc::new(client)
    } else {
        tracing::warn!("No auth.url configured, only legacy sessions are available");
        Arc::new(NoopProvider::new())
    };

    let bridge = SessionBridge::new(
        storage,
        provider.clone(),
        notifier,
        BridgeSettings::from_config(config),
    );

    Ok((Arc::new(bridge), provider))
}

/// Apply auth changes raised while a one-shot command ran
fn apply_pending(bridge: &SessionBridge, changes: &mut broadcast::Receiver<AuthStateChange>) {
    loop {
        match changes.try_recv() {
            Ok(change) => bridge.apply_auth_change(&change),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped = skipped, "Missed auth changes");
            }
            Err(_) => break,
        }
    }
}

fn print_status(view: &AuthView, json: bool) -> Result<()> {
    if json {
        let output = serde_json::json!({
            "authenticated": view.is_authenticated(),
            "role": view.role(),
            "view": view,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to render status")?
        );
        return Ok(());
    }

    match (&view.session, view.source) {
        (Some(session), source) => {
            let source = source.map_or("unknown", |s| s.as_str());
            println!("Signed in");
            println!("  User:    {}", session.user.id);
            if let Some(email) = &session.user.email {
                println!("  Email:   {}", email);
            }
            println!("  Role:    {}", view.role());
            println!("  Source:  {}", source);
            println!(
                "  Expires: {}",
                chrono::DateTime::from_timestamp(session.expires_at, 0)
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| session.expires_at.to_string())
            );
        }
        (None, _) => println!("Not signed in"),
    }

    if let Some(legacy) = &view.custom_user {
        println!("Legacy user: {} <{}>", legacy.id, legacy.email);
    }

    Ok(())
}

async fn cmd_watch(bridge: &Arc<SessionBridge>) {
    let handle = bridge.start().await;
    let view = bridge.view();
    match &view.session {
        Some(session) => println!("Watching session for {} (Ctrl+C to stop)", session.user.id),
        None => println!("Watching for sign-in (Ctrl+C to stop)"),
    }

    shutdown_signal().await;
    handle.stop().await;
}

/// Resolve once Ctrl+C or SIGTERM arrives
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

fn cmd_config_check(cli: &Cli, config: &Config) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!("Defaults (and environment overrides) will be used.");
        println!();
    }

    if let Err(e) = config.validate() {
        println!("[ERR] {:#}", e);
        anyhow::bail!("Configuration is invalid");
    }

    println!("[OK] Configuration is valid!");
    println!();
    println!("=== Configuration Summary ===");
    println!();
    println!("Auth:");
    println!(
        "  URL:          {}",
        config.auth.url.as_deref().unwrap_or("(not set, legacy only)")
    );
    println!(
        "  Anon Key:     {}",
        if config.auth.anon_key.is_some() {
            "Set"
        } else {
            "Not set"
        }
    );
    println!("  Project ID:   {}", config.auth.project_id());
    println!("  Session Key:  {}", config.auth.session_key);
    println!(
        "  Redirect URL: {}",
        config.auth.redirect_url.as_deref().unwrap_or("(none)")
    );
    println!();
    println!("Bridge:");
    println!("  Poll Every:   {}s", config.bridge.poll_interval_secs);
    println!("  Session TTL:  {}s", config.bridge.session_ttl_secs);
    println!();
    println!("Storage:");
    println!("  Path:         {}", config.storage.path.display());

    Ok(())
}
