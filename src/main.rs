// src/main.rs

mod cli;

use anyhow::{bail, Context};
use api_key_pool::config::{self, save_config, PoolConfig};
use api_key_pool::pool::{KeyHealth, KeyStatus};
use api_key_pool::{bootstrap, setup_configuration, KeyPool};
use cli::{Cli, Commands, ConfigCommands, GenerateCommands, KeyCommands};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(cli: &Cli) {
    let env_filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    init_tracing(&cli);

    match cli.command {
        Commands::Config {
            action: ConfigCommands::Validate { file },
        } => {
            let path = config::resolve_config_path(file.or(cli.config));
            config::load_config(&path)
                .with_context(|| format!("{} is not a valid configuration", path.display()))?;
            println!("{} is valid", path.display());
        }
        Commands::Generate {
            template: GenerateCommands::Config { output },
        } => {
            if output.exists() {
                bail!("{} already exists", output.display());
            }
            save_config(&PoolConfig::default(), &output).await?;
            println!("Wrote {}", output.display());
        }
        command => {
            let (pool_config, _) = setup_configuration(cli.config)?;
            let pool = bootstrap(&pool_config).await?;
            let mutated = run_pool_command(&pool, command)?;
            if mutated {
                pool.flush().await.context("failed to persist key pool")?;
                info!("Key pool persisted");
            }
        }
    }

    Ok(())
}

/// Returns whether the command changed pool state.
fn run_pool_command(pool: &KeyPool, command: Commands) -> anyhow::Result<bool> {
    match command {
        Commands::Keys { action } => run_key_command(pool, action),
        Commands::Status { json } => {
            let status = pool.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!(
                    "keys: {} total, {} available | in flight: {} | concurrency: {}",
                    status.total_keys,
                    status.available_keys,
                    status.pending_requests,
                    status.concurrency
                );
                match &status.active_key {
                    Some(active) => println!("active key: {} ({})", active.name, active.masked_key),
                    None => println!("active key: none"),
                }
            }
            Ok(false)
        }
        Commands::Concurrency { value } => {
            let stored = pool.set_concurrency(value);
            println!("concurrency set to {stored}");
            Ok(true)
        }
        Commands::Config { .. } | Commands::Generate { .. } => Ok(false),
    }
}

fn run_key_command(pool: &KeyPool, action: KeyCommands) -> anyhow::Result<bool> {
    match action {
        KeyCommands::List { verbose } => {
            let status = pool.status();
            if status.keys.is_empty() {
                println!("no keys registered");
            }
            for key in &status.keys {
                print_key(key, verbose);
            }
            Ok(false)
        }
        KeyCommands::Add { name, secret } => {
            let record = pool.add_key(&name, &secret)?;
            println!("added {} {} ({})", record.id, record.name, record.masked_key);
            Ok(true)
        }
        KeyCommands::Remove { id } => {
            ensure_found(pool.remove_key(&id), &id)?;
            println!("removed {id}");
            Ok(true)
        }
        KeyCommands::Reset { id } => {
            ensure_found(pool.reset_key_errors(&id), &id)?;
            println!("reset {id}");
            Ok(true)
        }
        KeyCommands::Enable { id } => {
            ensure_found(pool.set_key_enabled(&id, true), &id)?;
            println!("enabled {id}");
            Ok(true)
        }
        KeyCommands::Disable { id } => {
            ensure_found(pool.set_key_enabled(&id, false), &id)?;
            println!("disabled {id}");
            Ok(true)
        }
        KeyCommands::Rename { id, name } => {
            ensure_found(pool.rename_key(&id, &name)?, &id)?;
            println!("renamed {id} to {}", name.trim());
            Ok(true)
        }
        KeyCommands::Activate { id } => {
            ensure_found(pool.set_active_key(&id), &id)?;
            println!("active key is now {id}");
            Ok(true)
        }
    }
}

fn ensure_found(found: bool, id: &str) -> anyhow::Result<()> {
    if !found {
        bail!("no key with id {id}");
    }
    Ok(())
}

fn print_key(key: &KeyStatus, verbose: bool) {
    let marker = if key.is_active_key { "*" } else { " " };
    let health = match key.health {
        KeyHealth::Available => "available".to_string(),
        KeyHealth::CoolingDown { remaining } => {
            format!("cooling down ({}s left)", remaining.as_secs())
        }
        KeyHealth::Disabled => "disabled".to_string(),
    };
    println!("{marker} {}  {:<20} {}  {health}", key.id, key.name, key.masked_key);
    if verbose {
        println!(
            "    requests: {} acquired, {} ok | errors: {} total, {} streak | avg latency: {:.0}ms",
            key.request_count,
            key.total_requests,
            key.total_errors,
            key.consecutive_errors,
            key.avg_response_time_ms
        );
        if let Some(last_error) = &key.last_error {
            println!("    last error: {last_error}");
        }
    }
}
