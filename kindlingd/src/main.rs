//! kindlingd - MQTT broker daemon

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher};
use clap::{Parser, Subcommand};
use kindling_broker::auth::{AuthConfig as BrokerAuthConfig, CredentialValidator};
use kindling_broker::server::Listener;
use kindling_storage::memory::MemoryStore;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod credentials;

use config::Config;
use credentials::HashedCredentialValidator;

#[derive(Parser, Debug)]
#[command(name = "kindlingd")]
#[command(about = "Kindling MQTT broker daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file.
    #[arg(short = 'c', long, default_value = "/etc/kindling/config.toml")]
    config: PathBuf,

    /// Override listen address (e.g., 0.0.0.0:1883).
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// Enable verbose output.
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage password file credentials.
    Passwd {
        /// Path to the password file.
        #[arg(short = 'f', long)]
        file: String,

        /// Username to add or update.
        #[arg(short = 'u', long)]
        username: String,

        /// Delete the user instead of adding/updating.
        #[arg(short = 'd', long)]
        delete: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Commands::Passwd { file, username, delete }) = cli.command {
        if delete {
            delete_user(&file, &username)?;
        } else {
            add_or_update_user(&file, &username)?;
        }
        return Ok(());
    }

    let config = if cli.config.exists() {
        Config::from_file(&cli.config)?
    } else {
        if cli.config.to_str() != Some("/etc/kindling/config.toml") {
            eprintln!("Config file not found: {}", cli.config.display());
            std::process::exit(1);
        }
        Config::default()
    };

    let log_level = if cli.verbose { "debug" } else { &config.logging.level };
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let listen_addr = cli.listen.unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    let auth_config = if config.auth.enabled {
        let validator: Box<dyn CredentialValidator> = if let Some(ref password_file) = config.auth.password_file {
            let credentials = load_password_file(password_file)?;
            info!("Loaded {} credentials from password file", credentials.len());
            Box::new(HashedCredentialValidator::new(credentials))
        } else {
            return Err("authentication enabled but no password_file configured".into());
        };

        info!("Authentication enabled");
        BrokerAuthConfig {
            require_auth: true,
            allow_anonymous: config.auth.allow_anonymous,
            validator,
        }
    } else {
        BrokerAuthConfig::disabled()
    };

    info!("Starting Kindling MQTT broker on {}", listen_addr);

    let storage = Arc::new(MemoryStore::new());
    let mut listener = Listener::bind(&listen_addr, storage, auth_config).await?;

    info!("Kindling MQTT broker listening on {}", listen_addr);

    tokio::select! {
        result = listener.run() => {
            result?;
        }
        _ = signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    info!("Kindling MQTT broker stopped");

    Ok(())
}

/// Load a password file with format `username:hash` per line. Lines
/// starting with `#` and empty lines are ignored.
fn load_password_file(path: &str) -> Result<HashMap<String, String>, Box<dyn std::error::Error>> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("failed to read password file `{}`: {}", path, e))?;

    let mut credentials = HashMap::new();
    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((username, password_hash)) = line.split_once(':') else {
            return Err(format!(
                "invalid format in password file `{}` at line {}: expected `username:hash`",
                path,
                line_num + 1
            )
            .into());
        };
        credentials.insert(username.to_string(), password_hash.to_string());
    }

    Ok(credentials)
}

fn add_or_update_user(path: &str, username: &str) -> Result<(), Box<dyn std::error::Error>> {
    let password = rpassword::prompt_password(format!("Password for `{}`: ", username))?;
    if password.is_empty() {
        return Err("password cannot be empty".into());
    }
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        return Err("passwords do not match".into());
    }

    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| format!("failed to hash password: {}", e))?
        .to_string();

    let mut entries = load_password_file(path).unwrap_or_default();
    entries.insert(username.to_string(), hash);
    write_password_file(path, &entries)?;

    eprintln!("User `{}` added/updated in `{}`", username, path);
    Ok(())
}

fn delete_user(path: &str, username: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut entries = load_password_file(path).unwrap_or_default();
    if entries.remove(username).is_none() {
        return Err(format!("user `{}` not found in `{}`", username, path).into());
    }
    write_password_file(path, &entries)?;
    eprintln!("User `{}` deleted from `{}`", username, path);
    Ok(())
}

fn write_password_file(path: &str, entries: &HashMap<String, String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "# Kindling password file")?;
    writeln!(file, "# Managed by `kindlingd passwd`. Do not edit manually.")?;
    for (username, hash) in entries {
        writeln!(file, "{}:{}", username, hash)?;
    }
    Ok(())
}
