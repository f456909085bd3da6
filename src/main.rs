//! Sessionward - maintenance tool for sessions and pending two-factor requests

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sessionward::{
    clock::SystemClock,
    config::Config,
    models::LoginSession,
    services::{SlidingSessionStore, TwoFactorService},
    store::{create_store, KeyValueStore},
};

const USAGE: &str = "usage: sessionward <ping | check <session-id> | logout <session-id> | purge-2fa <user-key>>";

/// A maintenance action
enum Command {
    Ping,
    Check(String),
    Logout(String),
    PurgeTwoFactor(String),
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        match args {
            [cmd] if cmd == "ping" => Ok(Command::Ping),
            [cmd, id] if cmd == "check" => Ok(Command::Check(id.clone())),
            [cmd, id] if cmd == "logout" => Ok(Command::Logout(id.clone())),
            [cmd, user] if cmd == "purge-2fa" => Ok(Command::PurgeTwoFactor(user.clone())),
            _ => bail!("{}", USAGE),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sessionward=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    // Load configuration
    let config = Config::load_with_env(Path::new("sessionward.yml"))?;
    tracing::info!("Configuration loaded (environment '{}')", config.environment);

    let clock = SystemClock::shared();
    let store = create_store(&config.store, clock.clone()).await?;
    tracing::info!("Store initialized: {:?}", config.store.driver);

    match command {
        Command::Ping => {
            store.ping().await.context("Store did not answer")?;
            println!("PONG");
        }
        Command::Check(id) => {
            let sessions = SlidingSessionStore::<LoginSession>::from_config(store, clock, &config);
            match sessions.check(&id).await? {
                Some(session) => println!("{}", serde_json::to_string_pretty(&session)?),
                None => println!("no active session '{}'", id),
            }
        }
        Command::Logout(id) => {
            let sessions = SlidingSessionStore::<LoginSession>::from_config(store, clock, &config);
            sessions.logout(&id).await?;
            println!("logged out '{}'", id);
        }
        Command::PurgeTwoFactor(user) => {
            let two_factor = TwoFactorService::from_config(store, clock, &config);
            two_factor.delete_requests(&user).await?;
            println!("cleared pending two-factor requests of '{}'", user);
        }
    }

    Ok(())
}
