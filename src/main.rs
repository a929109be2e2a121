use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

use pedalboard::auth::{accounts, session};
use pedalboard::config::{Cli, Command, Config};
use pedalboard::feed::model::{UserType, ViewerId};
use pedalboard::feed::ports::NewProfile;
use pedalboard::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;
    let state = pedalboard::bootstrap(&config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await,
        Command::CreateAccount {
            username,
            user_type,
        } => create_account(&state, username, &user_type).await,
        Command::IssueSession { account } => issue_session(&state, ViewerId(account)),
    }
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr =
        format!("{}:{}", state.config.server.host, state.config.server.port).parse()?;
    let app = pedalboard::routes::router(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create an account, optionally onboard it, and print a session token.
async fn create_account(
    state: &AppState,
    username: Option<String>,
    user_type: &str,
) -> anyhow::Result<()> {
    let user_type: UserType = user_type.parse()?;
    let id = accounts::create_account(&state.db)?;

    if let Some(username) = username {
        let profile = state
            .profiles
            .create_profile(
                &id,
                NewProfile {
                    username,
                    user_type,
                    message: None,
                    avatar_ref: None,
                },
            )
            .await?;
        tracing::info!("Onboarded {} as '{}'", id, profile.username);
    }

    let token = session::create_session(&state.db, &id, state.config.auth.session_hours)?;
    println!("account: {}", id);
    println!("token:   {}", token);
    Ok(())
}

fn issue_session(state: &AppState, account: ViewerId) -> anyhow::Result<()> {
    if !accounts::account_exists(&state.db, &account)? {
        anyhow::bail!("No account with id {}", account);
    }
    let purged = session::purge_expired(&state.db)?;
    if purged > 0 {
        tracing::info!("Purged {} expired sessions", purged);
    }

    let token = session::create_session(&state.db, &account, state.config.auth.session_hours)?;
    println!("{}", token);
    Ok(())
}
