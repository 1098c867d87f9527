//! authctl - manage operator accounts and sessions.

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lnmt_auth::{Role, SessionToken};
use lnmt_cli::{emit, finish, render_table, CliContext, OutputFormat};

/// Manage operator accounts and sessions.
#[derive(Parser)]
#[command(name = "authctl", version, about)]
struct Cli {
    /// Path to a configuration file layered over the defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify credentials and print a session token.
    Login {
        /// Username.
        username: String,
        /// Password; prompted when omitted.
        #[arg(long)]
        password: Option<String>,
        /// Long-lived session.
        #[arg(long)]
        remember: bool,
    },
    /// Revoke a session token.
    Logout {
        /// The token, or set LNMT_TOKEN.
        #[arg(long, env = "LNMT_TOKEN")]
        token: String,
    },
    /// Show the account behind a token.
    Whoami {
        /// The token, or set LNMT_TOKEN.
        #[arg(long, env = "LNMT_TOKEN")]
        token: String,
    },
    /// Manage accounts.
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// List accounts.
    List,
    /// Create an account.
    Add {
        /// Username.
        username: String,
        /// Role: viewer, operator, admin.
        #[arg(long, default_value = "viewer")]
        role: String,
        /// Contact address.
        #[arg(long, default_value = "")]
        email: String,
        /// Password; prompted when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Disable an account (live sessions are unaffected).
    Disable {
        /// Username.
        username: String,
    },
    /// Re-enable an account.
    Enable {
        /// Username.
        username: String,
    },
    /// Change an account's password and clear its lockout.
    Passwd {
        /// Username.
        username: String,
        /// Password; prompted when omitted.
        #[arg(long)]
        password: Option<String>,
    },
}

fn password_or_prompt(password: Option<String>, confirm: bool) -> anyhow::Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    let mut prompt = dialoguer::Password::new().with_prompt("Password");
    if confirm {
        prompt = prompt.with_confirmation("Confirm password", "passwords do not match");
    }
    Ok(prompt.interact()?)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = CliContext::open(cli.config.as_deref())?;
    let auth = &ctx.engines.auth;

    match cli.command {
        Commands::Login {
            username,
            password,
            remember,
        } => {
            let password = password_or_prompt(password, false)?;
            let session = auth.login(&username, &password, remember)?;
            emit(cli.format, &session.token, |token| {
                format!("{}\n", token.as_str())
            })?;
        }
        Commands::Logout { token } => {
            auth.logout(&SessionToken(token))?;
            println!("logged out");
        }
        Commands::Whoami { token } => {
            let session = auth.validate(&SessionToken(token))?;
            emit(cli.format, &session, |session| {
                format!(
                    "{} ({}), session expires {}\n",
                    session.username,
                    session.role,
                    session.expires_at.to_rfc3339()
                )
            })?;
        }
        Commands::Users { command } => match command {
            UserCommands::List => {
                let users = auth.list_users()?;
                emit(cli.format, &user_rows(&users), |rows| {
                    render_table(
                        &["USERNAME", "ROLE", "ENABLED", "LAST LOGIN", "LOCKOUT"],
                        rows,
                    )
                })?;
            }
            UserCommands::Add {
                username,
                role,
                email,
                password,
            } => {
                let role: Role = role.parse().map_err(|e: String| anyhow::anyhow!(e))?;
                let password = password_or_prompt(password, true)?;
                auth.create_user("cli", &username, &password, &email, role)?;
                println!("created {username} ({role})");
            }
            UserCommands::Disable { username } => {
                auth.set_enabled("cli", &username, false)?;
                println!("disabled {username}");
            }
            UserCommands::Enable { username } => {
                auth.set_enabled("cli", &username, true)?;
                println!("enabled {username}");
            }
            UserCommands::Passwd { username, password } => {
                let password = password_or_prompt(password, true)?;
                auth.set_password("cli", &username, &password)?;
                println!("password updated for {username}");
            }
        },
    }
    Ok(())
}

/// Rows for the users table. Verifiers never leave the engine; this
/// projection carries only displayable fields.
fn user_rows(users: &[lnmt_auth::User]) -> Vec<Vec<String>> {
    users
        .iter()
        .map(|user| {
            vec![
                user.username.clone(),
                user.role.to_string(),
                if user.enabled { "yes" } else { "no" }.to_owned(),
                user.last_login
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
                user.lockout_until
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
            ]
        })
        .collect()
}

fn main() {
    let cli = Cli::parse();
    finish(run(cli));
}
