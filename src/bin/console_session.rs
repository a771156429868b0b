//!
//! console-session CLI binary
//! --------------------------
//! Headless driver for the session core. The session lives in a JSON file so a
//! `login` in one invocation is picked up by `whoami` or `config` in the next.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use console_session::cache::ConfigDomain;
use console_session::{ConsoleConfig, EntryState, HistoryNavigator, SessionController};

const DEFAULT_SESSION_FILE: &str = ".console-session.json";

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--config <file>] [--session-file <file>] [--base-url <url>] <command>\n\nCommands:\n  login <email> <password>   authenticate and persist the session\n  whoami                     resolve the current user with the stored token\n  config [<path>]            read organization settings, or the configuration at <path>\n  status                     print whether a token is stored\n  logout                     tear down the stored session\n\nFlags:\n  --config <file>            JSON settings file (CONSOLE_* env vars still apply on top)\n  --session-file <file>      Session file (default: {DEFAULT_SESSION_FILE})\n  --base-url <url>           API base URL, overrides CONSOLE_API_BASE_URL\n  -h, --help                 Show this help\n\nLogging is controlled by RUST_LOG (default: info)."
    );
}

enum Command {
    Login { email: String, password: String },
    WhoAmI,
    Config { path: Option<String> },
    Status,
    Logout,
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut config_file: Option<PathBuf> = None;
    let mut session_file: Option<PathBuf> = None;
    let mut base_url: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if i + 1 >= args.len() { eprintln!("--config requires a value"); print_usage(&program); std::process::exit(2); }
                config_file = Some(PathBuf::from(&args[i + 1]));
                i += 2; continue;
            }
            "--session-file" => {
                if i + 1 >= args.len() { eprintln!("--session-file requires a value"); print_usage(&program); std::process::exit(2); }
                session_file = Some(PathBuf::from(&args[i + 1]));
                i += 2; continue;
            }
            "--base-url" => {
                if i + 1 >= args.len() { eprintln!("--base-url requires a URL"); print_usage(&program); std::process::exit(2); }
                base_url = Some(args[i + 1].clone());
                i += 2; continue;
            }
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            flag if flag.starts_with("--") => {
                eprintln!("Unrecognized argument: {}", flag);
                print_usage(&program);
                std::process::exit(2);
            }
            other => { positional.push(other.to_string()); i += 1; }
        }
    }

    let command = match parse_command(&positional) {
        Some(c) => c,
        None => {
            print_usage(&program);
            std::process::exit(2);
        }
    };

    let mut config = match &config_file {
        Some(path) => ConsoleConfig::load(path)?,
        None => ConsoleConfig::from_env()?,
    };
    if let Some(url) = base_url { config.api_base_url = url; }
    if let Some(path) = session_file { config.session_file = Some(path); }
    if config.session_file.is_none() { config.session_file = Some(PathBuf::from(DEFAULT_SESSION_FILE)); }

    let navigator = Arc::new(HistoryNavigator::new());
    let controller = SessionController::from_config(&config, navigator.clone())
        .with_context(|| format!("opening session at {}", config.api_base_url))?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    let ok = rt.block_on(run(&controller, command))?;
    if let Some(path) = navigator.current() {
        tracing::debug!(target: "console::navigation", "final location {}", path);
    }
    if !ok { std::process::exit(1); }
    Ok(())
}

fn parse_command(positional: &[String]) -> Option<Command> {
    let (name, rest) = positional.split_first()?;
    match (name.as_str(), rest) {
        ("login", [email, password]) => Some(Command::Login { email: email.clone(), password: password.clone() }),
        ("whoami", []) => Some(Command::WhoAmI),
        ("config", []) => Some(Command::Config { path: None }),
        ("config", [path]) => Some(Command::Config { path: Some(path.clone()) }),
        ("status", []) => Some(Command::Status),
        ("logout", []) => Some(Command::Logout),
        _ => {
            eprintln!("Unrecognized command: {}", positional.join(" "));
            None
        }
    }
}

/// Returns whether the command succeeded; `Err` is reserved for local failures.
async fn run(controller: &SessionController, command: Command) -> Result<bool> {
    match command {
        Command::Login { email, password } => match controller.login(&email, &password).await {
            Ok(user) => {
                println!("logged in as {} ({}) role={}", user.name, user.email, user.role);
                Ok(true)
            }
            Err(e) => {
                eprintln!("login failed: {}", e);
                Ok(false)
            }
        },
        Command::WhoAmI => match controller.identity().await {
            EntryState::Ready(user) => {
                println!("{}", serde_json::to_string_pretty(&user).context("encoding user")?);
                Ok(true)
            }
            EntryState::Errored(e) => {
                eprintln!("identity unavailable: {}", e);
                Ok(false)
            }
            EntryState::Absent | EntryState::Loading => {
                eprintln!("not logged in");
                Ok(false)
            }
        },
        Command::Config { path } => {
            let domain = match path {
                Some(p) => ConfigDomain::new(p.clone(), p, controller.organization_domain().ttl),
                None => controller.organization_domain().clone(),
            };
            match controller.config(&domain).await {
                EntryState::Ready(value) => {
                    println!("{}", serde_json::to_string_pretty(&value).context("encoding configuration")?);
                    Ok(true)
                }
                EntryState::Errored(e) => {
                    eprintln!("configuration unavailable: {}", e);
                    Ok(false)
                }
                EntryState::Absent | EntryState::Loading => {
                    eprintln!("not logged in");
                    Ok(false)
                }
            }
        }
        Command::Status => {
            let session = controller.session();
            match (&session.token, &session.user) {
                (Some(_), Some(user)) => println!("authenticated as {} ({})", user.email, user.role),
                (Some(_), None) => println!("authenticated (user snapshot missing)"),
                _ => println!("not authenticated"),
            }
            Ok(true)
        }
        Command::Logout => {
            controller.logout();
            println!("logged out");
            Ok(true)
        }
    }
}
