//! cf-remote CLI
//!
//! Run commands and copy files on local or remote hosts

use std::path::PathBuf;

use cf_remote_exec::{Connection, Connector, run_privileged, run_unprivileged, with_connection};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "cf-remote")]
#[command(about = "Run commands and copy files on remote hosts", long_about = None)]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Config file (defaults to cf-remote.toml lookup)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command as the login user
    Run {
        /// Host as [user@]host[:port], or localhost
        host: String,
        /// Command to run
        command: String,
        /// Users to try, in order
        #[arg(long = "user")]
        users: Vec<String>,
        /// Print output and a diagnostic on failure
        #[arg(long)]
        errors: bool,
    },
    /// Run a command as root, through sudo if needed
    Sudo {
        /// Host as [user@]host[:port], or localhost
        host: String,
        /// Command to run
        command: String,
        /// Users to try, in order
        #[arg(long = "user")]
        users: Vec<String>,
        /// Print output and a diagnostic on failure
        #[arg(long)]
        errors: bool,
    },
    /// Copy a file to the login user's home directory
    Copy {
        /// Local file
        file: PathBuf,
        /// Host as [user@]host[:port], or localhost
        host: String,
        /// Name to give the file on the host
        #[arg(long)]
        rename: Option<String>,
        /// Suppress progress output
        #[arg(long)]
        hide: bool,
    },
    /// Show who we connect as and whether sudo is needed
    Info {
        /// Host as [user@]host[:port], or localhost
        host: String,
        /// Users to try, in order
        #[arg(long = "user")]
        users: Vec<String>,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.log_level));

    let connector = Connector::openssh(config.transport);

    let ok = match cli.command {
        Commands::Run {
            host,
            command,
            users,
            errors,
        } => {
            let users = (!users.is_empty()).then_some(users.as_slice());
            let output = with_connection(&connector, &host, users, async |c: &dyn Connection| {
                run_unprivileged(c, &command, errors).await
            })
            .await??;
            print_output(output)
        }
        Commands::Sudo {
            host,
            command,
            users,
            errors,
        } => {
            let users = (!users.is_empty()).then_some(users.as_slice());
            let output = with_connection(&connector, &host, users, async |c: &dyn Connection| {
                run_privileged(c, &command, errors).await
            })
            .await??;
            print_output(output)
        }
        Commands::Copy {
            file,
            host,
            rename,
            hide,
        } => {
            cf_remote_exec::copy(&connector, &file, &host, rename.as_deref(), hide).await?;
            true
        }
        Commands::Info { host, users } => {
            let users = (!users.is_empty()).then_some(users.as_slice());
            with_connection(&connector, &host, users, async |c: &dyn Connection| {
                println!("user: {}", c.user());
                println!("host: {}", c.host());
                if let Some(port) = c.port() {
                    println!("port: {port}");
                }
                println!("needs sudo: {}", c.needs_elevation());
            })
            .await?;
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn print_output(output: Option<String>) -> bool {
    match output {
        Some(text) => {
            if !text.is_empty() {
                println!("{text}");
            }
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_users() {
        let cli = Cli::parse_from([
            "cf-remote", "run", "box", "uptime", "--user", "ubuntu", "--user", "root",
        ]);
        match cli.command {
            Commands::Run { host, users, errors, .. } => {
                assert_eq!(host, "box");
                assert_eq!(users, vec!["ubuntu", "root"]);
                assert!(!errors);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_print_output() {
        assert!(print_output(Some("ok".to_string())));
        assert!(!print_output(None));
    }
}
