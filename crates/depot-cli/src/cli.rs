use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "depot",
    about = "Persistent upload queue and submission status tracking",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file; defaults to $HOME/depot/depot.toml, then /etc/depot/depot.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Queue a file for delivery
    Enqueue(EnqueueArgs),
    /// Deliver the oldest queued upload to stdout
    Tick,
    /// React to JSON-lines messages from stdin, replying on stdout
    Dispatch,
    /// Start tracking a submission
    Register(RegisterArgs),
    /// Record a status message for a submission
    Update(UpdateArgs),
    /// Show the status history of one submission
    Status(StatusArgs),
    /// List every submission tracked for a user
    Statuses(StatusesArgs),
    /// Stop tracking a submission
    Remove(RemoveArgs),
    /// Drop status records older than the configured age
    Gc(GcArgs),
    /// List queued uploads, oldest first
    Queue,
    /// Rewrite the store as a single snapshot
    Compact,
    /// Check the status indices for consistency
    Verify,
    /// Tick and collect garbage periodically until interrupted
    Worker(WorkerArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct EnqueueArgs {
    pub file: PathBuf,
    #[arg(short, long)]
    pub user: String,
    #[arg(short, long)]
    pub id: String,
    /// Metadata entry, repeatable
    #[arg(short, long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub meta: Vec<(String, String)>,
    /// Also start tracking the submission's status
    #[arg(long)]
    pub track: bool,
}

#[derive(Args)]
pub struct RegisterArgs {
    pub user: String,
    pub id: String,
}

#[derive(Args)]
pub struct UpdateArgs {
    pub id: String,
    pub message: String,
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args)]
pub struct StatusArgs {
    pub id: String,
    /// Only succeed if the submission belongs to this user
    #[arg(short, long)]
    pub user: Option<String>,
}

#[derive(Args)]
pub struct StatusesArgs {
    pub user: String,
}

#[derive(Args)]
pub struct RemoveArgs {
    pub id: String,
    #[arg(short, long)]
    pub user: Option<String>,
}

#[derive(Args)]
pub struct GcArgs {
    /// Override the configured maximum age, in seconds
    #[arg(long)]
    pub max_age: Option<u64>,
}

#[derive(Args)]
pub struct WorkerArgs {
    /// Override the configured tick interval, in milliseconds
    #[arg(long)]
    pub tick_ms: Option<u64>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_enqueue() {
        let cli = Cli::try_parse_from([
            "depot", "enqueue", "book.pdf", "-u", "alice", "-i", "s1", "-m", "title=Atlas", "--meta", "isbn=80-1",
        ])
        .unwrap();
        if let Command::Enqueue(args) = cli.command {
            assert_eq!(args.file, PathBuf::from("book.pdf"));
            assert_eq!(args.user, "alice");
            assert_eq!(args.id, "s1");
            assert_eq!(
                args.meta,
                vec![("title".into(), "Atlas".into()), ("isbn".into(), "80-1".into())]
            );
            assert!(!args.track);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn meta_without_equals_is_rejected() {
        assert!(Cli::try_parse_from(["depot", "enqueue", "f", "-u", "a", "-i", "b", "-m", "title"]).is_err());
        assert!(Cli::try_parse_from(["depot", "enqueue", "f", "-u", "a", "-i", "b", "-m", "=x"]).is_err());
    }

    #[test]
    fn meta_value_may_contain_equals() {
        assert_eq!(parse_key_val("q=a=b").unwrap(), ("q".into(), "a=b".into()));
    }

    #[test]
    fn parse_update() {
        let cli = Cli::try_parse_from(["depot", "update", "s1", "Accepted", "--url", "https://x"]).unwrap();
        if let Command::Update(args) = cli.command {
            assert_eq!(args.message, "Accepted");
            assert_eq!(args.url.as_deref(), Some("https://x"));
            assert!(args.name.is_none());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_status_with_user() {
        let cli = Cli::try_parse_from(["depot", "status", "s1", "--user", "alice"]).unwrap();
        if let Command::Status(args) = cli.command {
            assert_eq!(args.user.as_deref(), Some("alice"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from(["depot", "tick", "-v", "--config", "/tmp/d.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/d.toml")));
        assert!(matches!(cli.command, Command::Tick));
    }

    #[test]
    fn parse_gc_override() {
        let cli = Cli::try_parse_from(["depot", "gc", "--max-age", "60"]).unwrap();
        if let Command::Gc(args) = cli.command {
            assert_eq!(args.max_age, Some(60));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_worker() {
        let cli = Cli::try_parse_from(["depot", "worker", "--tick-ms", "250"]).unwrap();
        assert!(matches!(cli.command, Command::Worker(WorkerArgs { tick_ms: Some(250) })));
    }
}
