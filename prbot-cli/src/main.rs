use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use prbot_core::parse_comment;
use prbot_server::webhook::signature::sign_github_payload;
use prbot_server::{CommandJob, Config, Executor, HttpPlatformFactory, Metrics, PrTarget};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// prbot: ChatOps commands for pull requests
#[derive(Parser, Debug)]
#[command(name = "prbot")]
#[command(about = "Run PR ChatOps commands", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a comment against a pull request and wait for it to finish
    Run(RunArgs),
    /// Print how a comment body parses
    Parse(ParseArgs),
    /// Print the X-Hub-Signature-256 value for a payload file
    Sign(SignArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Comment body, e.g. "/lgtm"
    #[arg(long)]
    comment: String,

    /// Repository owner (defaults to PRBOT_OWNER)
    #[arg(long)]
    owner: Option<String>,

    /// Repository name (defaults to PRBOT_REPO)
    #[arg(long)]
    repo: Option<String>,

    /// Pull request number (defaults to PRBOT_PR_NUMBER)
    #[arg(long)]
    pr: Option<u64>,

    /// User the comment is attributed to (defaults to PRBOT_COMMENT_SENDER)
    #[arg(long)]
    commenter: Option<String>,

    /// Run as the service itself, which allows built-in commands
    #[arg(long)]
    builtin: bool,

    /// Request id forwarded to the platform API
    #[arg(long)]
    event_id: Option<String>,
}

#[derive(Parser, Debug)]
struct ParseArgs {
    /// Comment body
    body: String,
}

#[derive(Parser, Debug)]
struct SignArgs {
    /// Webhook secret
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    secret: String,

    /// Payload file
    file: PathBuf,
}

fn resolve_target(args: &RunArgs, config: &Config) -> Result<PrTarget> {
    let owner = args
        .owner
        .clone()
        .or_else(|| config.target.owner.clone())
        .ok_or_else(|| anyhow!("--owner or PRBOT_OWNER is required"))?;
    let repo = args
        .repo
        .clone()
        .or_else(|| config.target.repo.clone())
        .ok_or_else(|| anyhow!("--repo or PRBOT_REPO is required"))?;
    let number = args
        .pr
        .or(config.target.pr_number)
        .ok_or_else(|| anyhow!("--pr or PRBOT_PR_NUMBER is required"))?;
    Ok(PrTarget::new(owner, repo, number))
}

async fn run(args: RunArgs) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration from environment")?;
    let target = resolve_target(&args, &config)?;
    let commenter = args
        .commenter
        .clone()
        .or_else(|| config.comment_sender.clone())
        .ok_or_else(|| anyhow!("--commenter or PRBOT_COMMENT_SENDER is required"))?;

    let factory = HttpPlatformFactory::from_config(&config).context("Failed to build HTTP client")?;
    let pr_sender = config.pr_sender.clone();
    let executor = Executor::from_config(
        Arc::new(factory),
        Arc::new(config),
        Arc::new(Metrics::new()),
    )
    .with_pr_sender(pr_sender);
    let job = CommandJob {
        target,
        commenter,
        body: args.comment,
        event_id: args.event_id,
    };

    info!("Running {:?} on {} as {}", job.body, job.target, job.commenter);
    let result = if args.builtin {
        executor.execute_internal(&job).await
    } else {
        executor.execute(&job).await
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_commented() => bail!("command refused: {}", e.root_cause()),
        Err(e) => Err(e).context(format!("command failed on {}", job.target)),
    }
}

fn parse(args: ParseArgs) -> Result<()> {
    let parsed = parse_comment(&args.body).context("Comment is not a command")?;
    println!("{:#?}", parsed);
    println!();
    println!("{}", parsed.render());
    Ok(())
}

fn sign(args: SignArgs) -> Result<()> {
    let payload = fs::read(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    println!("{}", sign_github_payload(&args.secret, &payload));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Parse(args) => parse(args),
        Commands::Sign(args) => sign(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["prbot", "run"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Commands::Run(args) => args,
            other => panic!("expected run, got {:?}", other),
        }
    }

    fn config(pairs: &[(&str, &str)]) -> Config {
        prbot_server::testing::config(pairs).unwrap()
    }

    #[test]
    fn test_flags_override_environment_target() {
        let args = run_args(&["--comment", "/lgtm", "--repo", "gadgets", "--pr", "9"]);
        let config = config(&[
            ("PRBOT_OWNER", "acme"),
            ("PRBOT_REPO", "widgets"),
            ("PRBOT_PR_NUMBER", "3"),
        ]);
        assert_eq!(
            resolve_target(&args, &config).unwrap(),
            PrTarget::new("acme", "gadgets", 9)
        );
    }

    #[test]
    fn test_missing_target_is_an_error() {
        let args = run_args(&["--comment", "/lgtm"]);
        let err = resolve_target(&args, &config(&[])).unwrap_err();
        assert!(err.to_string().contains("PRBOT_OWNER"));
    }

    #[test]
    fn test_builtin_flag() {
        let args = run_args(&["--comment", "/__cherry-pick", "--builtin"]);
        assert!(args.builtin);
        assert_eq!(args.comment, "/__cherry-pick");
    }

    #[test]
    fn test_sign_reads_secret_flag() {
        let cli = Cli::parse_from(["prbot", "sign", "--secret", "s", "payload.json"]);
        match cli.command {
            Commands::Sign(args) => {
                assert_eq!(args.secret, "s");
                assert_eq!(args.file, PathBuf::from("payload.json"));
            }
            other => panic!("expected sign, got {:?}", other),
        }
    }
}
