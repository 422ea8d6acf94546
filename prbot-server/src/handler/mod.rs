//! Command execution: parse a comment, look up handlers, run them against a
//! PR-bound platform client.

mod basic;
mod batch;
mod checkbox;
mod cherry_pick;
mod context;
mod lgtm;
mod merge;
mod registry;
mod retest;

use std::sync::Arc;

use async_trait::async_trait;
use prbot_core::render;
use prbot_core::{parse_comment, ParsedCommand, SubCommand};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::git::{CherryPicker, GitCliCherryPicker};
use crate::metrics::Metrics;
use crate::platform::{PlatformError, PlatformFactory, PrTarget};

pub use context::CommandContext;
pub use registry::Registry;

#[derive(Debug, Error)]
pub enum CommandError {
    /// The user was already told why; callers must not post again.
    #[error("{reason}")]
    Commented { reason: String },
    /// Rejected before doing anything; nothing posted yet.
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

impl CommandError {
    pub fn commented(reason: impl Into<String>) -> Self {
        Self::Commented {
            reason: reason.into(),
        }
    }

    pub fn is_commented(&self) -> bool {
        matches!(self, Self::Commented { .. })
    }

    /// The underlying failure, without the commented marker.
    pub fn root_cause(&self) -> String {
        match self {
            Self::Commented { reason } => reason.clone(),
            Self::Invalid(reason) => reason.clone(),
            Self::Platform(e) => e.to_string(),
        }
    }
}

pub type CommandResult<T = ()> = Result<T, CommandError>;

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn run(&self, ctx: &CommandContext, args: &[String]) -> CommandResult;
}

/// Where a command came from. Built-in commands are only accepted internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    User,
    Internal,
}

/// A comment to execute against one PR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandJob {
    pub target: PrTarget,
    pub commenter: String,
    pub body: String,
    /// Delivery id, propagated to outbound requests.
    pub event_id: Option<String>,
}

/// Runs command jobs. Shared by the webhook workers and the CLI.
pub struct Executor {
    factory: Arc<dyn PlatformFactory>,
    config: Arc<Config>,
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
    pr_sender: Option<String>,
}

impl Executor {
    pub fn new(
        factory: Arc<dyn PlatformFactory>,
        config: Arc<Config>,
        registry: Arc<Registry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            factory,
            config,
            registry,
            metrics,
            pr_sender: None,
        }
    }

    /// Treat `sender` as the author of every PR this executor runs against.
    /// Only for one-shot runs where the caller already knows the author.
    pub fn with_pr_sender(mut self, sender: Option<String>) -> Self {
        self.pr_sender = sender;
        self
    }

    /// Executor with the standard command set for `config`.
    pub fn from_config(
        factory: Arc<dyn PlatformFactory>,
        config: Arc<Config>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let picker: Option<Arc<dyn CherryPicker>> = if config.use_git_cli_for_cherry_pick {
            Some(Arc::new(GitCliCherryPicker::new(config.git_workdir.clone())))
        } else {
            None
        };
        Self::new(
            factory,
            config,
            Arc::new(Registry::standard(picker)),
            metrics,
        )
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn factory(&self) -> &Arc<dyn PlatformFactory> {
        &self.factory
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn context(&self, job: &CommandJob) -> CommandResult<CommandContext> {
        let client = self.factory.client(&job.target, job.event_id.as_deref())?;
        Ok(CommandContext::new(
            client,
            self.config.clone(),
            self.registry.clone(),
            self.metrics.clone(),
            job.commenter.clone(),
        )
        .with_pr_sender(self.pr_sender.clone()))
    }

    /// Execute a comment posted by a user.
    pub async fn execute(&self, job: &CommandJob) -> CommandResult {
        self.run(job, Origin::User).await
    }

    /// Execute a comment on behalf of the service itself, which may name
    /// built-in commands.
    pub async fn execute_internal(&self, job: &CommandJob) -> CommandResult {
        self.run(job, Origin::Internal).await
    }

    async fn run(&self, job: &CommandJob, origin: Origin) -> CommandResult {
        let parsed =
            parse_comment(&job.body).map_err(|e| CommandError::Invalid(e.to_string()))?;
        info!(
            "Executing {:?} from {} on {}",
            parsed, job.commenter, job.target
        );
        let ctx = self.context(job)?;
        let result = ctx.dispatch(parsed, origin).await;
        match &result {
            Ok(()) => info!("Finished command on {}", job.target),
            Err(e) if e.is_commented() => info!("Command on {} refused: {}", job.target, e),
            Err(e) => error!("Command on {} failed: {}", job.target, e),
        }
        result
    }
}

impl CommandContext {
    /// Run a parsed comment.
    pub async fn dispatch(&self, parsed: ParsedCommand, origin: Origin) -> CommandResult {
        match parsed {
            ParsedCommand::BuiltIn(cmd) if origin == Origin::User => {
                warn!("Refusing built-in {} from {}", cmd.command, self.commenter());
                self.deny(
                    render::builtin_refused(&cmd.command),
                    format!("built-in command {} refused", cmd.command),
                )
                .await
            }
            ParsedCommand::Single(cmd) | ParsedCommand::BuiltIn(cmd) => {
                self.run_top_level(cmd).await
            }
            ParsedCommand::Multi(mut commands) => {
                let first = commands.remove(0);
                match first.command.as_str() {
                    "batch" | "check" => {
                        let header = batch::header_for(&first.command);
                        let mut subs = batch::sub_commands(&first.args);
                        subs.extend(commands);
                        batch::run_batch(self, header, subs).await
                    }
                    _ => {
                        commands.insert(0, first);
                        batch::run_batch(self, batch::BATCH_HEADER, commands).await
                    }
                }
            }
        }
    }

    /// Run one command that was the whole comment. Validation and platform
    /// failures are reported to the user here.
    async fn run_top_level(&self, cmd: SubCommand) -> CommandResult {
        let cmd = normalize(cmd);
        if self.registry().get(&cmd.command).is_none() {
            return self
                .deny(
                    render::unknown_command(&cmd.command),
                    format!("unknown command: {}", cmd.command),
                )
                .await;
        }
        match self.invoke(&cmd).await {
            Err(CommandError::Invalid(reason)) => {
                self.deny(render::command_failed(&cmd.to_string(), &reason), reason)
                    .await
            }
            Err(CommandError::Platform(e)) => {
                warn!("{} failed on {}: {}", cmd, self.client().target(), e);
                let reason = e.to_string();
                self.deny(render::command_failed(&cmd.to_string(), &reason), reason)
                    .await
            }
            other => other,
        }
    }

    /// Look up and run one command without posting anything on failure.
    pub async fn invoke(&self, cmd: &SubCommand) -> CommandResult {
        let cmd = normalize(cmd.clone());
        let Some(handler) = self.registry().get(&cmd.command) else {
            return Err(CommandError::Invalid(format!(
                "unknown command: {}",
                cmd.command
            )));
        };
        if cmd.is_builtin() && !self.begin_builtin(&cmd.command).await {
            info!("Built-in {} already ran, skipping", cmd.command);
            return Ok(());
        }
        let result = handler.run(self, &cmd.args).await;
        let label = match &result {
            Ok(()) => "ok",
            Err(e) if e.is_commented() => "refused",
            Err(CommandError::Invalid(_)) => "invalid",
            Err(_) => "error",
        };
        self.metrics().command(&cmd.command, label);
        result
    }
}

/// `/lgtm cancel` is spelled like a vote but means withdrawal.
fn normalize(cmd: SubCommand) -> SubCommand {
    if cmd.command == "lgtm" && cmd.args.first().map(String::as_str) == Some("cancel") {
        SubCommand::new("remove-lgtm", cmd.args[1..].to_vec())
    } else {
        cmd
    }
}

#[cfg(test)]
mod tests;
