use async_trait::async_trait;
use prbot_core::checkbox::{check_all, CheckboxOutcome};
use prbot_core::render;
use prbot_core::{IssueSearch, ItemState};
use tracing::info;

use super::{CommandContext, CommandError, CommandHandler, CommandResult};

/// Tick the boxes in `body` and write it back with `write`.
async fn toggle<F, Fut>(ctx: &CommandContext, label: &str, body: &str, write: F) -> CommandResult
where
    F: FnOnce(String) -> Fut,
    Fut: std::future::Future<Output = CommandResult>,
{
    match check_all(body) {
        CheckboxOutcome::NoDescription => {
            ctx.deny(
                render::checkbox_no_description(label),
                format!("{} has no description", label),
            )
            .await
        }
        CheckboxOutcome::AlreadyChecked => {
            ctx.deny(
                render::checkbox_already_checked(label),
                format!("{} has no unchecked boxes", label),
            )
            .await
        }
        CheckboxOutcome::Updated { body, count } => {
            info!("Checking {} box(es) in {}", count, label);
            if let Err(e) = write(body).await {
                let reason = e.root_cause();
                return ctx
                    .deny(
                        render::checkbox_update_failed(label, &reason),
                        format!("updating {} failed: {}", label, reason),
                    )
                    .await;
            }
            ctx.post(&render::checkbox_updated(label, count)).await
        }
    }
}

/// `/checkbox`: tick every box in the PR description.
pub struct Checkbox;

#[async_trait]
impl CommandHandler for Checkbox {
    async fn run(&self, ctx: &CommandContext, _args: &[String]) -> CommandResult {
        let body = ctx.pr().await?.body.clone();
        toggle(ctx, "this PR", &body, |new_body| async move {
            ctx.client().update_pr_body(&new_body).await?;
            Ok(())
        })
        .await
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct IssueArgs {
    number: Option<u64>,
    title: Option<String>,
    author: Option<String>,
}

/// `[number] [--title T...] [--author A]`. Titles may span several words.
fn parse_issue_args(args: &[String]) -> CommandResult<IssueArgs> {
    let mut parsed = IssueArgs::default();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--title" => {
                let mut words = Vec::new();
                while let Some(word) = iter.next_if(|w| !w.starts_with("--")) {
                    words.push(word.as_str());
                }
                if words.is_empty() {
                    return Err(CommandError::Invalid("--title needs a value".to_string()));
                }
                parsed.title = Some(words.join(" "));
            }
            "--author" => match iter.next() {
                Some(author) if !author.starts_with("--") => {
                    parsed.author = Some(author.trim_start_matches('@').to_string());
                }
                _ => return Err(CommandError::Invalid("--author needs a value".to_string())),
            },
            other => {
                let number = other
                    .trim_start_matches('#')
                    .parse::<u64>()
                    .map_err(|_| CommandError::Invalid(format!("unexpected argument {}", other)))?;
                parsed.number = Some(number);
            }
        }
    }
    Ok(parsed)
}

/// `/checkbox-issue`: tick every box in an issue, by default the dependency
/// dashboard.
pub struct CheckboxIssue;

#[async_trait]
impl CommandHandler for CheckboxIssue {
    async fn run(&self, ctx: &CommandContext, args: &[String]) -> CommandResult {
        let args = parse_issue_args(args)?;
        let client = ctx.client();

        let issue = match args.number {
            Some(number) => client.get_issue(number).await?,
            None => {
                let title = args
                    .title
                    .unwrap_or_else(|| ctx.config().dashboard_issue_title.clone());
                let author = args
                    .author
                    .unwrap_or_else(|| ctx.config().dashboard_issue_author.clone());
                let search = IssueSearch {
                    title: Some(title.clone()),
                    author: Some(author.clone()),
                    labels: Vec::new(),
                    state: Some(ItemState::Open),
                };
                match client.find_issue(&search).await? {
                    Some(issue) => issue,
                    None => {
                        return ctx
                            .deny(
                                render::checkbox_issue_not_found(&title, &author),
                                format!("no issue matching {:?}", title),
                            )
                            .await
                    }
                }
            }
        };

        let label = format!("issue #{}", issue.number);
        let number = issue.number;
        toggle(ctx, &label, &issue.body, |new_body| async move {
            client.update_issue_body(number, &new_body).await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_issue_args() {
        assert_eq!(parse_issue_args(&[]).unwrap(), IssueArgs::default());
        assert_eq!(
            parse_issue_args(&args(&["#12"])).unwrap(),
            IssueArgs {
                number: Some(12),
                ..Default::default()
            }
        );
        assert_eq!(
            parse_issue_args(&args(&["--title", "Release", "Checklist", "--author", "@bot"]))
                .unwrap(),
            IssueArgs {
                number: None,
                title: Some("Release Checklist".to_string()),
                author: Some("bot".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_issue_args_rejects_garbage() {
        assert!(parse_issue_args(&args(&["twelve"])).is_err());
        assert!(parse_issue_args(&args(&["--title"])).is_err());
        assert!(parse_issue_args(&args(&["--author", "--title", "x"])).is_err());
    }
}
