pub mod config;
pub mod git;
pub mod handler;
pub mod metrics;
pub mod platform;
pub mod rate_limit;
pub mod results;
pub mod testing;
pub mod webhook;
pub mod worker;

pub use config::{Config, ConfigError};
pub use handler::{CommandError, CommandJob, Executor};
pub use metrics::Metrics;
pub use platform::{
    HttpPlatformFactory, Platform, PlatformClient, PlatformError, PlatformFactory, PrTarget,
};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(8).collect()
}

/// Build identifier reported by `/healthz`.
pub fn get_bot_version() -> String {
    // Release builds inject the hash; plain cargo builds fall back to the
    // checkout `built` found.
    if let Some(git_hash) = option_env!("PRBOT_GIT_HASH") {
        format!("{}-{}", built_info::PKG_VERSION, short_hash(git_hash))
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        format!("{}-{}", built_info::PKG_VERSION, short_hash(git_hash))
    } else {
        built_info::PKG_VERSION.to_string()
    }
}
