//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the matching
//! subcommand handler: [`run`], [`validate`], or [`health`].

pub mod health;
pub mod run;
pub mod validate;

use crate::cli::{Cli, Commands};
use crate::error::AuthProxyError;

pub async fn dispatch(cli: Cli) -> Result<(), AuthProxyError> {
    match cli.command {
        Some(Commands::Run(args)) => run::execute(*args).await,
        Some(Commands::Validate(ref args)) => validate::execute(args),
        Some(Commands::Health(args)) => health::execute(args).await,
        None => {
            print_welcome();
            Ok(())
        }
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  auth-proxy v{version}: authenticating reverse proxy\n\n  \
         No command provided. To get started:\n\n    \
         auth-proxy run --store-file store.json   Start with a JSON key-value store\n    \
         auth-proxy validate auth-proxy.yaml      Check a config file\n    \
         auth-proxy --help                        See all commands and options\n"
    );
}
