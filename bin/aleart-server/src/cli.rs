//! Command-line interface.

use aleart_core::TokenId;
use clap::{Args, Parser, Subcommand};

/// `aleart-server` command arguments.
#[derive(Debug, Parser)]
#[command(
    name = "aleart-server",
    about = "Token art image generation service and job reconciliation",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the HTTP API (default).
    Serve,
    /// Complete job records stuck in `generating` from their artifact files.
    Reconcile(ReconcileArgs),
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct ReconcileArgs {
    /// Reconcile one token; integer-looking values are integer tokens.
    #[arg(long = "token-id", value_name = "id")]
    pub token_id: Option<TokenId>,
    /// Reconcile every token that has a `generating` record.
    #[arg(long)]
    pub all: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["aleart-server"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn reconcile_parses_numeric_token() {
        let cli = Cli::try_parse_from(["aleart-server", "reconcile", "--token-id", "5"]).unwrap();
        let Some(Command::Reconcile(args)) = cli.command else {
            panic!("expected reconcile");
        };
        assert_eq!(args.token_id, Some(TokenId::Number(5)));
        assert!(!args.all);
    }

    #[test]
    fn reconcile_needs_exactly_one_target() {
        assert!(Cli::try_parse_from(["aleart-server", "reconcile"]).is_err());
        assert!(
            Cli::try_parse_from(["aleart-server", "reconcile", "--all", "--token-id", "5"]).is_err()
        );
        assert!(Cli::try_parse_from(["aleart-server", "reconcile", "--all"]).is_ok());
    }
}
