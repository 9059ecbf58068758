//! CLI command definitions and dispatch.

pub mod build;
pub mod inspect;

use clap::{Parser, Subcommand};

/// envd, development environments compiled into build graphs.
#[derive(Parser, Debug)]
#[command(name = "envd", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level regardless of `RUST_LOG`.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile an environment manifest into a build definition.
    Build(build::BuildArgs),
    /// Show the runtime metadata recorded in a build's image config.
    Inspect(inspect::InspectArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Build(args) => build::execute(args),
        Command::Inspect(args) => inspect::execute(&args),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn build_defaults() {
        let cli = Cli::try_parse_from(["envd", "build"]).expect("parse");
        let Command::Build(args) = cli.command else {
            unreachable!("expected build");
        };
        assert_eq!(args.file, std::path::PathBuf::from("envd.yaml"));
        assert!(!args.disable_merge_op);
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["envd", "inspect", "--debug"]).expect("parse");
        assert!(cli.debug);
    }
}
