//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for toolgate
#[derive(Parser, Debug)]
#[command(name = "toolgate")]
#[command(author, version, about = "Admission and execution gateway for hot-reloaded Lua tools")]
#[command(long_about = r#"
toolgate watches a directory of Lua tool scripts, scans every version of every
script for risky constructs, and only lets a script be called once its exact
content has been approved. Clean scripts are approved automatically; flagged
ones wait for `toolgate approve <digest> --by <name>`.

Configuration files are loaded from (in priority order):
1. TOOLGATE_* environment variables (e.g. TOOLGATE_EXECUTION__TIMEOUT_SECS=10)
2. --config <path>     Explicit config file
3. ./toolgate.toml     Project-level config
4. ~/.config/toolgate/config.toml   Global config

Example:
  toolgate serve -v
  toolgate scan tools/fetch.lua
  toolgate pending
  toolgate approve 3f2a...e9 --by alice
  toolgate call greet --args '{"who": "ada"}'
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Disable loading of configuration files
    #[arg(long, global = true)]
    pub no_config: bool,

    /// Tools directory (overrides `[tools] dir`)
    #[arg(long, value_name = "DIR", global = true)]
    pub tools_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch the tools directory and keep the registry current until Ctrl-C
    Serve,

    /// Scan one tool file and print its verdict and descriptor as JSON
    ///
    /// Exits with status 1 when the file is not clean.
    Scan {
        /// Path to a `.lua` tool unit
        file: PathBuf,
    },

    /// List loaded tools
    List,

    /// List tools waiting for approval
    Pending,

    /// Show the admission state of every known unit
    Status,

    /// Approve a pending tool by its content digest
    Approve {
        /// 64-character SHA-256 hex digest, as printed by `pending`
        digest: String,

        /// Who is approving
        #[arg(long, value_name = "NAME")]
        by: String,
    },

    /// Call a loaded tool once and print the result
    Call {
        /// Tool name
        name: String,

        /// Arguments as a JSON object
        #[arg(long, value_name = "JSON", default_value = "{}")]
        args: String,

        /// Tools this call may not use (comma separated)
        #[arg(long, value_name = "NAMES", value_delimiter = ',')]
        deny: Vec<String>,
    },

    /// Show configuration file locations and resolved values
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_call_with_deny_list() {
        let cli = Cli::parse_from([
            "toolgate", "-vv", "call", "greet", "--args", r#"{"who":"ada"}"#, "--deny", "shell,fetch",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Call { name, args, deny } => {
                assert_eq!(name, "greet");
                assert_eq!(args, r#"{"who":"ada"}"#);
                assert_eq!(deny, vec!["shell", "fetch"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_approve_requires_by() {
        assert!(Cli::try_parse_from(["toolgate", "approve", "abc"]).is_err());
        let cli = Cli::parse_from(["toolgate", "approve", "abc", "--by", "alice"]);
        assert!(matches!(cli.command, Command::Approve { ref by, .. } if by == "alice"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["toolgate", "list", "--tools-dir", "/srv/tools", "-c", "x.toml"]);
        assert_eq!(cli.tools_dir, Some(PathBuf::from("/srv/tools")));
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }
}
