//! Command-line interface definitions
//!
//! Arguments are grouped by the component that consumes them: the native
//! root, the isolate (see [`IsolateConfig`]), and output/logging.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use crate::isolate::IsolateConfig;

/// Browse a native directory tree through the virtual file substrate
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Native root directory
    #[command(flatten)]
    pub root: RootConfig,

    /// Isolate configuration (rules, limits)
    #[command(flatten)]
    pub isolate: IsolateConfig,

    /// Output and logging configuration
    #[command(flatten)]
    pub output: OutputConfig,

    /// What to do with the resolved path
    #[command(subcommand)]
    pub command: Command,
}

// ============================================================================
// FUNCTIONAL GROUPS: Organized by what component consumes them
// ============================================================================

/// Native root configuration
///
/// Used by: `main()` to create the isolate root
#[derive(clap::Args, Debug, Clone)]
pub struct RootConfig {
    /// Native directory mounted as the virtual root
    #[arg(long, short = 'r', value_name = "DIR", default_value = ".")]
    pub root: PathBuf,
}

/// Output and logging configuration
///
/// Used by: `main()` (tracing subscriber)
#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Output Options")]
pub struct OutputConfig {
    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress all output except errors)
    #[arg(short, long)]
    pub quiet: bool,

    /// Print native I/O counters to stderr when done
    #[arg(long)]
    pub stats: bool,
}

impl OutputConfig {
    /// Log level implied by `--quiet` / `--verbose`
    #[must_use]
    pub const fn level(&self) -> tracing::Level {
        if self.quiet {
            return tracing::Level::ERROR;
        }
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/// Subcommands, each taking a slash-separated virtual path
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the entries of a directory
    Ls {
        /// Virtual path, relative to the root
        #[arg(default_value = "/")]
        vpath: String,
    },
    /// Write the contents of a binary file to stdout
    Cat {
        /// Virtual path, relative to the root
        vpath: String,
    },
    /// Report how far a path resolves
    Resolve {
        /// Virtual path, relative to the root
        vpath: String,
    },
}

impl Command {
    /// Virtual path the command operates on
    #[must_use]
    pub fn vpath(&self) -> &str {
        match self {
            Self::Ls { vpath } | Self::Cat { vpath } | Self::Resolve { vpath } => vpath,
        }
    }
}

// ============================================================================
// IMPLEMENTATION: Validation
// ============================================================================

impl Args {
    /// Validate command-line arguments
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - The root does not exist or is not a directory
    /// - `--read-max` or `--stream-buffer-max` is zero
    /// - Both --quiet and --verbose options are used
    pub fn validate(&self) -> Result<()> {
        if !self.root.root.is_dir() {
            anyhow::bail!(
                "Root must be an existing directory: {}",
                self.root.root.display()
            );
        }

        if self.isolate.read_max == 0 {
            anyhow::bail!("--read-max must be greater than zero");
        }

        if self.isolate.stream_buffer_max == 0 {
            anyhow::bail!("--stream-buffer-max must be greater than zero");
        }

        if self.output.quiet && self.output.verbose > 0 {
            anyhow::bail!("Cannot use both --quiet and --verbose options");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    use super::*;
    use tempfile::TempDir;

    fn create_test_args(root: PathBuf) -> Args {
        Args {
            root: RootConfig { root },
            isolate: IsolateConfig::default(),
            output: OutputConfig {
                verbose: 0,
                quiet: false,
                stats: false,
            },
            command: Command::Ls { vpath: "/".into() },
        }
    }

    #[test]
    fn test_validate_with_existing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let args = create_test_args(temp_dir.path().to_path_buf());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validate_with_nonexistent_root() {
        let args = create_test_args(PathBuf::from("/nonexistent/path"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_quiet_and_verbose() {
        let temp_dir = TempDir::new().unwrap();
        let mut args = create_test_args(temp_dir.path().to_path_buf());
        args.output.quiet = true;
        args.output.verbose = 2;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_parse_rules_and_subcommand() {
        let args = Args::try_parse_from([
            "strata",
            "--root",
            "/srv",
            "--rule",
            "log=bin.r",
            "--rule",
            ".txt=bin.rw",
            "-vv",
            "cat",
            "docs/readme.txt",
        ])
        .unwrap();

        assert_eq!(args.root.root, PathBuf::from("/srv"));
        assert_eq!(args.isolate.rules.len(), 2);
        assert_eq!(args.isolate.rules[1].ext, "txt");
        assert_eq!(args.output.level(), tracing::Level::DEBUG);
        assert_eq!(
            args.command,
            Command::Cat {
                vpath: "docs/readme.txt".into()
            }
        );
    }

    #[test]
    fn test_malformed_rule_is_rejected() {
        let parsed = Args::try_parse_from(["strata", "--rule", "nodriver", "ls"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_ls_defaults_to_root() {
        let args = Args::try_parse_from(["strata", "ls"]).unwrap();
        assert_eq!(args.command.vpath(), "/");
        assert_eq!(args.output.level(), tracing::Level::WARN);
    }
}
