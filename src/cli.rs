use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use convergence::RunMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleetward")]
#[command(author = "Fleetward Developers")]
#[command(version)]
#[command(about = "Audit, preview and converge a fleet of machines", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Topology file (TOML or JSON)
    #[arg(short, long, global = true, env = "FLEETWARD_TOPOLOGY")]
    pub topology: Option<PathBuf>,

    /// Number of hosts to run concurrently
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,

    /// Per-command timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Print reports as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Run commands through the local shell instead of SSH
    #[arg(long, global = true)]
    pub local: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check hosts against policy without changing anything
    Audit(RunArgs),

    /// Show what config would change
    DryRun(RunArgs),

    /// Converge hosts to policy
    Config(RunArgs),

    /// List the compiled unit sequence of a host
    Units {
        /// Machine label
        host: String,
    },

    /// Render a host's units as a standalone shell script
    Script {
        /// Machine label
        host: String,

        /// Protocol the script runs
        #[arg(short, long, value_enum, default_value = "audit")]
        mode: ModeArg,
    },

    /// Load the topology and compile every host without connecting
    Validate,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Run Arguments
// ============================================================================

#[derive(Args, Clone, Default)]
pub struct RunArgs {
    /// Only run on this machine (default: every managed machine)
    #[arg(long)]
    pub host: Option<String>,

    /// Only run units whose label contains this substring
    #[arg(short, long)]
    pub only: Option<String>,

    /// Stop starting new units after this many seconds
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Skip confirmation prompts
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Audit,
    DryRun,
    Config,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Audit => Self::Audit,
            ModeArg::DryRun => Self::DryRun,
            ModeArg::Config => Self::Config,
        }
    }
}
