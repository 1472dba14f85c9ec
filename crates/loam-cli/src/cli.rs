use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use loam_core::sync::ResolutionStrategy;

#[derive(Parser)]
#[command(name = "loam")]
#[command(about = "Offline-first sync for notes, people and tasks")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Connection profile id (defaults to LOAM_PROFILE, then the last used profile)
    #[arg(long, global = true, value_name = "ID")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage saved connection profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Connect to a sync server and store the credential
    Connect(ConnectArgs),
    /// Show local sync state
    Status {
        /// Also connect and report the live session
        #[arg(long)]
        check: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one sync pass
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List unresolved sync conflicts
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a sync conflict
    Resolve {
        /// Conflict ID as listed by `conflicts` (`<collection>:<local id>`)
        id: String,
        /// Which version wins
        #[arg(long, value_enum)]
        strategy: StrategyArg,
        /// Merged record as a JSON object (required for `merge`)
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
    },
    /// Work with cached notes
    Note {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Work with cached people
    Person {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Work with cached tasks
    Task {
        #[command(subcommand)]
        command: RecordCommands,
    },
    /// Stay connected and sync on an interval until Ctrl-C
    Watch {
        /// Seconds between passes (defaults to the configured interval)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct ConnectArgs {
    /// Server URL; creates or updates a profile when given
    #[arg(long, value_name = "URL")]
    pub host: Option<String>,
    /// Server port override
    #[arg(long)]
    pub port: Option<u16>,
    /// Account username
    #[arg(long, requires = "host")]
    pub username: Option<String>,
    /// Account password (falls back to the stored credential)
    #[arg(long, env = "LOAM_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Display name for a new profile
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,
    /// Make this the default profile
    #[arg(long = "default")]
    pub make_default: bool,
}

#[derive(Subcommand)]
pub enum ProfileCommands {
    /// Create or update a profile without connecting
    Save {
        /// Profile ID to update (a new one is generated when omitted)
        #[arg(long)]
        id: Option<String>,
        /// Display name
        #[arg(long, value_name = "NAME")]
        name: Option<String>,
        /// Server URL
        #[arg(long, value_name = "URL")]
        host: String,
        /// Server port override
        #[arg(long)]
        port: Option<u16>,
        /// Account username
        #[arg(long)]
        username: String,
        /// Make this the default profile
        #[arg(long = "default")]
        make_default: bool,
    },
    /// List saved profiles
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a profile and its stored credential
    Delete {
        /// Profile ID
        id: String,
    },
    /// Mark a profile as the default
    Default {
        /// Profile ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum RecordCommands {
    /// Create a record, or update one with --id
    #[command(alias = "new")]
    Add {
        /// Existing record ID or unique ID prefix to update
        #[arg(long)]
        id: Option<String>,
        /// Fields as key=value pairs, or a single JSON object
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// List cached records
    List {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a cached record
    Delete {
        /// Record ID or unique ID prefix
        id: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    KeepLocal,
    KeepRemote,
    Merge,
}

impl From<StrategyArg> for ResolutionStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::KeepLocal => Self::KeepLocal,
            StrategyArg::KeepRemote => Self::KeepRemote,
            StrategyArg::Merge => Self::Merge,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
