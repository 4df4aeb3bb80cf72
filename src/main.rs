use anyhow::Result;
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use guise::{
    commands,
    paths::Paths,
    ui::{ColorMode, Ui},
};

/// Overrides the -v flags with a full filter, e.g. `GUISE_LOG=guise=debug`
const LOG_ENV: &str = "GUISE_LOG";

#[derive(Parser)]
#[command(name = "guise")]
#[command(about = "Guise - switch between stored identity profiles for your CLI tools")]
#[command(version)]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// When to use colors
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: ColorMode,

    /// Log more to stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List managed tools and their active profiles
    Tools,

    /// List the profiles of a tool
    List {
        /// Tool id (see `guise tools`)
        tool: String,
    },

    /// Show the active profile of every tool
    Current,

    /// Save a new profile and make it active
    ///
    /// The first profile of a tool captures its current configuration;
    /// later profiles start blank.
    Create {
        /// Tool id
        tool: String,

        /// Display name for the profile
        name: String,
    },

    /// Switch a tool to a profile
    Use {
        /// Tool id
        tool: String,

        /// Profile id or unique name; prompts when omitted
        profile: Option<String>,
    },

    /// Delete a profile and its stored snapshot
    Delete {
        /// Tool id
        tool: String,

        /// Profile id or unique name
        profile: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Change a profile's display name
    Rename {
        /// Tool id
        tool: String,

        /// Profile id or unique name
        profile: String,

        /// New display name
        new_name: String,
    },

    /// Show details about a profile
    Inspect {
        /// Tool id
        tool: String,

        /// Profile id or unique name
        profile: String,
    },

    /// Run diagnostics on the guise setup
    Doctor {
        /// Clear dangling active pointers and abandoned staging directories
        #[arg(long)]
        fix: bool,
    },

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "guise", &mut std::io::stdout());
        return Ok(());
    }

    let paths = Paths::new()?;
    let ui = Ui::new(cli.color, cli.no_color);

    match cli.command {
        Commands::Tools => commands::tools(&paths, &ui),
        Commands::List { tool } => commands::list(&paths, &tool, &ui),
        Commands::Current => commands::current(&paths, &ui),
        Commands::Create { tool, name } => commands::create(&paths, &tool, &name, &ui),
        Commands::Use { tool, profile } => {
            commands::use_profile(&paths, &tool, profile.as_deref(), &ui)
        }
        Commands::Delete {
            tool,
            profile,
            force,
        } => commands::delete(&paths, &tool, &profile, force, &ui),
        Commands::Rename {
            tool,
            profile,
            new_name,
        } => commands::rename(&paths, &tool, &profile, &new_name, &ui),
        Commands::Inspect { tool, profile } => commands::inspect(&paths, &tool, &profile, &ui),
        Commands::Doctor { fix } => commands::doctor(&paths, fix, &ui),
        Commands::Completions { .. } => Ok(()),
    }
}
