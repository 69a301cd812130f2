//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "memorag",
    version,
    about = "Conversational ESG indicator analyst with session memory",
    long_about = "memorag answers natural-language questions about company ESG indicators. \
                  It extracts the company, year and indicator from a question, retrieves matching \
                  observations, reranks them by how well they fit, and remembers earlier turns so \
                  follow-up questions can omit what was already said."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/esg-memorag/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply (e.g., "offline", "llm")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a single question
    Ask {
        /// Question to ask
        question: String,

        /// Session to continue (defaults to "default")
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Answer with the extractive summary even if generation is configured
        #[arg(long)]
        basic: bool,

        /// Include extraction, retrieval and ranking details
        #[arg(long)]
        debug: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Start an interactive question session
    Shell {
        /// Session name (defaults to a new random id)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Inspect or clear conversation memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Import observations from a JSON-lines file
    Import {
        /// File with one observation object per line
        file: PathBuf,
    },

    /// Show observation store statistics
    Stats {
        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum MemoryAction {
    /// Show the memory report for a session
    Report {
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Clear a session's history
    Clear {
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Also zero the global pattern counters
        #[arg(long)]
        reset_patterns: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

/// Commands accepted inside `memorag shell`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Help,
    Memory,
    Clear,
    Mode,
    Debug,
    Quit,
    Empty,
    Query(String),
}

impl ShellCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed.to_lowercase().as_str() {
            "" => ShellCommand::Empty,
            "help" | "?" => ShellCommand::Help,
            "memory" => ShellCommand::Memory,
            "clear" => ShellCommand::Clear,
            "mode" => ShellCommand::Mode,
            "debug" => ShellCommand::Debug,
            "quit" | "exit" | "q" => ShellCommand::Quit,
            _ => ShellCommand::Query(trimmed.to_string()),
        }
    }
}

pub const SHELL_HELP: &str = "\
Commands:
  help    show this help
  memory  show the memory report for this session
  clear   forget this session's history
  mode    switch between generated and extractive answers
  debug   toggle extraction and ranking details
  quit    leave the shell
Anything else is asked as a question.";

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
