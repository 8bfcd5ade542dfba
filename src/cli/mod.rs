//! CLI module for tldw.

pub mod commands;
mod output;

pub use output::Output;

use clap::{Parser, Subcommand};

/// tldw - Too Long; Didn't Watch
///
/// Fetches YouTube transcripts and produces summaries through a shared
/// job queue, with an HTTP API for pollers.
#[derive(Parser, Debug)]
#[command(name = "tldw")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "TLDW_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API together with the worker pools
    Serve {
        /// Host to bind to (defaults to server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (defaults to server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Serve the API only; leave jobs to separate worker processes
        #[arg(long)]
        no_workers: bool,
    },

    /// Run the worker pools without the HTTP API
    Worker,

    /// Create a transcript or summary
    Request {
        /// Resource kind (transcript, summary)
        kind: String,

        /// YouTube URL or video id
        video: String,

        /// Language code (defaults to languages.default_language)
        #[arg(short, long)]
        language: Option<String>,

        /// Wait until the resource is completed or failed
        #[arg(short, long)]
        wait: bool,
    },

    /// Show the current state of a transcript or summary
    Status {
        /// Resource kind (transcript, summary)
        kind: String,

        /// YouTube URL or video id
        video: String,

        /// Language code (defaults to languages.default_language)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Reset a failed or stuck resource and queue it again
    Restart {
        /// Resource kind (transcript, summary)
        kind: String,

        /// YouTube URL or video id
        video: String,

        /// Language code (defaults to languages.default_language)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Delete the transcript and summary of a video in one language
    Delete {
        /// YouTube URL or video id
        video: String,

        /// Language code (defaults to languages.default_language)
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Inspect and maintain API credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },

    /// Check system requirements and configuration
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CredentialsAction {
    /// List credentials with their health state
    List,

    /// Reactivate credentials whose cooldown has passed
    Sweep,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
