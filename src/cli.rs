use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Dataset path or http(s) URL. Overrides `dataset` in config.yaml
    #[clap(long, global = true)]
    pub dataset: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Delete the persisted embedding collection
    Clear {
        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search the dataset by meaning
    Search {
        query: String,

        /// Result page to show (1-based)
        #[clap(short, long, default_value = "1")]
        page: usize,

        /// Print the result page as json
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Start the http daemon
    Serve {},

    /// Re-encode the whole dataset, ignoring any cached embeddings
    Reindex {},

    /// Manage the embedding cache
    Cache {
        #[clap(subcommand)]
        action: CacheAction,
    },

    /// Show recent search queries
    History {
        /// Forget all recorded queries
        #[clap(long, default_value = "false")]
        clear: bool,
    },

    /// Translate texts through the configured translation servers
    Translate {
        #[clap(required = true)]
        texts: Vec<String>,
    },
}
