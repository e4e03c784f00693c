use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cogito-ingest")]
#[command(author, version, about = "Media-ingestion pipeline for the Cogito knowledge-base bot", long_about = None)]
pub struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Feed local files and video links through the pipeline and wait for the results
    Ingest {
        /// Telegram user id the documents belong to
        #[arg(short, long)]
        owner: i64,

        /// Subscription tier of the owner (admin, ultra, premium, free, basic)
        #[arg(short, long, default_value = "basic")]
        tier: String,

        /// Local photo or text files
        #[arg(value_name = "PATH")]
        paths: Vec<String>,

        /// Video links, submitted one by one
        #[arg(short, long = "link", value_name = "URL")]
        links: Vec<String>,
    },

    /// Print a document and its status
    Status {
        /// Document id
        document_id: i64,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Re-enqueue unfinished jobs from the journal and process them
    Recover,

    /// Resubmit a failed document, or a pending one left without a job
    Retry {
        /// Document id
        document_id: i64,

        #[arg(short, long, default_value = "basic")]
        tier: String,
    },

    /// Print pipeline metrics in the Prometheus text format
    Metrics,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
