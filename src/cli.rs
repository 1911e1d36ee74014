use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "claimchain",
    about = "Convert ledger blocks into a claim change log and replay it",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Base data directory
    #[arg(long, global = true, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Network whose claim databases to use
    #[arg(long, global = true, default_value = "mainnet")]
    pub network: String,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print stored change batches in a height range
    Dump(DumpArgs),
    /// Rebuild the claim trie from the change log and verify it
    Replay(ReplayArgs),
    /// Scan blocks into the change log
    Convert(ConvertArgs),
}

#[derive(Args)]
pub struct DumpArgs {
    #[arg(long, default_value_t = 0)]
    pub from: u32,
    #[arg(long)]
    pub to: u32,
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args)]
pub struct ReplayArgs {
    #[arg(long, default_value_t = 0)]
    pub from: u32,
    #[arg(long)]
    pub to: u32,
}

#[derive(Args)]
pub struct ConvertArgs {
    /// Last height to convert; defaults to the chain tip
    #[arg(long)]
    pub height: Option<u32>,
}
