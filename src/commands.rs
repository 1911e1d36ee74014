use crate::cli::*;
use anyhow::{bail, Context};
use claimchain::{
    dump, BlockFile, ChainConfig, ChangeSummary, ClaimTrie, Converter, ConverterConfig,
    FileChangeStore, MemoryClaimTrie, ReplayConfig, Replayer,
};
use std::fs;
use tracing::info;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = ChainConfig {
        data_dir: cli.data_dir,
        network: cli.network,
        ..Default::default()
    };
    match cli.command {
        Command::Dump(args) => cmd_dump(&config, args),
        Command::Replay(args) => cmd_replay(&config, args),
        Command::Convert(args) => cmd_convert(&config, args),
    }
}

fn open_store(config: &ChainConfig) -> anyhow::Result<FileChangeStore> {
    let path = config.change_log_path();
    FileChangeStore::open(&path)
        .with_context(|| format!("opening change log at {}", path.display()))
}

/// Open the change log without creating it.
fn open_existing_store(config: &ChainConfig) -> anyhow::Result<FileChangeStore> {
    let path = config.change_log_path();
    FileChangeStore::open_existing(&path)
        .with_context(|| format!("opening change log at {}", path.display()))
}

fn open_blocks(config: &ChainConfig) -> anyhow::Result<BlockFile> {
    let path = config.blocks_path();
    if !path.exists() {
        bail!("no block file at {}", path.display());
    }
    BlockFile::open(&path).with_context(|| format!("opening block file at {}", path.display()))
}

fn cmd_dump(config: &ChainConfig, args: DumpArgs) -> anyhow::Result<()> {
    let store = open_existing_store(config).context("dump")?;

    for batch in dump(&store, args.from, args.to) {
        let (height, changes) = batch.context("dump")?;
        match args.format {
            OutputFormat::Text => {
                println!("height {} ({} changes)", height, changes.len());
                for change in &changes {
                    println!("  {}", change);
                }
            }
            OutputFormat::Json => {
                for change in &changes {
                    let line = serde_json::to_string(&ChangeSummary::from_change(change))
                        .with_context(|| format!("dump: encoding height {}", height))?;
                    println!("{}", line);
                }
            }
        }
    }
    Ok(())
}

fn cmd_replay(config: &ChainConfig, args: ReplayArgs) -> anyhow::Result<()> {
    if args.from >= args.to {
        bail!("replay: --from ({}) must be below --to ({})", args.from, args.to);
    }

    let store = open_existing_store(config).context("replay")?;
    let blocks = open_blocks(config).context("replay")?;

    let trie_path = config.trie_path();
    if trie_path.exists() {
        fs::remove_dir_all(&trie_path)
            .with_context(|| format!("replay: wiping {}", trie_path.display()))?;
    }

    let mut trie = MemoryClaimTrie::open(&trie_path)
        .with_context(|| format!("replay: opening trie at {}", trie_path.display()))?;

    let mut replayer = Replayer::new(&store, &blocks, &mut trie, ReplayConfig::default());
    if args.from > 0 {
        info!(height = args.from, "rebuilding trie up to replay start");
        replayer
            .replay(0, args.from)
            .with_context(|| format!("replay: rebuilding up to height {}", args.from))?;
    }
    let summary = replayer
        .replay(args.from, args.to)
        .with_context(|| format!("replay: {}..{}", args.from, args.to))?;

    trie.close().context("replay: closing trie")?;

    println!(
        "replayed {}..{}: {} changes, commitment {}",
        summary.from, summary.to, summary.changes_applied, summary.final_hash
    );
    Ok(())
}

fn cmd_convert(config: &ChainConfig, args: ConvertArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let blocks = open_blocks(config)?;

    let converter_config = ConverterConfig {
        to_height: args.height,
        ..Default::default()
    };
    let summary = Converter::new(&blocks, &store, converter_config)
        .run()
        .with_context(|| match args.height {
            Some(height) => format!("convert: up to height {}", height),
            None => "convert: up to tip".to_string(),
        })?;

    println!(
        "converted 0..={}: {} blocks, {} batches, {} changes in {:.1?}",
        summary.to_height,
        summary.stats.blocks_processed,
        summary.stats.batches_saved,
        summary.stats.changes_saved,
        summary.elapsed
    );
    Ok(())
}
