//! recordflow command line

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use recordflow_core::builder::{self, DatasetInfo};
use recordflow_core::config::{init_tracing, Settings};
use recordflow_core::loader::{DataLoader, DataLoaderConfig};
use recordflow_core::manifest::{prepare_from_manifest, Manifest};
use recordflow_core::sampler::{IndexSampler, SamplerOptions, ShardOptions};
use recordflow_core::source::RandomAccessDataSource;
use recordflow_core::storage::FileFormat;

/// Prepare and read random-access record datasets
#[derive(Parser, Debug)]
#[command(name = "recordflow")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Root directory of prepared datasets [env: RECORDFLOW_DATA_DIR]
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prepare datasets described by a JSON manifest
    Build {
        /// Manifest file
        #[arg(long)]
        manifest: PathBuf,
        /// Output file format
        #[arg(long, default_value_t = FileFormat::RecordFile)]
        file_format: FileFormat,
        /// Record sets to build; all when omitted
        #[arg(long, num_args = 0..)]
        record_sets: Vec<String>,
        /// Output directory; defaults to the data dir
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// JSON object mapping file names to local paths
        #[arg(long)]
        mapping: Option<String>,
    },
    /// Show the splits of a prepared dataset
    Info {
        name: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// Print records of one split as JSON lines
    Read {
        name: String,
        #[arg(long, default_value = "train")]
        split: String,
        #[arg(long)]
        version: Option<String>,
        /// Shuffle with `--seed`
        #[arg(long)]
        shuffle: bool,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 1)]
        num_epochs: u64,
        /// Stop after this many records
        #[arg(long)]
        num_records: Option<usize>,
        /// Loader workers [env: RECORDFLOW_WORKER_COUNT]
        #[arg(long)]
        worker_count: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = match cli.data_dir {
        Some(dir) => Settings::from_env().with_data_dir(dir),
        None => Settings::from_env(),
    };
    init_tracing(&settings.log_filter);

    match cli.command {
        Command::Build {
            manifest,
            file_format,
            record_sets,
            out_dir,
            mapping,
        } => {
            let out_dir = out_dir.unwrap_or_else(|| settings.data_dir.clone());
            let manifest = Manifest::load(&manifest)?;
            info!("Building {} into {}", manifest.name, out_dir.display());

            let infos = tokio::task::spawn_blocking(move || {
                prepare_from_manifest(&manifest, &record_sets, file_format, &out_dir, mapping.as_deref())
            })
            .await??;
            for info in &infos {
                print_info(info);
            }
        }
        Command::Info { name, version } => {
            let info = builder::load_info(&name, &settings.data_dir, version.as_deref())?;
            print_info(&info);
        }
        Command::Read {
            name,
            split,
            version,
            shuffle,
            seed,
            num_epochs,
            num_records,
            worker_count,
            batch_size,
        } => {
            let mut sources = builder::data_sources(&name, &settings.data_dir, version.as_deref())?;
            let available: Vec<String> = sources.keys().cloned().collect();
            let source = sources.remove(&split).ok_or_else(|| {
                recordflow_core::RecordFlowError::SplitNotFound {
                    dataset: name.clone(),
                    split: split.clone(),
                    available,
                }
            })?;

            let mut options = SamplerOptions::new(source.len())
                .num_epochs(Some(num_epochs))
                .shard(ShardOptions::from_env(false)?);
            if shuffle {
                options = options.shuffle(seed);
            }

            let mut config = DataLoaderConfig::default().worker_count(worker_count.unwrap_or(settings.worker_count));
            if let Some(batch_size) = batch_size {
                config = config.batch_size(batch_size);
            }

            let source: Arc<dyn RandomAccessDataSource> = source;
            let mut loader = DataLoader::new(source, IndexSampler::new(options)?, Vec::new(), config)?;

            let limit = num_records.unwrap_or(usize::MAX);
            let mut printed = 0usize;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            'outer: while let Some(batch) = loader.next_batch().await? {
                for record in &batch.records {
                    if printed >= limit {
                        break 'outer;
                    }
                    writeln!(out, "{}", record.to_json())?;
                    printed += 1;
                }
            }
            drop(out);
            loader.shutdown().await;
            info!("Read {} records from {}/{}", printed, name, split);
        }
    }

    Ok(())
}

fn print_info(info: &DatasetInfo) {
    println!("{} {} ({})", info.name, info.version, info.file_format);
    for split in info.splits.values() {
        println!(
            "  {:<12} {:>10} records {:>4} shards {:>12} bytes",
            split.name,
            split.num_records(),
            split.shards.len(),
            split.num_bytes()
        );
    }
}
