use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use crate::config::Config;
use crate::engine::StorageEngine;
use crate::error::{Result, StorageError};
use crate::keyclass::{KeyClass, MAX_KEY_LEN};
use crate::names::Topology;

#[derive(Parser)]
#[command(name = "triekv")]
#[command(about = "Sharded key-value store indexed by radix tries", long_about = None)]
pub struct Command {
    #[command(subcommand)]
    pub command: Commands,
}

/// Built-in key alphabets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Charset {
    Numeric,
    Alnum,
    Hex,
    Ipv4,
    Ipv6,
    Ip46,
}

impl Charset {
    pub fn key_class(self) -> KeyClass {
        match self {
            Charset::Numeric => KeyClass::numeric(),
            Charset::Alnum => KeyClass::alnum(),
            Charset::Hex => KeyClass::hex(),
            Charset::Ipv4 => KeyClass::ipv4(),
            Charset::Ipv6 => KeyClass::ipv6(),
            Charset::Ip46 => KeyClass::ip46(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize storage at specified path
    Init {
        /// Data directory path
        #[arg(short, long)]
        path: PathBuf,

        /// Shard name partition, one directory level per word
        #[arg(short, long = "word", required = true, num_args = 1..)]
        word: Vec<u8>,

        /// Key alphabet
        #[arg(long, value_enum, default_value = "alnum")]
        charset: Charset,

        /// Custom key alphabet, overrides --charset
        #[arg(long)]
        chars: Option<String>,

        /// Value cache capacity
        #[arg(long, default_value = "1000000")]
        value_cache: usize,
    },

    /// List stored keys
    List {
        /// Print values next to keys
        #[arg(long)]
        value: bool,

        /// Only print the number of keys
        #[arg(long)]
        count: bool,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Put a key-value pair
    Put {
        /// Key to store
        key: String,

        /// Value to store
        value: String,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Get value for a key
    Get {
        /// Key to retrieve
        key: String,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Delete a key
    Delete {
        /// Key to delete
        key: String,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Delete every key with a prefix
    Trim {
        /// Key prefix
        prefix: String,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Force garbage collection of every shard
    Gc {
        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },

    /// Run benchmark
    Bench {
        /// Number of keys
        #[arg(short, long, default_value = "100000")]
        keys: u64,

        /// Read percentage (0-100)
        #[arg(short, long, default_value = "70")]
        read_pct: u8,

        /// Write percentage (0-100)
        #[arg(short, long, default_value = "30")]
        write_pct: u8,

        /// Duration in seconds
        #[arg(short, long, default_value = "60")]
        duration: u64,

        /// Data directory path
        #[arg(short, long, default_value = "./data")]
        path: PathBuf,
    },
}

pub fn execute_command(cmd: Command) -> Result<()> {
    match cmd.command {
        Commands::Init { path, word, charset, chars, value_cache } => {
            execute_init_command(path, word, charset, chars, value_cache)
        }
        Commands::List { value, count, path } => {
            execute_list_command(value, count, path)
        }
        Commands::Put { key, value, path } => {
            execute_put_command(key, value, path)
        }
        Commands::Get { key, path } => {
            execute_get_command(key, path)
        }
        Commands::Delete { key, path } => {
            execute_delete_command(key, path)
        }
        Commands::Trim { prefix, path } => {
            execute_trim_command(prefix, path)
        }
        Commands::Gc { path } => {
            execute_gc_command(path)
        }
        Commands::Bench { keys, read_pct, write_pct, duration, path } => {
            execute_bench_command(keys, read_pct, write_pct, duration, path)
        }
    }
}

fn execute_init_command(
    path: PathBuf,
    word: Vec<u8>,
    charset: Charset,
    chars: Option<String>,
    value_cache: usize,
) -> Result<()> {
    let key_class = match &chars {
        Some(chars) => KeyClass::new(MAX_KEY_LEN, chars)?,
        None => charset.key_class(),
    };
    let topology = Topology::new(word, key_class)?;

    let config = Config::new(path.clone()).with_value_cache_size(value_cache);
    config.validate()?;

    println!("Initializing triekv storage at: {}", path.display());
    StorageEngine::init(&path, &topology)?;
    println!("  ✓ Created name directory");

    let config_path = path.join("config.json");
    let config_json = serde_json::to_string_pretty(&config)?;
    std::fs::write(&config_path, config_json)?;
    println!("  ✓ Created configuration file: {}", config_path.display());

    println!("\nConfiguration:");
    println!("  Word partition: {:?}", topology.word());
    println!(
        "  Alphabet: {} ({} characters)",
        topology.key_class().characters().collect::<String>(),
        topology.key_class().alphabet_len()
    );
    println!("  Possible shards: {}", topology.shard_space().unwrap_or(u64::MAX));
    println!("  Value cache: {} entries", config.value_cache_size);
    println!("\nStorage initialized successfully!");

    Ok(())
}

fn open_engine(path: PathBuf, readonly: bool) -> Result<StorageEngine> {
    let config = load_config_from_path(path)?.with_readonly(readonly);
    StorageEngine::open_existing(config)
}

fn execute_list_command(value: bool, count: bool, path: PathBuf) -> Result<()> {
    let mut engine = open_engine(path, true)?;
    let keys = engine.keys().collect::<Result<Vec<_>>>()?;

    if count {
        println!("{}", keys.len());
        return Ok(());
    }
    for key in keys {
        if value {
            let stored = engine.get(&key)?.unwrap_or_default();
            println!("{}\t{}", key, String::from_utf8_lossy(&stored));
        } else {
            println!("{}", key);
        }
    }
    Ok(())
}

fn execute_put_command(key: String, value: String, path: PathBuf) -> Result<()> {
    let mut engine = open_engine(path, false)?;
    engine.put(&key, value.as_bytes())?;
    println!("✓ Put key: {}", key);
    engine.close()
}

fn execute_get_command(key: String, path: PathBuf) -> Result<()> {
    let mut engine = open_engine(path, true)?;
    match engine.get(&key)? {
        Some(value) => {
            println!("{}", String::from_utf8_lossy(&value));
        }
        None => {
            println!("Key not found: {}", key);
        }
    }
    Ok(())
}

fn execute_delete_command(key: String, path: PathBuf) -> Result<()> {
    let mut engine = open_engine(path, false)?;
    if engine.delete(&key)? {
        println!("✓ Deleted key: {}", key);
    } else {
        println!("Key not found: {}", key);
    }
    engine.close()
}

fn execute_trim_command(prefix: String, path: PathBuf) -> Result<()> {
    let mut engine = open_engine(path, false)?;
    let removed = engine.trim(&prefix)?;
    println!("✓ Trimmed {} keys with prefix: {}", removed, prefix);
    engine.close()
}

fn execute_gc_command(path: PathBuf) -> Result<()> {
    let mut engine = open_engine(path, false)?;
    let compacted = engine.force_gc()?;
    println!("✓ Compacted {} shards", compacted);
    engine.close()
}

/// Key number `n` spelled in `alphabet`, least significant digit first so
/// consecutive keys land in different shards.
fn bench_key(mut n: u64, alphabet: &[u8], width: usize) -> String {
    let base = alphabet.len() as u64;
    (0..width)
        .map(|_| {
            let digit = alphabet[(n % base) as usize] as char;
            n /= base;
            digit
        })
        .collect()
}

fn execute_bench_command(
    keys: u64,
    read_pct: u8,
    write_pct: u8,
    duration: u64,
    path: PathBuf,
) -> Result<()> {
    use rand::Rng;
    use std::io::Write;
    use std::time::{Duration, Instant};

    if u16::from(read_pct) + u16::from(write_pct) != 100 {
        return Err(StorageError::ConfigError(format!(
            "Read and write percentages must sum to 100 (got {})",
            u16::from(read_pct) + u16::from(write_pct)
        )));
    }
    if keys == 0 {
        return Err(StorageError::ConfigError("Benchmark needs at least one key".to_string()));
    }

    println!("=== triekv Benchmark ===");
    println!("Configuration:");
    println!("  Total keys: {}", keys);
    println!("  Read percentage: {}%", read_pct);
    println!("  Write percentage: {}%", write_pct);
    println!("  Duration: {} seconds", duration);
    println!("  Data path: {}", path.display());
    println!();

    let mut engine = open_engine(path, false)?;
    let alphabet = engine.key_class().alphabet();
    let width = engine.topology().name_len() + 8;

    println!("Populating initial data...");
    for i in 0..keys {
        let key = bench_key(i, &alphabet, width);
        let value = format!("bench_value_{:010}", i);
        engine.put(&key, value.as_bytes())?;

        if (i + 1) % 10000 == 0 {
            println!("  Populated {} / {} keys", i + 1, keys);
        }
    }
    println!("✓ Initial data populated\n");
    println!("Running benchmark...");

    let start_time = Instant::now();
    let duration_secs = Duration::from_secs(duration);
    let mut rng = rand::thread_rng();
    let mut operation_count = 0u64;
    let mut read_count = 0u64;
    let mut write_count = 0u64;

    while start_time.elapsed() < duration_secs {
        let key_idx = rng.gen_range(0..keys);
        let key = bench_key(key_idx, &alphabet, width);

        if rng.gen_range(0..100) < read_pct {
            let _ = engine.get(&key)?;
            read_count += 1;
        } else {
            let value = format!("updated_value_{:010}_{}", key_idx, operation_count);
            engine.put(&key, value.as_bytes())?;
            write_count += 1;
        }

        operation_count += 1;

        if operation_count % 10000 == 0 {
            let elapsed = start_time.elapsed().as_secs_f64();
            let ops_per_sec = operation_count as f64 / elapsed;
            print!("\r  Operations: {} | Throughput: {:.0} ops/sec", operation_count, ops_per_sec);
            std::io::stdout().flush()?;
        }
    }

    println!("\n\n=== Benchmark Results ===");

    let elapsed = start_time.elapsed().as_secs_f64();
    let total = operation_count.max(1) as f64;
    println!("Duration: {:.2} seconds", elapsed);
    println!("Total operations: {}", operation_count);
    println!("  Reads: {} ({:.1}%)", read_count, read_count as f64 / total * 100.0);
    println!("  Writes: {} ({:.1}%)", write_count, write_count as f64 / total * 100.0);
    println!("Throughput: {:.0} ops/sec", operation_count as f64 / elapsed);
    println!();

    let report = engine.metrics().report();

    println!("Latency Percentiles (microseconds):");
    for (operation, (p50, p95, p99)) in &report.operation_latencies {
        println!("  {}:", operation);
        println!("    p50: {:.2} µs", p50);
        println!("    p95: {:.2} µs", p95);
        println!("    p99: {:.2} µs", p99);
    }
    println!();

    println!("System Metrics:");
    println!("  fsync calls: {}", report.fsync_count);
    println!("  Value cache hit ratio: {:.1}%", report.cache_hit_ratio() * 100.0);
    println!("  Shard opens: {}", report.shard_opens);
    println!("  GC runs: {}", report.gc_runs);

    engine.close()
}

fn load_config_from_path(data_dir: PathBuf) -> Result<Config> {
    let config_path = data_dir.join("config.json");

    if config_path.exists() {
        let config_json = std::fs::read_to_string(&config_path)?;
        let mut config: Config = serde_json::from_str(&config_json)?;
        config.data_dir = data_dir;
        Ok(config)
    } else {
        Err(StorageError::ConfigError(
            format!("Configuration file not found at {}. Run 'triekv init --path {} --word N' first.",
                config_path.display(), data_dir.display())
        ))
    }
}
