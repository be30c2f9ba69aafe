use std::{path::PathBuf, time::Instant};

use clap::{Parser, ValueEnum};
use rand::{Rng, seq::IteratorRandom, thread_rng};
#[cfg(feature = "rocksdb")]
use virtual_merkle::{RocksDbConfig, RocksDbDataSource};
use virtual_merkle::{
    MemoryDataSource, StorageError, VirtualDataSource, VirtualMap, VirtualMapError, Word256,
};

type Storage = Box<dyn VirtualDataSource<Word256, Word256>>;
type Tree = VirtualMap<Word256, Word256, Storage>;

#[derive(Parser, Debug)]
#[command(name = "Benchmark", about = "Virtual map benchmark", version, rename_all = "kebab-case")]
pub struct BenchmarkCmd {
    /// Number of keys in the map
    #[arg(short = 's', long = "size", default_value = "100000")]
    size: usize,
    /// Number of keys updated after construction
    #[arg(short = 'u', long = "updates", default_value = "10000")]
    updates: usize,
    /// Number of keys deleted after the updates
    #[arg(short = 'd', long = "deletes", default_value = "1000")]
    deletes: usize,
    /// Path for the benchmark database
    #[arg(short = 'p', long = "path")]
    storage_path: Option<PathBuf>,
    /// Storage backend to use at runtime: memory or rocksdb
    #[arg(long = "storage", value_enum, default_value = "memory")]
    storage: StorageKind,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StorageKind {
    Memory,
    Rocksdb,
}

fn main() -> Result<(), VirtualMapError> {
    let args = BenchmarkCmd::parse();
    assert!(args.updates <= args.size, "Cannot update more than `size`");
    assert!(args.deletes <= args.size, "Cannot delete more than `size`");

    println!(
        "Running benchmark with {} storage",
        match args.storage {
            StorageKind::Memory => "memory",
            StorageKind::Rocksdb => "rocksdb",
        }
    );

    let mut rng = thread_rng();
    let entries: Vec<(Word256, Word256)> = (0..args.size)
        .map(|i| (Word256::new(rng.gen()), Word256::from_u64(i as u64)))
        .collect();

    let storage = get_storage(args.storage_path, args.storage)?;
    let mut tree = construction(storage, &entries)?;
    update(&mut tree, &entries, args.updates)?;
    delete(&mut tree, &entries, args.deletes)?;
    snapshot_reads(&mut tree, &entries)?;
    tree.release()?;

    println!("Benchmark completed successfully");
    Ok(())
}

/// Inserts every entry into an empty map and commits it.
pub fn construction(
    storage: Storage,
    entries: &[(Word256, Word256)],
) -> Result<Tree, VirtualMapError> {
    println!("Running a construction benchmark:");
    let now = Instant::now();
    let mut tree = Tree::new(storage)?;
    for (key, value) in entries {
        tree.put(*key, *value)?;
    }
    let insert_elapsed = now.elapsed().as_secs_f32();

    let now = Instant::now();
    tree.commit()?;
    let commit_elapsed = now.elapsed().as_secs_f32();

    println!(
        "Inserted {} keys in {insert_elapsed:.1} seconds and committed them in {commit_elapsed:.1} seconds",
        entries.len()
    );
    println!("Root hash: {}\n", tree.hash()?);
    Ok(tree)
}

/// Overwrites the values of randomly chosen keys, then commits.
pub fn update(
    tree: &mut Tree,
    entries: &[(Word256, Word256)],
    updates: usize,
) -> Result<(), VirtualMapError> {
    println!("Running an update benchmark:");

    let size = tree.len();
    let mut rng = thread_rng();
    let mut update_times = Vec::with_capacity(updates);
    for (key, _) in entries.iter().choose_multiple(&mut rng, updates) {
        let value = Word256::from_u64(rng.gen());
        let now = Instant::now();
        tree.put(*key, value)?;
        update_times.push(now.elapsed().as_micros());
    }

    let now = Instant::now();
    tree.commit()?;
    let commit_elapsed = now.elapsed().as_secs_f64() * 1000_f64;

    println!(
        "The average update time measured by {updates} updates in a map with {size} keys is {:.0} μs",
        update_times.iter().sum::<u128>() as f64 / updates.max(1) as f64,
    );
    println!("Committing the updates took {commit_elapsed:.1} ms\n");
    Ok(())
}

/// Deletes randomly chosen keys, then commits.
pub fn delete(
    tree: &mut Tree,
    entries: &[(Word256, Word256)],
    deletes: usize,
) -> Result<(), VirtualMapError> {
    println!("Running a deletion benchmark:");

    let size = tree.len();
    let mut rng = thread_rng();
    let now = Instant::now();
    for (key, _) in entries.iter().choose_multiple(&mut rng, deletes) {
        tree.delete(key)?;
    }
    let delete_elapsed = now.elapsed().as_secs_f64() * 1000_f64;

    let now = Instant::now();
    tree.commit()?;
    let commit_elapsed = now.elapsed().as_secs_f64() * 1000_f64;

    println!(
        "Deleted {deletes} keys from a map with {size} keys in {delete_elapsed:.1} ms, committed in {commit_elapsed:.1} ms"
    );
    println!("Keys left: {}\n", tree.len());
    Ok(())
}

/// Freezes the map, rewrites part of the next version, and reads back from the snapshot.
pub fn snapshot_reads(
    tree: &mut Tree,
    entries: &[(Word256, Word256)],
) -> Result<(), VirtualMapError> {
    const NUM_READS: usize = 1000;

    println!("Running a snapshot read benchmark:");

    let next = tree.copy()?;
    let snapshot = std::mem::replace(tree, next);

    let mut rng = thread_rng();
    let keys: Vec<Word256> = entries
        .iter()
        .choose_multiple(&mut rng, NUM_READS)
        .into_iter()
        .map(|(key, _)| *key)
        .collect();
    for key in keys.iter().take(NUM_READS / 2) {
        tree.put(*key, Word256::ZERO)?;
    }
    tree.commit()?;

    let now = Instant::now();
    for key in keys.iter() {
        snapshot.get(key)?;
    }
    let elapsed = now.elapsed().as_micros();

    println!(
        "The average snapshot read time measured by {} reads is {:.1} μs\n",
        keys.len(),
        elapsed as f64 / keys.len().max(1) as f64,
    );
    snapshot.release()
}

#[allow(unused_variables)]
fn get_storage(
    database_path: Option<PathBuf>,
    kind: StorageKind,
) -> Result<Storage, StorageError> {
    match kind {
        StorageKind::Memory => Ok(Box::new(MemoryDataSource::<Word256, Word256>::new())),
        StorageKind::Rocksdb => {
            #[cfg(feature = "rocksdb")]
            {
                let path = database_path
                    .unwrap_or_else(|| std::env::temp_dir().join("virtual_merkle_benchmark"));
                println!("Using database path: {}", path.display());
                // start from an empty database
                if path.exists() {
                    std::fs::remove_dir_all(&path)
                        .map_err(|err| StorageError::Backend(err.into()))?;
                }
                std::fs::create_dir_all(&path).map_err(|err| StorageError::Backend(err.into()))?;
                let db = RocksDbDataSource::<Word256, Word256>::open(
                    RocksDbConfig::new(path).with_cache_size(1 << 30).with_max_open_files(2048),
                )?;
                Ok(Box::new(db))
            }
            #[cfg(not(feature = "rocksdb"))]
            {
                eprintln!("rocksdb feature not enabled; falling back to memory storage");
                Ok(Box::new(MemoryDataSource::<Word256, Word256>::new()))
            }
        },
    }
}
