//! chainreduce CLI — inspect engine defaults and storage backends.
//!
//! Usage:
//! ```bash
//! chainreduce info
//! chainreduce version
//! ```

use std::env;
use std::process;

use chainreduce_core::{CheckerConfig, ReduceConfig};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "info" => cmd_info(),
        "version" | "--version" | "-V" => {
            println!("chainreduce {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("chainreduce {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-tolerant entity reduction engine for chain indexers\n");
    println!("USAGE:");
    println!("    chainreduce <COMMAND>\n");
    println!("COMMANDS:");
    println!("    info     Show engine defaults");
    println!("    version  Print version");
    println!("    help     Print this help");
}

fn cmd_info() {
    let reduce = ReduceConfig::default();
    let checker = CheckerConfig::default();
    println!("ChainReduce v{}", env!("CARGO_PKG_VERSION"));
    println!("  Confirmation depth: {} blocks", reduce.confirmation_depth);
    println!(
        "  Revertable window cap: {} events/entity",
        reduce.max_revertable_events
    );
    println!(
        "  Reduce pool: {} workers, {} queued batches each",
        reduce.worker_count, reduce.queue_depth
    );
    println!("  Checker stale cutoff: {} blocks", checker.stale_after);
    println!(
        "  Checker buffer capacity: {} blocks",
        checker.buffer_capacity
    );
    println!("  Storage backends: memory, SQLite (feature: sqlite), Postgres (feature: postgres)");
    println!("  Domains: balance, ownership, item, order (chainreduce-market)");
}
