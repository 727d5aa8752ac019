//! Migrate a JSON document store into an SQLite database.
//!
//! Usage: cargo run --bin relaybot-import <db.json> <bot.db>
//!
//! Subscribers, keywords and watched chats are merged into the target
//! database; records already there are kept.

use std::path::Path;

use relaybot::relay::{copy_store, JsonStore, SqliteStore, SubscriptionStore};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <db.json> <bot.db>", args[0]);
        eprintln!();
        eprintln!("Copy subscribers, keywords and watched chats from a JSON store");
        eprintln!("into an SQLite store. The SQLite file is created if missing.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  db.json  Path to the JSON store (db.txt mirror is used if missing)");
        eprintln!("  bot.db   Path to the SQLite database");
        std::process::exit(1);
    }

    let json_path = Path::new(&args[1]);
    let sqlite_path = Path::new(&args[2]);

    if !json_path.exists() && !json_path.with_extension("txt").exists() {
        eprintln!("ERROR: {} not found", json_path.display());
        std::process::exit(1);
    }

    println!("Reading JSON store from {:?}...", json_path);
    let from = match JsonStore::open(json_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
    };

    let (subscribers, chats) = match (from.subscribers(), from.watched_chats()) {
        (Ok(subscribers), Ok(chats)) => (subscribers, chats),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
    };
    println!("Subscribers in source: {}", subscribers.len());
    println!("Watched chats in source: {}", chats.len());

    println!("Opening SQLite store at {:?}...", sqlite_path);
    let to = match SqliteStore::open(sqlite_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
    };

    match copy_store(&from, &to) {
        Ok(summary) => {
            println!();
            println!("Imported:");
            println!("  {} subscribers", summary.subscribers);
            println!("  {} new keywords", summary.keywords);
            println!("  {} watched chats", summary.watched_chats);
        }
        Err(e) => {
            eprintln!("ERROR: import failed: {e}");
            std::process::exit(1);
        }
    }
}
