//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `troop_core` linkage and
//!   schema bootstrap.
//! - Keep output deterministic for quick local sanity checks.

use troop_core::db::migrations::latest_version;
use troop_core::db::open_db_in_memory;

fn main() {
    println!("troop_core version={}", troop_core::core_version());
    match open_db_in_memory() {
        Ok(_conn) => println!("troop_core schema=v{} status=ok", latest_version()),
        Err(err) => {
            eprintln!("troop_core schema bootstrap failed: {err}");
            std::process::exit(1);
        }
    }
}
