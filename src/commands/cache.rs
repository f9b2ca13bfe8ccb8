use anyhow::Result;

use crate::cli::{CacheArgs, CacheCommand};

use super::{load_config, open_cache};

pub fn run(args: &CacheArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let cache = open_cache(&config)?;

    match args.command {
        CacheCommand::Stats => {
            let count = cache.file_count();
            let bytes = cache.total_bytes();
            println!("Cache directory: {}", config.cache.dir);
            println!("Cached files:    {count}");
            println!("Total size:      {}", format_size(bytes));
        }
        CacheCommand::Clear => {
            let count = cache.file_count();
            cache.clear_all();
            println!("Removed {count} cached file(s)");
        }
        CacheCommand::Sweep => {
            let removed = cache.sweep_expired();
            println!("Removed {removed} expired artifact(s)");
        }
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
