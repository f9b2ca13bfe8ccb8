use anyhow::Result;
use std::env;

use crate::cli::DoctorArgs;
use crate::config_discovery;
use crate::preflight::probe_interpreter;

use super::{load_config, open_cache};

pub fn run(args: &DoctorArgs) -> Result<()> {
    println!("🔍 Tooldeck Doctor - Environment Check\n");

    let mut all_ok = true;

    // Check 1: configuration
    let discovered = env::current_dir()
        .ok()
        .and_then(|dir| config_discovery::discover_config(&dir).ok().flatten());
    match (&args.config, &discovered) {
        (Some(path), _) => println!("✅ Configuration (explicit): {path}"),
        (None, Some(path)) => println!("✅ Configuration found: {}", path.display()),
        (None, None) => {
            println!("ℹ️  No tooldeck.toml found, defaults in effect");
        }
    }
    let config = load_config(&args.config)?;

    // Check 2: artifact cache
    match open_cache(&config) {
        Ok(cache) => {
            println!("✅ Cache directory writable: {}", config.cache.dir);
            if args.verbose {
                println!("   Cached files: {}", cache.file_count());
                println!("   Total bytes:  {}", cache.total_bytes());
            }
        }
        Err(e) => {
            println!("❌ Cache directory unusable: {e:#}");
            all_ok = false;
        }
    }

    // Check 3: interpreter runtime
    match probe_interpreter(&config.interpreter) {
        Ok(version) => println!("✅ Interpreter available: {version}"),
        Err(e) => {
            println!("❌ Interpreter unavailable: {e:#}");
            println!("   Install {} or set [interpreter] in tooldeck.toml", config.interpreter.program);
            all_ok = false;
        }
    }

    // Check 4: data endpoint configuration
    match &config.endpoint {
        Some(endpoint) => {
            println!("✅ Data endpoint configured: {}:{}", endpoint.host, endpoint.port)
        }
        None => {
            println!("ℹ️  No data endpoint configured (tools requiring one will fail pre-flight)")
        }
    }

    // Check 5: catalog configuration
    println!("✅ Catalog URL: {}", config.catalog.url);

    println!();
    if all_ok {
        println!("Environment looks good");
    } else {
        println!("⚠️  Problems found, see above");
    }

    Ok(())
}
