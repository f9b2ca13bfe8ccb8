use anyhow::{bail, Result};

use crate::cli::PreflightArgs;
use crate::preflight::{PreflightValidator, Remediation, Requirements};

use super::{load_config, open_cache};

pub fn run(args: &PreflightArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let cache = open_cache(&config)?;

    let validator = PreflightValidator::new(&cache, &config.interpreter);
    let requirements = Requirements {
        script_key: args.script.clone(),
        needs_elevation: args.needs_elevation,
        needs_endpoint: args.needs_endpoint,
        dependencies: args.dependencies.clone(),
    };

    let report = validator.validate(&requirements, config.endpoint.as_ref());

    println!("Pre-flight report for {}\n", args.script);
    for check in &report {
        let marker = if check.passed { "✅" } else { "❌" };
        println!("{marker} {}: {}", check.name, check.message);
        if !check.passed {
            if let Some(hint) = remediation_hint(check.remediation) {
                println!("   → {hint}");
            }
        }
    }

    let failed = report.iter().filter(|c| !c.passed).count();
    println!();
    if failed > 0 {
        bail!("{failed} of {} check(s) failed", report.len());
    }
    println!("All {} check(s) passed", report.len());
    Ok(())
}

fn remediation_hint(remediation: Remediation) -> Option<&'static str> {
    match remediation {
        Remediation::None => None,
        Remediation::ElevatePrivileges => Some("restart the launcher with elevated privileges"),
        Remediation::FetchDependency => Some("run the tool once to fetch it, or check the catalog"),
        Remediation::RetryConnectivity => {
            Some("verify the [endpoint] settings and network, then retry")
        }
    }
}
