//! Pre-flight validation gate.
//!
//! Proves the environment can satisfy a script's declared requirements
//! before anything runs. The battery never short-circuits: every applicable
//! check is run and appended to the report so the operator sees all
//! remediable problems at once. The validator is advisory; whether any
//! failure blocks execution is the caller's policy.

mod checks;

pub use checks::{probe_elevation, probe_endpoint, probe_interpreter};

use std::time::Duration;

use crate::cache::ArtifactCache;
use crate::config::{EndpointConfig, InterpreterConfig};

/// Suggested follow-up for a failing check, addressable without re-running
/// the whole battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    None,
    ElevatePrivileges,
    FetchDependency,
    RetryConnectivity,
}

/// Outcome of a single pre-flight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub remediation: Remediation,
}

impl CheckResult {
    fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: message.into(),
            remediation: Remediation::None,
        }
    }

    fn fail(name: &str, message: impl Into<String>, remediation: Remediation) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: message.into(),
            remediation,
        }
    }
}

/// What a script declares it needs from the environment.
#[derive(Debug, Clone, Default)]
pub struct Requirements {
    /// Cache key of the script about to run
    pub script_key: String,
    /// Script needs elevated privileges
    pub needs_elevation: bool,
    /// Script needs a live data endpoint
    pub needs_endpoint: bool,
    /// Cache keys of modules the script imports
    pub dependencies: Vec<String>,
}

/// Timeout for the raw TCP handshake of the connectivity check.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the fixed check battery against a script's requirements.
pub struct PreflightValidator<'a> {
    cache: &'a ArtifactCache,
    interpreter: &'a InterpreterConfig,
    connect_timeout: Duration,
}

impl<'a> PreflightValidator<'a> {
    pub fn new(cache: &'a ArtifactCache, interpreter: &'a InterpreterConfig) -> Self {
        Self {
            cache,
            interpreter,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Runs every applicable check and returns the complete report.
    pub fn validate(
        &self,
        requirements: &Requirements,
        endpoint: Option<&EndpointConfig>,
    ) -> Vec<CheckResult> {
        let mut report = Vec::new();

        if requirements.needs_elevation {
            report.push(self.check_privilege());
        }

        if requirements.needs_endpoint {
            report.push(self.check_connectivity(endpoint));
        }

        report.push(self.check_interpreter());

        for dependency in &requirements.dependencies {
            report.push(self.check_dependency(dependency));
        }

        report.push(self.check_script(&requirements.script_key));

        let failed = report.iter().filter(|r| !r.passed).count();
        tracing::debug!(
            operation = "preflight.validate",
            script = %requirements.script_key,
            checks = report.len(),
            failed,
            "pre-flight battery complete"
        );

        report
    }

    fn check_privilege(&self) -> CheckResult {
        match probe_elevation() {
            Ok(true) => CheckResult::pass("privilege", "running with elevated privileges"),
            Ok(false) => CheckResult::fail(
                "privilege",
                "this tool requires elevated privileges; restart the launcher as an administrator",
                Remediation::ElevatePrivileges,
            ),
            // A probe fault is not fatal to the battery; report it as the
            // check's failure and keep going.
            Err(e) => CheckResult::fail(
                "privilege",
                format!("could not determine privilege level: {e:#}"),
                Remediation::ElevatePrivileges,
            ),
        }
    }

    fn check_connectivity(&self, endpoint: Option<&EndpointConfig>) -> CheckResult {
        let Some(endpoint) = endpoint else {
            // Missing connection info is a failing result, not a skip
            return CheckResult::fail(
                "connectivity",
                "no data endpoint configured; set [endpoint] in tooldeck.toml",
                Remediation::RetryConnectivity,
            );
        };

        match probe_endpoint(&endpoint.host, endpoint.port, self.connect_timeout) {
            Ok(()) => CheckResult::pass(
                "connectivity",
                format!("endpoint reachable: {}:{}", endpoint.host, endpoint.port),
            ),
            Err(e) => CheckResult::fail(
                "connectivity",
                format!("{e:#}"),
                Remediation::RetryConnectivity,
            ),
        }
    }

    fn check_interpreter(&self) -> CheckResult {
        match probe_interpreter(self.interpreter) {
            Ok(version) => {
                CheckResult::pass("interpreter", format!("interpreter available: {version}"))
            }
            Err(e) => CheckResult::fail("interpreter", format!("{e:#}"), Remediation::None),
        }
    }

    fn check_dependency(&self, key: &str) -> CheckResult {
        let name = format!("dependency:{key}");
        // Presence only: a stale-but-present dependency still satisfies the
        // script's import, staleness is advisory.
        if self.cache.resolve(key).is_some() {
            CheckResult::pass(&name, format!("dependency cached: {key}"))
        } else {
            CheckResult::fail(
                &name,
                format!("dependency not cached: {key}; fetch it from the catalog"),
                Remediation::FetchDependency,
            )
        }
    }

    fn check_script(&self, key: &str) -> CheckResult {
        if key.is_empty() {
            return CheckResult::fail(
                "script",
                "tool has no script file defined; contact the catalog maintainer",
                Remediation::None,
            );
        }

        if self.cache.resolve(key).is_none() {
            return CheckResult::fail(
                "script",
                format!("script not cached: {key}; fetch it from the catalog"),
                Remediation::FetchDependency,
            );
        }

        if self.cache.is_stale(key) {
            // Staleness never blocks execution, it only suggests a refresh
            CheckResult::pass(
                "script",
                format!("script cached but stale: {key}; a refresh is recommended"),
            )
        } else {
            CheckResult::pass("script", format!("script cached: {key}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn shell_interpreter() -> InterpreterConfig {
        InterpreterConfig {
            program: "sh".to_string(),
            fallback: None,
            args: vec![],
            version_args: vec!["-c".to_string(), "echo shtest 1.0".to_string()],
        }
    }

    fn open_cache(temp: &TempDir) -> ArtifactCache {
        ArtifactCache::open(temp.path(), Duration::from_secs(3600)).unwrap()
    }

    #[test]
    #[cfg(unix)]
    fn test_minimal_battery_composition() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);
        cache.store("scripts/report.ps1", b"Get-Report").unwrap();

        let interpreter = shell_interpreter();
        let validator = PreflightValidator::new(&cache, &interpreter);
        let requirements = Requirements {
            script_key: "scripts/report.ps1".to_string(),
            ..Default::default()
        };

        let report = validator.validate(&requirements, None);

        // No privilege, no connectivity, no dependencies: exactly the
        // interpreter and script checks remain.
        let names: Vec<_> = report.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["interpreter", "script"]);
        assert!(report.iter().all(|r| r.passed));
    }

    #[test]
    #[cfg(unix)]
    fn test_missing_dependency_is_single_tagged_failure() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);
        cache.store("scripts/fix.ps1", b"Repair-Till").unwrap();
        cache.store("modules/common.psm1", b"function Common {}").unwrap();

        let interpreter = shell_interpreter();
        let validator = PreflightValidator::new(&cache, &interpreter);
        let requirements = Requirements {
            script_key: "scripts/fix.ps1".to_string(),
            dependencies: vec![
                "modules/common.psm1".to_string(),
                "modules/never-fetched.psm1".to_string(),
            ],
            ..Default::default()
        };

        let report = validator.validate(&requirements, None);

        // Every check still appears
        assert_eq!(report.len(), 4);

        let failures: Vec<_> = report.iter().filter(|r| !r.passed).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "dependency:modules/never-fetched.psm1");
        assert_eq!(failures[0].remediation, Remediation::FetchDependency);
        assert!(!failures[0].message.is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn test_stale_script_is_advisory_pass() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);
        cache.store("scripts/eod.ps1", b"Close-Day").unwrap();

        // Age the entry past its TTL
        let mut row = cache.metadata().get("scripts/eod.ps1").unwrap().unwrap();
        row.expires_at = 0;
        cache.metadata().upsert(&row).unwrap();
        assert!(cache.is_stale("scripts/eod.ps1"));

        let interpreter = shell_interpreter();
        let validator = PreflightValidator::new(&cache, &interpreter);
        let requirements = Requirements {
            script_key: "scripts/eod.ps1".to_string(),
            ..Default::default()
        };

        let report = validator.validate(&requirements, None);
        let script = report.iter().find(|r| r.name == "script").unwrap();

        // Stale-but-present passes with an advisory message, it never blocks
        assert!(script.passed);
        assert!(script.message.contains("stale"));
    }

    #[test]
    #[cfg(unix)]
    fn test_endpoint_required_but_unconfigured() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);
        cache.store("s.ps1", b"x").unwrap();

        let interpreter = shell_interpreter();
        let validator = PreflightValidator::new(&cache, &interpreter);
        let requirements = Requirements {
            script_key: "s.ps1".to_string(),
            needs_endpoint: true,
            ..Default::default()
        };

        let report = validator.validate(&requirements, None);
        let connectivity = report.iter().find(|r| r.name == "connectivity").unwrap();

        assert!(!connectivity.passed);
        assert_eq!(connectivity.remediation, Remediation::RetryConnectivity);
        // The rest of the battery still ran
        assert!(report.iter().any(|r| r.name == "interpreter"));
        assert!(report.iter().any(|r| r.name == "script"));
    }

    #[test]
    #[cfg(unix)]
    fn test_unreachable_endpoint_fails_without_aborting() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);
        cache.store("s.ps1", b"x").unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let interpreter = shell_interpreter();
        let validator = PreflightValidator::new(&cache, &interpreter)
            .with_connect_timeout(Duration::from_millis(200));
        let requirements = Requirements {
            script_key: "s.ps1".to_string(),
            needs_endpoint: true,
            ..Default::default()
        };
        let endpoint = EndpointConfig {
            host: "127.0.0.1".to_string(),
            port,
        };

        let report = validator.validate(&requirements, Some(&endpoint));
        let connectivity = report.iter().find(|r| r.name == "connectivity").unwrap();

        assert!(!connectivity.passed);
        assert_eq!(connectivity.remediation, Remediation::RetryConnectivity);
        assert_eq!(report.len(), 3);
    }

    #[test]
    fn test_interpreter_unavailable_has_message() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let interpreter = InterpreterConfig {
            program: "no-such-runtime".to_string(),
            fallback: Some("also-missing".to_string()),
            args: vec![],
            version_args: vec![],
        };
        let validator = PreflightValidator::new(&cache, &interpreter);
        let requirements = Requirements {
            script_key: "missing.ps1".to_string(),
            ..Default::default()
        };

        let report = validator.validate(&requirements, None);
        let runtime = report.iter().find(|r| r.name == "interpreter").unwrap();
        let script = report.iter().find(|r| r.name == "script").unwrap();

        assert!(!runtime.passed);
        assert!(!runtime.message.is_empty());
        // Script was never stored either; still reported, still tagged
        assert!(!script.passed);
        assert_eq!(script.remediation, Remediation::FetchDependency);
    }

    #[test]
    fn test_empty_script_key_is_catalog_defect() {
        let temp = TempDir::new().unwrap();
        let cache = open_cache(&temp);

        let interpreter = shell_interpreter();
        let validator = PreflightValidator::new(&cache, &interpreter);
        let requirements = Requirements::default();

        let report = validator.validate(&requirements, None);
        let script = report.iter().find(|r| r.name == "script").unwrap();

        assert!(!script.passed);
        assert_eq!(script.remediation, Remediation::None);
        assert!(script.message.contains("catalog maintainer"));
    }
}
