//! Tool launch orchestration.
//!
//! Sequences one tool run end to end: make sure the script and its
//! dependencies are cached and intact, gate on the pre-flight battery,
//! execute in the isolated host, then hand the outcome to the history
//! ledger. Each step stays in its own component; this module only wires
//! them together.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::ArtifactCache;
use crate::catalog::ArtifactFetcher;
use crate::config::{EndpointConfig, InterpreterConfig};
use crate::host::{ExecutionHost, ExecutionRequest, ExecutionResult, LineSink, ProgressSink};
use crate::ledger::{RunLedger, RunRecord};
use crate::notify::{Notice, NoticeQueue};
use crate::preflight::{CheckResult, PreflightValidator, Requirements};

/// A runnable catalog entry, as far as the launch pipeline cares.
#[derive(Debug, Clone, Default)]
pub struct ToolSpec {
    /// Stable identifier recorded in the history ledger
    pub id: String,
    /// Repository-relative path of the script artifact
    pub script_key: String,
    /// Named parameters forwarded to the script
    pub parameters: Vec<(String, String)>,
    /// Tool needs elevated privileges
    pub needs_elevation: bool,
    /// Tool needs a live data endpoint
    pub needs_endpoint: bool,
    /// Repository-relative paths of modules the script imports
    pub dependencies: Vec<String>,
}

impl ToolSpec {
    fn requirements(&self) -> Requirements {
        Requirements {
            script_key: self.script_key.clone(),
            needs_elevation: self.needs_elevation,
            needs_endpoint: self.needs_endpoint,
            dependencies: self.dependencies.clone(),
        }
    }
}

/// Caller-supplied stream sinks for one launch.
#[derive(Default, Clone)]
pub struct RunSinks {
    pub output: Option<LineSink>,
    pub error: Option<LineSink>,
    pub progress: Option<ProgressSink>,
}

/// Everything a launch produced: the full pre-flight report and, unless
/// the gate blocked the run, the execution result.
#[derive(Debug)]
pub struct LaunchReport {
    pub preflight: Vec<CheckResult>,
    pub result: Option<ExecutionResult>,
}

impl LaunchReport {
    /// True when the pre-flight gate stopped the run.
    pub fn blocked(&self) -> bool {
        self.result.is_none()
    }
}

/// Orchestrates cache, pre-flight, host, and ledger for tool runs.
pub struct Launcher<F: ArtifactFetcher, L: RunLedger> {
    cache: ArtifactCache,
    host: Arc<ExecutionHost>,
    fetcher: F,
    ledger: L,
    interpreter: InterpreterConfig,
    endpoint: Option<EndpointConfig>,
    notices: NoticeQueue,
}

impl<F: ArtifactFetcher, L: RunLedger> Launcher<F, L> {
    pub fn new(
        cache: ArtifactCache,
        interpreter: InterpreterConfig,
        endpoint: Option<EndpointConfig>,
        fetcher: F,
        ledger: L,
        notices: NoticeQueue,
    ) -> Self {
        let host = Arc::new(ExecutionHost::new(interpreter.clone()));
        Self {
            cache,
            host,
            fetcher,
            ledger,
            interpreter,
            endpoint,
            notices,
        }
    }

    /// The execution host, shared so a supervising thread can `stop()` an
    /// in-flight run.
    pub fn host(&self) -> Arc<ExecutionHost> {
        Arc::clone(&self.host)
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Runs the full pipeline for one tool.
    ///
    /// With `force` unset, any failing pre-flight check blocks execution
    /// and the report comes back with `result: None`; `force` runs the
    /// script regardless (the report still carries the failures).
    pub async fn launch(&self, tool: &ToolSpec, sinks: RunSinks, force: bool) -> Result<LaunchReport> {
        info!(operation = "launch", tool = %tool.id, "starting launch pipeline");

        self.ensure_cached(&tool.script_key, true).await?;
        for dependency in &tool.dependencies {
            // A dependency that cannot be fetched surfaces through the
            // pre-flight report rather than aborting the pipeline here.
            self.ensure_cached(dependency, false).await?;
        }

        let validator = PreflightValidator::new(&self.cache, &self.interpreter);
        let preflight = validator.validate(&tool.requirements(), self.endpoint.as_ref());

        let failures: Vec<_> = preflight.iter().filter(|c| !c.passed).collect();
        if !failures.is_empty() && !force {
            for failure in &failures {
                warn!(
                    operation = "launch",
                    tool = %tool.id,
                    check = %failure.name,
                    "pre-flight failure: {}",
                    failure.message
                );
            }
            self.notices.post(Notice::Failure(format!(
                "{}: blocked by {} failing pre-flight check(s)",
                tool.id,
                failures.len()
            )));
            return Ok(LaunchReport {
                preflight,
                result: None,
            });
        }

        let script_path = self
            .cache
            .resolve(&tool.script_key)
            .with_context(|| format!("script vanished from cache: {}", tool.script_key))?;

        let mut request = ExecutionRequest::new(script_path);
        request.parameters = tool.parameters.clone();
        request.output_sink = sinks.output;
        request.error_sink = sinks.error;
        request.progress_sink = sinks.progress;

        let host = Arc::clone(&self.host);
        let result = tokio::task::spawn_blocking(move || host.execute(request))
            .await
            .context("execution task panicked")??;

        let record = RunRecord {
            tool_id: tool.id.clone(),
            success: result.success,
            duration_ms: result.duration.as_millis() as u64,
            output: result.output.clone(),
            error_output: result.error_output.clone(),
            completed_at: result.completed_at,
        };
        if let Err(e) = self.ledger.record(&record) {
            warn!(operation = "launch", tool = %tool.id, error = %e, "failed to record run in ledger");
        }

        self.notices.post(if result.success {
            Notice::Success(format!("{} completed", tool.id))
        } else {
            Notice::Failure(format!("{} failed", tool.id))
        });

        Ok(LaunchReport {
            preflight,
            result: Some(result),
        })
    }

    /// Makes sure an artifact is cached, intact, and as fresh as the
    /// catalog allows.
    ///
    /// Missing artifacts must be fetched (an error when `required`,
    /// advisory otherwise). A corrupt artifact is never served: it forces
    /// a re-fetch. A stale-but-intact artifact triggers a refresh attempt,
    /// falling back to the cached copy when the catalog is unreachable.
    async fn ensure_cached(&self, key: &str, required: bool) -> Result<()> {
        let present = self.cache.resolve(key).is_some();

        if present && !self.cache.verify_integrity(key) {
            warn!(
                operation = "launch.refresh",
                key,
                "cached artifact failed integrity verification, re-fetching"
            );
            let content = self
                .fetcher
                .fetch(key)
                .await
                .with_context(|| format!("artifact corrupt in cache and re-fetch failed: {key}"))?;
            self.cache.store(key, &content)?;
            return Ok(());
        }

        if !present {
            match self.fetcher.fetch(key).await {
                Ok(content) => {
                    self.cache.store(key, &content)?;
                }
                Err(e) if required => {
                    return Err(e).with_context(|| format!("failed to fetch artifact: {key}"));
                }
                Err(e) => {
                    warn!(operation = "launch.refresh", key, error = %e, "dependency fetch failed");
                }
            }
            return Ok(());
        }

        if self.cache.is_stale(key) {
            match self.fetcher.fetch(key).await {
                Ok(content) => {
                    self.cache.store(key, &content)?;
                }
                Err(e) => {
                    // Staleness is advisory; the intact cached copy still runs
                    warn!(
                        operation = "launch.refresh",
                        key,
                        error = %e,
                        "stale artifact refresh failed, using cached copy"
                    );
                }
            }
        }

        Ok(())
    }
}
