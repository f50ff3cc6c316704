//! Change Detector and Poller
//!
//! The change detector probes every configured (repository, branch) pair
//! and keeps the last-seen commit fingerprint per pair; the poller drives
//! it on an interval, folds change events into a trigger plan and
//! dispatches group and individual deployments.
//!
//! The first successful probe of a pair only records a baseline; the
//! first tick after startup never causes deployments.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{Config, RepositoryConfig};
use crate::models::{
    short_fingerprint, DeployResult, GroupDeployResult, GroupTrigger, RepoChangeEvent, TriggerPlan,
};
use crate::services::deploy::DeployService;
use crate::services::hosting::{HostingClient, HostingError};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("{failed} of {total} connectivity probes failed")]
    ValidationFailed { failed: usize, total: usize },
}

/// Key of the last-seen commit map: (repository name, branch name)
pub type SeenKey = (String, String);

/// Outcome of one scan across all configured (repo, branch) pairs
#[derive(Debug, Default)]
pub struct ScanReport {
    pub events: Vec<RepoChangeEvent>,
    /// Probe failures as (repo, branch, error); these never touch the
    /// seen map
    pub failures: Vec<(String, String, HostingError)>,
}

/// Watches configured branches and reports commit changes.
///
/// The seen map is owned here; consumers only observe changes through
/// the events a scan emits.
#[derive(Clone)]
pub struct ChangeDetector {
    config: Arc<Config>,
    hosting: HostingClient,
    seen: Arc<RwLock<HashMap<SeenKey, String>>>,
}

impl ChangeDetector {
    pub fn new(config: Arc<Config>, hosting: HostingClient) -> Self {
        Self {
            config,
            hosting,
            seen: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Probe every configured (repo, branch) pair concurrently and
    /// collect the change events of this tick.
    pub async fn scan(&self) -> ScanReport {
        let mut probes = JoinSet::new();
        for repo in &self.config.repositories {
            for branch in &repo.monitor.branches {
                let detector = self.clone();
                let repo = repo.clone();
                let branch = branch.clone();
                probes.spawn(async move {
                    let outcome = detector.probe(&repo, &branch).await;
                    (repo.name, branch, outcome)
                });
            }
        }

        let mut report = ScanReport::default();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((_, _, Ok(Some(event)))) => report.events.push(event),
                Ok((_, _, Ok(None))) => {}
                Ok((repo, branch, Err(err))) => report.failures.push((repo, branch, err)),
                Err(err) => error!(error = %err, "branch probe task panicked"),
            }
        }
        report
    }

    /// Check one branch against the seen map. Returns an event only when
    /// a previously recorded fingerprint changed.
    async fn probe(
        &self,
        repo: &RepositoryConfig,
        branch: &str,
    ) -> Result<Option<RepoChangeEvent>, HostingError> {
        let commit = self
            .hosting
            .latest_commit(repo.monitor.repo_ref(), branch)
            .await?;
        let key = (repo.name.clone(), branch.to_string());

        {
            let seen = self.seen.read().await;
            if seen.get(&key).is_some_and(|sha| *sha == commit.sha) {
                return Ok(None);
            }
        }

        let mut seen = self.seen.write().await;
        match seen.insert(key, commit.sha.clone()) {
            None => {
                info!(
                    repo = %repo.name,
                    branch,
                    sha = short_fingerprint(&commit.sha),
                    "baseline commit recorded"
                );
                Ok(None)
            }
            // Another probe of the same pair won the race.
            Some(previous) if previous == commit.sha => Ok(None),
            Some(previous) => {
                info!(
                    repo = %repo.name,
                    branch,
                    old_sha = short_fingerprint(&previous),
                    new_sha = short_fingerprint(&commit.sha),
                    author = %commit.author,
                    message = %commit.message,
                    "new commit detected"
                );
                Ok(Some(RepoChangeEvent {
                    repo: repo.name.clone(),
                    branch: branch.to_string(),
                    old_sha: previous,
                    new_sha: commit.sha,
                }))
            }
        }
    }

    /// Read-only copy of the seen map, for diagnostics and tests.
    pub async fn snapshot(&self) -> HashMap<SeenKey, String> {
        self.seen.read().await.clone()
    }
}

/// Everything one tick decided and did
#[derive(Debug, Default)]
pub struct TickReport {
    pub plan: TriggerPlan,
    pub groups: Vec<GroupDeployResult>,
    pub individuals: Vec<DeployResult>,
    pub probe_failures: usize,
}

impl TickReport {
    pub fn success(&self) -> bool {
        self.groups.iter().all(|group| group.success)
            && self.individuals.iter().all(|result| result.success)
    }

    pub fn failure_summary(&self) -> String {
        let mut parts = Vec::new();
        for group in &self.groups {
            if let Some(error) = &group.error {
                parts.push(format!("group {}: {error}", group.group_name));
            }
        }
        for result in &self.individuals {
            if !result.success {
                parts.push(format!(
                    "{}: {}",
                    result.repo_name,
                    result.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
        parts.join("; ")
    }
}

/// Drives the change detector on the polling interval and dispatches
/// deployments for every change it finds.
pub struct MonitorService {
    config: Arc<Config>,
    hosting: HostingClient,
    detector: ChangeDetector,
    deploy: DeployService,
}

impl MonitorService {
    pub fn new(config: Arc<Config>, hosting: HostingClient, deploy: DeployService) -> Self {
        let detector = ChangeDetector::new(Arc::clone(&config), hosting.clone());
        Self {
            config,
            hosting,
            detector,
            deploy,
        }
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// Poll until shutdown is signalled. The first tick runs immediately
    /// to record baselines; a tick that fires while the previous
    /// dispatch is still running is skipped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            polling_interval = self.config.polling_interval,
            repositories = self.config.repositories.len(),
            "starting repository monitoring"
        );

        self.poll_once().await;

        let mut interval = time::interval(Duration::from_secs(self.config.polling_interval));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One full tick: scan, fold changes into a trigger plan, dispatch.
    pub async fn poll_once(&self) -> TickReport {
        let scan = self.detector.scan().await;
        for (repo, branch, err) in &scan.failures {
            warn!(repo = %repo, branch = %branch, error = %err, "branch probe failed");
        }

        let changed: HashSet<&str> = scan
            .events
            .iter()
            .map(|event| event.repo.as_str())
            .collect();
        let plan = self.build_plan(|name| changed.contains(name));

        if plan.is_empty() {
            debug!(probe_failures = scan.failures.len(), "tick produced no triggers");
            return TickReport {
                plan,
                probe_failures: scan.failures.len(),
                ..TickReport::default()
            };
        }

        self.dispatch(plan, scan.failures.len()).await
    }

    /// Manual trigger: treat every configured repository as changed,
    /// bypassing the change detector.
    pub async fn trigger_all(&self) -> TickReport {
        info!("manual deployment trigger for all configured repositories");
        let plan = self.build_plan(|_| true);
        self.dispatch(plan, 0).await
    }

    /// Fold changed repositories into a trigger plan. A changed grouped
    /// repository pulls in the full declared membership of its group;
    /// the group appears exactly once per tick.
    fn build_plan(&self, changed: impl Fn(&str) -> bool) -> TriggerPlan {
        let mut plan = TriggerPlan::default();
        for repo in &self.config.repositories {
            if !changed(&repo.name) {
                continue;
            }
            match &repo.group {
                Some(group) => {
                    if plan.groups.contains_key(group) {
                        continue;
                    }
                    let members: Vec<String> = self
                        .config
                        .repositories
                        .iter()
                        .filter(|candidate| candidate.group.as_deref() == Some(group.as_str()))
                        .map(|candidate| candidate.name.clone())
                        .collect();
                    plan.groups.insert(
                        group.clone(),
                        GroupTrigger {
                            group: group.clone(),
                            members,
                            trigger_repo: repo.name.clone(),
                            trigger_time: Utc::now(),
                        },
                    );
                }
                None => plan.individuals.push(repo.name.clone()),
            }
        }
        plan
    }

    async fn dispatch(&self, plan: TriggerPlan, probe_failures: usize) -> TickReport {
        let mut report = TickReport {
            plan: plan.clone(),
            groups: Vec::new(),
            individuals: Vec::new(),
            probe_failures,
        };

        for (name, trigger) in &plan.groups {
            let Some(policy) = self.config.groups.get(name) else {
                error!(group = %name, "group policy missing, skipping dispatch");
                continue;
            };
            info!(
                group = %name,
                triggered_by = %trigger.trigger_repo,
                members = ?trigger.members,
                "dispatching group deployment"
            );
            report
                .groups
                .push(self.deploy.deploy_group(name, &trigger.members, policy).await);
        }

        for repo in &plan.individuals {
            info!(repo = %repo, "dispatching individual deployment");
            report.individuals.push(self.deploy.deploy_individual(repo).await);
        }

        report
    }

    /// Probe every monitored branch and every QA repository branch once.
    /// Used by the `validate` action.
    pub async fn validate_connectivity(&self) -> Result<(), MonitorError> {
        let mut total = 0usize;
        let mut failed = 0usize;

        for repo in &self.config.repositories {
            for branch in &repo.monitor.branches {
                total += 1;
                match self
                    .hosting
                    .latest_commit(repo.monitor.repo_ref(), branch)
                    .await
                {
                    Ok(commit) => info!(
                        repo = %repo.name,
                        branch = %branch,
                        sha = short_fingerprint(&commit.sha),
                        "monitor probe ok"
                    ),
                    Err(err) => {
                        failed += 1;
                        error!(repo = %repo.name, branch = %branch, error = %err, "monitor probe failed");
                    }
                }
            }

            total += 1;
            match self
                .hosting
                .latest_commit(repo.deploy.repo_ref(), &repo.deploy.branch)
                .await
            {
                Ok(commit) => info!(
                    repo = %repo.name,
                    branch = %repo.deploy.branch,
                    sha = short_fingerprint(&commit.sha),
                    "QA repository probe ok"
                ),
                Err(err) => {
                    failed += 1;
                    error!(
                        repo = %repo.name,
                        branch = %repo.deploy.branch,
                        error = %err,
                        "QA repository probe failed"
                    );
                }
            }
        }

        if failed > 0 {
            return Err(MonitorError::ValidationFailed { failed, total });
        }
        Ok(())
    }
}
