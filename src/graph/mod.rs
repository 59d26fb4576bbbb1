// ABOUTME: Dependency DAG built from depends_on, topological traversal forward/reverse.
// ABOUTME: Bounded-concurrency scheduler with name-stable tie-break and sibling-isolated failure.

use crate::config::Project;
use crate::error::{EngineError, Result};
use crate::types::ServiceName;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// A dependency DAG over a project's services, built from each service's
/// `depends_on`. Edges point from dependent to dependency.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// service -> set of services it depends on (required or not).
    edges: BTreeMap<ServiceName, BTreeSet<ServiceName>>,
    /// service -> set of services that depend on it.
    reverse_edges: BTreeMap<ServiceName, BTreeSet<ServiceName>>,
    required: BTreeMap<ServiceName, BTreeSet<ServiceName>>,
}

impl DependencyGraph {
    /// Builds the graph from `project`, failing `CyclicDependency` with the
    /// offending cycle if one exists. Non-required edges to services absent
    /// from the project are dropped; required edges to absent services are
    /// kept (the scheduler treats an absent required dependency as already
    /// satisfied - non-required failed dependencies are
    /// treated as satisfied" - an absent dependency behaves the same way
    /// unless required, in which case it is the planner's job upstream to
    /// have already failed `MissingExternal`/`InvalidConfig`).
    pub fn build(project: &Project) -> Result<Self> {
        let mut edges: BTreeMap<ServiceName, BTreeSet<ServiceName>> = BTreeMap::new();
        let mut reverse_edges: BTreeMap<ServiceName, BTreeSet<ServiceName>> = BTreeMap::new();
        let mut required: BTreeMap<ServiceName, BTreeSet<ServiceName>> = BTreeMap::new();

        for name in project.services.keys() {
            edges.insert(name.clone(), BTreeSet::new());
            reverse_edges.insert(name.clone(), BTreeSet::new());
            required.insert(name.clone(), BTreeSet::new());
        }

        for (name, service) in &project.services {
            for (dep_name, spec) in &service.depends_on {
                if !project.services.contains_key(dep_name) && !spec.required {
                    continue;
                }
                edges.entry(name.clone()).or_default().insert(dep_name.clone());
                reverse_edges
                    .entry(dep_name.clone())
                    .or_default()
                    .insert(name.clone());
                if spec.required {
                    required.entry(name.clone()).or_default().insert(dep_name.clone());
                }
            }
        }

        let graph = Self {
            edges,
            reverse_edges,
            required,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks: HashMap<&ServiceName, Mark> =
            self.edges.keys().map(|n| (n, Mark::Unvisited)).collect();
        let mut stack: Vec<ServiceName> = Vec::new();

        fn visit<'a>(
            node: &'a ServiceName,
            edges: &'a BTreeMap<ServiceName, BTreeSet<ServiceName>>,
            marks: &mut HashMap<&'a ServiceName, Mark>,
            stack: &mut Vec<ServiceName>,
        ) -> Result<()> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    let start = stack.iter().position(|n| n == node).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(ServiceName::to_string).collect();
                    cycle.push(node.to_string());
                    return Err(EngineError::cyclic_dependency(cycle));
                }
                _ => {}
            }
            marks.insert(node, Mark::InProgress);
            stack.push(node.clone());
            if let Some(deps) = edges.get(node) {
                for dep in deps {
                    visit(dep, edges, marks, stack)?;
                }
            }
            stack.pop();
            marks.insert(node, Mark::Done);
            Ok(())
        }

        for node in self.edges.keys() {
            visit(node, &self.edges, &mut marks, &mut stack)?;
        }
        Ok(())
    }

    /// Required dependencies of `name` (used by the completion condition).
    pub fn required_dependencies(&self, name: &ServiceName) -> BTreeSet<ServiceName> {
        self.required.get(name).cloned().unwrap_or_default()
    }

    /// All dependencies of `name`, required or not - used to expand a
    /// `--services` selection to the transitive closure a scoped `Up` must
    /// also bring up.
    pub fn dependencies(&self, name: &ServiceName) -> BTreeSet<ServiceName> {
        self.edges.get(name).cloned().unwrap_or_default()
    }

    /// Services that depend on `name` - used to expand a scoped `Stop`/`Down`
    /// to whatever still needs `name` running.
    pub fn dependents(&self, name: &ServiceName) -> BTreeSet<ServiceName> {
        self.reverse_edges.get(name).cloned().unwrap_or_default()
    }

    /// Transitive closure of `dependencies` over `seeds`, including the
    /// seeds themselves.
    pub fn transitive_dependencies(&self, seeds: &BTreeSet<ServiceName>) -> BTreeSet<ServiceName> {
        let mut closure = BTreeSet::new();
        let mut stack: Vec<ServiceName> = seeds.iter().cloned().collect();
        while let Some(name) = stack.pop() {
            if !closure.insert(name.clone()) {
                continue;
            }
            for dep in self.dependencies(&name) {
                if !closure.contains(&dep) {
                    stack.push(dep);
                }
            }
        }
        closure
    }

    /// All services with no outstanding work, in a deterministic first-layer
    /// traversal this is every service with no dependencies at all.
    pub fn roots(&self) -> BTreeSet<ServiceName> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceName> {
        self.edges.keys()
    }
}

/// Outcome of running one service's unit of work during a traversal.
pub type ServiceResult = std::result::Result<(), EngineError>;

/// Runs `task` for every service in `graph` in dependency order (forward:
/// a service does not start until all of its required dependencies have
/// completed). A failing required dependency cancels its dependents only;
/// already-in-flight siblings run to completion. Returns the aggregated
/// per-service errors, if any.
pub async fn in_dependency_order<F>(
    graph: &DependencyGraph,
    max_concurrency: usize,
    cancel: CancellationToken,
    task: F,
) -> BTreeMap<ServiceName, ServiceResult>
where
    F: for<'a> Fn(&'a ServiceName) -> BoxFuture<'a, ServiceResult> + Send + Sync + 'static,
{
    run_traversal(&graph.edges, &graph.required, max_concurrency, cancel, task).await
}

/// Mirror of `in_dependency_order` over the reverse graph, used by
/// stop/down: a service's stop work waits for all services that depend on
/// it to finish stopping first.
pub async fn in_reverse_dependency_order<F>(
    graph: &DependencyGraph,
    max_concurrency: usize,
    cancel: CancellationToken,
    task: F,
) -> BTreeMap<ServiceName, ServiceResult>
where
    F: for<'a> Fn(&'a ServiceName) -> BoxFuture<'a, ServiceResult> + Send + Sync + 'static,
{
    // Reverse required-ness: a service "requires" (for ordering purposes)
    // everything that depends on it, mirroring start order exactly reversed.
    let mut reverse_required: BTreeMap<ServiceName, BTreeSet<ServiceName>> = BTreeMap::new();
    for (dep, dependents) in &graph.reverse_edges {
        reverse_required.insert(dep.clone(), BTreeSet::new());
        for dependent in dependents {
            reverse_required.entry(dep.clone()).or_default().insert(dependent.clone());
        }
    }
    run_traversal(
        &graph.reverse_edges,
        &reverse_required,
        max_concurrency,
        cancel,
        task,
    )
    .await
}

async fn run_traversal<F>(
    edges: &BTreeMap<ServiceName, BTreeSet<ServiceName>>,
    required: &BTreeMap<ServiceName, BTreeSet<ServiceName>>,
    max_concurrency: usize,
    cancel: CancellationToken,
    task: F,
) -> BTreeMap<ServiceName, ServiceResult>
where
    F: for<'a> Fn(&'a ServiceName) -> BoxFuture<'a, ServiceResult> + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let task = Arc::new(task);
    let results: Arc<Mutex<BTreeMap<ServiceName, ServiceResult>>> =
        Arc::new(Mutex::new(BTreeMap::new()));
    let mut handles = Vec::new();

    // Tie-break: spawn in stable name order; the semaphore and dependency
    // waits determine actual execution order, this just fixes iteration.
    for name in edges.keys() {
        let name = name.clone();
        let deps: Vec<ServiceName> = required.get(&name).cloned().unwrap_or_default().into_iter().collect();
        let semaphore = semaphore.clone();
        let task = task.clone();
        let results = results.clone();
        let cancel = cancel.clone();

        // Each task polls its dependencies' recorded results before running;
        // since `results` only grows, this is equivalent to an explicit
        // notify-based barrier without needing a separate channel per edge.
        let handle = tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    let mut results = results.lock().await;
                    results
                        .entry(name.clone())
                        .or_insert_with(|| Err(EngineError::dependency_failed(name.to_string(), "operation cancelled")));
                    return;
                }
                let ready = {
                    let results = results.lock().await;
                    deps.iter().all(|d| results.contains_key(d))
                };
                if ready {
                    break;
                }
                tokio::task::yield_now().await;
            }

            let failed_dep = {
                let results = results.lock().await;
                deps.iter().find(|d| matches!(results.get(*d), Some(Err(_))))
            };
            if let Some(dep) = failed_dep {
                let mut results = results.lock().await;
                results.insert(
                    name.clone(),
                    Err(EngineError::dependency_failed(
                        name.to_string(),
                        format!("required dependency {dep} failed"),
                    )),
                );
                return;
            }

            let permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
            let outcome = task(&name).await;
            drop(permit);

            let mut results = results.lock().await;
            results.insert(name.clone(), outcome);
        });
        handles.push(handle);
    }

    for handle in handles {
        let _ = handle.await;
    }

    std::mem::take(&mut *results.lock().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DependencyCondition, DependsOnSpec, Project, ServiceConfig};
    use crate::runtime::RestartPolicyConfig;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn service(name: &str, deps: &[(&str, bool)]) -> ServiceConfig {
        let mut depends_on = BTreeMap::new();
        for (dep, required) in deps {
            depends_on.insert(
                ServiceName::new(dep).unwrap(),
                DependsOnSpec {
                    condition: DependencyCondition::ServiceStarted,
                    required: *required,
                },
            );
        }
        ServiceConfig {
            name: ServiceName::new(name).unwrap(),
            image: "img".to_string(),
            build: None,
            command: None,
            entrypoint: None,
            environment: BTreeMap::new(),
            env_file: Vec::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            networks: BTreeMap::new(),
            depends_on,
            restart: RestartPolicyConfig::default(),
            scale: 1,
            healthcheck: None,
            labels: BTreeMap::new(),
            platform: None,
            tty: false,
            pull_policy: crate::config::PullPolicy::default(),
            profiles: Vec::new(),
            hooks: crate::config::ServiceHooks::default(),
            extensions: BTreeMap::new(),
            container_name: None,
            configs: Vec::new(),
            secrets: Vec::new(),
            stop_grace_period: None,
            stop_signal: None,
        }
    }

    fn project(services: Vec<ServiceConfig>) -> Project {
        let mut map = BTreeMap::new();
        for s in services {
            map.insert(s.name.clone(), s);
        }
        Project {
            name: crate::types::ProjectName::new("demo").unwrap(),
            services: map,
            networks: BTreeMap::new(),
            volumes: BTreeMap::new(),
            configs: BTreeMap::new(),
            secrets: BTreeMap::new(),
            environment: BTreeMap::new(),
        }
    }

    #[test]
    fn detects_cycles() {
        let project = project(vec![
            service("a", &[("b", true)]),
            service("b", &[("a", true)]),
        ]);
        let err = DependencyGraph::build(&project).unwrap_err();
        assert_eq!(err.kind(), crate::error::EngineErrorKind::CyclicDependency);
    }

    #[test]
    fn acyclic_graph_builds() {
        let project = project(vec![service("web", &[("db", true)]), service("db", &[])]);
        let graph = DependencyGraph::build(&project).unwrap();
        assert_eq!(graph.roots(), BTreeSet::from([ServiceName::new("db").unwrap()]));
    }

    #[test]
    fn non_required_missing_dependency_is_dropped() {
        let project = project(vec![service("web", &[("ghost", false)])]);
        let graph = DependencyGraph::build(&project).unwrap();
        assert!(graph.required_dependencies(&ServiceName::new("web").unwrap()).is_empty());
    }

    #[tokio::test]
    async fn starts_dependents_after_dependencies_complete() {
        let project = project(vec![service("web", &[("db", true)]), service("db", &[])]);
        let graph = DependencyGraph::build(&project).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_clone = order.clone();
        let results = in_dependency_order(&graph, 4, CancellationToken::new(), move |name| {
            let order = order_clone.clone();
            let name = name.clone();
            Box::pin(async move {
                order.lock().await.push(name.to_string());
                Ok(())
            })
        })
        .await;

        assert!(results.values().all(|r| r.is_ok()));
        let order = order.lock().await;
        assert_eq!(order.iter().position(|n| n == "db"), Some(0));
        assert_eq!(order.iter().position(|n| n == "web"), Some(1));
    }

    #[tokio::test]
    async fn failing_dependency_fails_dependent_but_not_siblings() {
        let project = project(vec![
            service("web", &[("db", true)]),
            service("cache", &[]),
            service("db", &[]),
        ]);
        let graph = DependencyGraph::build(&project).unwrap();
        let cache_ran = Arc::new(AtomicU32::new(0));
        let cache_ran_clone = cache_ran.clone();

        let results = in_dependency_order(&graph, 4, CancellationToken::new(), move |name| {
            let cache_ran = cache_ran_clone.clone();
            let name = name.clone();
            Box::pin(async move {
                if name.as_str() == "db" {
                    return Err(EngineError::healthcheck_failed("db", "unhealthy"));
                }
                if name.as_str() == "cache" {
                    cache_ran.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            })
        })
        .await;

        assert!(results[&ServiceName::new("db").unwrap()].is_err());
        assert!(results[&ServiceName::new("web").unwrap()].is_err());
        assert!(results[&ServiceName::new("cache").unwrap()].is_ok());
        assert_eq!(cache_ran.load(Ordering::SeqCst), 1);
    }
}
