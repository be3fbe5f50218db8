//! Whole-group lifecycle runs over the in-memory collaborators.

use std::sync::{Arc, Mutex};
use std::thread;

use cbf_common::{CbfError, ContainerId, CubeId, EngineConfig, FragmentId};
use cbf_engine::{
    register_builtin_operators, EngineCtx, FnOperatorFactory, FragmentRangeSet, HookResult,
    LifecycleDriver, LifecycleOperator, LocalGroup, OperatorParams, OperatorRegistry, RunOutcome,
    TaskHandle,
};
use cbf_storage::{CatalogStore, FragmentRow, FragmentStore, MemCatalog, MemFragmentStore};

fn seed_cube(
    catalog: &MemCatalog,
    store: &MemFragmentStore,
    set: &str,
) -> (ContainerId, CubeId) {
    let container = catalog.create_container("demo").expect("container");
    let cube = catalog.create_cube(container, set).expect("cube");
    let indices: Vec<u64> = FragmentRangeSet::parse(set).expect("set").iter().collect();
    store.seed_cube(cube, indices.clone());
    catalog
        .insert_fragments(
            indices
                .iter()
                .map(|&index| FragmentRow {
                    id: FragmentId { cube, index },
                    cube,
                    relative_index: index,
                })
                .collect(),
        )
        .expect("seed rows");
    (container, cube)
}

#[allow(clippy::too_many_arguments)]
fn run_group(
    operator: &str,
    group_size: usize,
    worker_threads: usize,
    params: OperatorParams,
    registry: &Arc<OperatorRegistry>,
    catalog: &Arc<MemCatalog>,
    store: &Arc<MemFragmentStore>,
) -> Vec<RunOutcome> {
    let config = EngineConfig {
        worker_threads,
        ..EngineConfig::default()
    };
    let members = LocalGroup::new_group(group_size);
    thread::scope(|s| {
        let handles: Vec<_> = members
            .into_iter()
            .map(|comm| {
                let engine = EngineCtx {
                    config: config.clone(),
                    comm: Arc::new(comm),
                    catalog: Arc::clone(catalog) as Arc<dyn CatalogStore>,
                    store: Arc::clone(store) as Arc<dyn FragmentStore>,
                };
                let registry = Arc::clone(registry);
                let operator = operator.to_string();
                let params = params.clone();
                s.spawn(move || {
                    LifecycleDriver::new(engine, registry)
                        .run(&operator, params)
                        .expect("driver faulted")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("group member panicked"))
            .collect()
    })
}

fn builtin_registry() -> Arc<OperatorRegistry> {
    let registry = Arc::new(OperatorRegistry::default());
    register_builtin_operators(&registry);
    registry
}

fn cube_params(cube: CubeId) -> OperatorParams {
    let mut params = OperatorParams::new();
    params.insert("cube".to_string(), cube.to_string());
    params
}

#[test]
fn duplicate_copies_every_fragment_across_the_group() {
    let catalog = Arc::new(MemCatalog::new());
    let store = Arc::new(MemFragmentStore::new());
    let (_, cube) = seed_cube(&catalog, &store, "1-6;9-12");
    let registry = builtin_registry();

    let outcomes = run_group("duplicate", 3, 2, cube_params(cube), &registry, &catalog, &store);

    let output = outcomes[0].output_cube.expect("output cube");
    for outcome in &outcomes {
        assert!(!outcome.verdict.failed, "verdict: {:?}", outcome.verdict);
        assert_eq!(outcome.verdict.code, 0);
        assert_eq!(outcome.output_cube, Some(output));
    }
    assert_eq!(store.cube_fragment_count(output), 10);
    let rows = catalog.fragments_of(output).expect("rows");
    assert_eq!(rows.len(), 10);
    assert_eq!(
        rows.iter().map(|r| r.relative_index).collect::<Vec<_>>(),
        (1..=10).collect::<Vec<_>>()
    );
    let row = catalog.cube(output).expect("output record");
    assert_eq!(row.fragment_set, "1-10");
    assert_eq!(row.pid.as_deref(), Some(format!("cube/{output}").as_str()));
    // Source is untouched.
    assert_eq!(store.cube_fragment_count(cube), 10);
}

#[test]
fn duplicate_rolls_back_symmetrically_on_worker_failure() {
    let catalog = Arc::new(MemCatalog::new());
    let store = Arc::new(MemFragmentStore::new());
    let (_, cube) = seed_cube(&catalog, &store, "1-10");
    let registry = builtin_registry();

    // The output cube gets the next id after the seeded one.
    let output = CubeId(cube.0 + 1);
    store.fail_fragment(FragmentId {
        cube: output,
        index: 5,
    });

    let outcomes = run_group("duplicate", 3, 2, cube_params(cube), &registry, &catalog, &store);

    let code = outcomes[0].verdict.code;
    for outcome in &outcomes {
        assert!(outcome.verdict.failed);
        assert_eq!(outcome.verdict.code, code, "canonical code must be uniform");
    }
    // Every forward-created fragment is gone again and the orphaned output
    // record was removed by the leader.
    assert_eq!(store.cube_fragment_count(output), 0);
    assert!(catalog.cube(output).is_err());
    assert!(catalog.fragments_of(output).expect("rows").is_empty());
    // Source survives.
    assert_eq!(store.cube_fragment_count(cube), 10);
    assert_eq!(catalog.fragments_of(cube).expect("rows").len(), 10);
}

#[test]
fn duplicate_into_new_container_drops_it_on_rollback() {
    let catalog = Arc::new(MemCatalog::new());
    let store = Arc::new(MemFragmentStore::new());
    let (_, cube) = seed_cube(&catalog, &store, "1-4");
    let registry = builtin_registry();

    let output = CubeId(cube.0 + 1);
    store.fail_fragment(FragmentId {
        cube: output,
        index: 2,
    });
    let mut params = cube_params(cube);
    params.insert("container".to_string(), "copies".to_string());

    let outcomes = run_group("duplicate", 2, 2, params, &registry, &catalog, &store);

    assert!(outcomes.iter().all(|o| o.verdict.failed));
    // The dedicated output container ends up childless and is removed too.
    let orphan_container = ContainerId(2);
    assert!(catalog.cube(output).is_err());
    assert!(!catalog
        .remove_container_if_empty(orphan_container)
        .expect("container already removed by rollback"));
}

#[test]
fn sparse_group_still_completes_with_idle_members() {
    let catalog = Arc::new(MemCatalog::new());
    let store = Arc::new(MemFragmentStore::new());
    let (_, cube) = seed_cube(&catalog, &store, "1-2");
    let registry = builtin_registry();

    let outcomes = run_group("duplicate", 5, 4, cube_params(cube), &registry, &catalog, &store);

    let output = outcomes[0].output_cube.expect("output cube");
    for outcome in &outcomes {
        assert!(!outcome.verdict.failed);
    }
    assert_eq!(store.cube_fragment_count(output), 2);
}

#[test]
fn delete_removes_cube_rows_and_container() {
    let catalog = Arc::new(MemCatalog::new());
    let store = Arc::new(MemFragmentStore::new());
    let (container, cube) = seed_cube(&catalog, &store, "1-8");
    let registry = builtin_registry();

    let outcomes = run_group("delete", 2, 3, cube_params(cube), &registry, &catalog, &store);

    for outcome in &outcomes {
        assert!(!outcome.verdict.failed, "verdict: {:?}", outcome.verdict);
    }
    assert_eq!(store.cube_fragment_count(cube), 0);
    assert!(catalog.cube(cube).is_err());
    assert!(catalog.fragments_of(cube).expect("rows").is_empty());
    // Leader removed the now-empty container during task_destroy.
    assert!(!catalog
        .remove_container_if_empty(container)
        .expect("container lookup"));
}

#[test]
fn missing_parameter_fails_uniformly_without_catalog_damage() {
    let catalog = Arc::new(MemCatalog::new());
    let store = Arc::new(MemFragmentStore::new());
    let (_, cube) = seed_cube(&catalog, &store, "1-4");
    let registry = builtin_registry();

    let outcomes = run_group(
        "delete",
        3,
        2,
        OperatorParams::new(),
        &registry,
        &catalog,
        &store,
    );

    let config_code = CbfError::InvalidConfig(String::new()).outcome_code();
    for outcome in &outcomes {
        assert!(outcome.verdict.failed);
        assert_eq!(outcome.verdict.code, config_code);
    }
    assert_eq!(store.cube_fragment_count(cube), 4);
}

#[test]
fn unknown_operator_fails_the_whole_group() {
    let catalog = Arc::new(MemCatalog::new());
    let store = Arc::new(MemFragmentStore::new());
    let registry = builtin_registry();

    let outcomes = run_group(
        "no-such-operator",
        2,
        1,
        OperatorParams::new(),
        &registry,
        &catalog,
        &store,
    );

    let not_found = CbfError::OperatorNotFound(String::new()).outcome_code();
    for outcome in &outcomes {
        assert!(outcome.verdict.failed);
        assert_eq!(outcome.verdict.code, not_found);
    }
}

#[test]
fn driver_rejects_reentry_after_a_completed_run() {
    let catalog = Arc::new(MemCatalog::new());
    let store = Arc::new(MemFragmentStore::new());
    let (_, cube) = seed_cube(&catalog, &store, "1-3");
    let registry = builtin_registry();

    let mut members = LocalGroup::new_group(1);
    let engine = EngineCtx {
        config: EngineConfig::default(),
        comm: Arc::new(members.remove(0)),
        catalog: Arc::clone(&catalog) as Arc<dyn CatalogStore>,
        store: Arc::clone(&store) as Arc<dyn FragmentStore>,
    };
    let mut driver = LifecycleDriver::new(engine, registry);
    let outcome = driver
        .run("duplicate", cube_params(cube))
        .expect("first run");
    assert!(!outcome.verdict.failed);

    let err = driver
        .run("duplicate", cube_params(cube))
        .expect_err("re-entry must be rejected");
    assert!(matches!(err, CbfError::State(_)));
}

#[derive(Debug, Default)]
struct ProbeState {
    calls: Mutex<Vec<String>>,
}

impl ProbeState {
    fn record(&self, phase: &str) {
        self.calls.lock().expect("probe lock").push(phase.to_string());
    }

    fn called(&self, phase: &str) -> bool {
        self.calls
            .lock()
            .expect("probe lock")
            .iter()
            .any(|p| p == phase)
    }
}

/// Fixture operator recording hook invocations, with an injectable leader
/// failure at `task_init`.
struct ProbeOperator {
    probe: Arc<ProbeState>,
    fail_init_on_leader: bool,
}

impl LifecycleOperator for ProbeOperator {
    fn env_set(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        self.probe.record("env_set");
        Ok(())
    }

    fn task_init(&mut self, engine: &EngineCtx, handle: &mut TaskHandle) -> HookResult {
        self.probe.record("task_init");
        let fail = self.fail_init_on_leader;
        let encoded: String = engine.on_leader(|| {
            if fail {
                return Err(CbfError::Execution("injected leader failure".to_string()));
            }
            Ok("1-4".to_string())
        })?;
        handle.install_fragment_set(FragmentRangeSet::parse(&encoded)?);
        Ok(())
    }

    fn task_distribute(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        self.probe.record("task_distribute");
        Ok(())
    }

    fn task_execute(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        self.probe.record("task_execute");
        Ok(())
    }

    fn task_reduce(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        self.probe.record("task_reduce");
        Ok(())
    }

    fn task_destroy(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        self.probe.record("task_destroy");
        Ok(())
    }

    fn env_unset(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        self.probe.record("env_unset");
        Ok(())
    }
}

fn probe_registry(probe: &Arc<ProbeState>, fail_init_on_leader: bool) -> Arc<OperatorRegistry> {
    let registry = Arc::new(OperatorRegistry::default());
    let probe = Arc::clone(probe);
    registry.register(Arc::new(FnOperatorFactory::new("probe", move || {
        Ok(Box::new(ProbeOperator {
            probe: Arc::clone(&probe),
            fail_init_on_leader,
        }))
    })));
    registry
}

#[test]
fn leader_failure_in_task_init_skips_distribute_and_execute() {
    let catalog = Arc::new(MemCatalog::new());
    let store = Arc::new(MemFragmentStore::new());
    let probe = Arc::new(ProbeState::default());
    let registry = probe_registry(&probe, true);

    let outcomes = run_group(
        "probe",
        4,
        2,
        OperatorParams::new(),
        &registry,
        &catalog,
        &store,
    );

    let leader_failed = CbfError::LeaderFailed(String::new()).outcome_code();
    for outcome in &outcomes {
        assert!(outcome.verdict.failed);
        assert_eq!(outcome.verdict.code, leader_failed);
    }
    assert!(probe.called("env_set"));
    assert!(probe.called("task_init"));
    assert!(!probe.called("task_distribute"));
    assert!(!probe.called("task_execute"));
    assert!(!probe.called("task_reduce"));
    // Cleanup hooks still run on every member.
    assert!(probe.called("task_destroy"));
    assert!(probe.called("env_unset"));
}

/// Fixture operator failing `task_execute` with a retryable error a fixed
/// number of times before succeeding.
struct FlakyExecuteOperator {
    remaining_failures: u32,
    attempts_seen: Arc<Mutex<u32>>,
}

impl LifecycleOperator for FlakyExecuteOperator {
    fn env_set(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        Ok(())
    }

    fn task_init(&mut self, _engine: &EngineCtx, handle: &mut TaskHandle) -> HookResult {
        handle.install_fragment_set(FragmentRangeSet::parse("1-2")?);
        Ok(())
    }

    fn task_execute(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        *self.attempts_seen.lock().expect("attempts lock") += 1;
        if self.remaining_failures > 0 {
            self.remaining_failures -= 1;
            return Err(cbf_engine::HookError::Retryable(CbfError::Execution(
                "transient backend hiccup".to_string(),
            )));
        }
        Ok(())
    }

    fn env_unset(&mut self, _engine: &EngineCtx, _handle: &mut TaskHandle) -> HookResult {
        Ok(())
    }
}

#[test]
fn retryable_hook_failure_is_retried_in_place() {
    let catalog = Arc::new(MemCatalog::new());
    let store = Arc::new(MemFragmentStore::new());
    let attempts = Arc::new(Mutex::new(0_u32));
    let registry = Arc::new(OperatorRegistry::default());
    let attempts_for_factory = Arc::clone(&attempts);
    registry.register(Arc::new(FnOperatorFactory::new("flaky", move || {
        Ok(Box::new(FlakyExecuteOperator {
            remaining_failures: 1,
            attempts_seen: Arc::clone(&attempts_for_factory),
        }))
    })));

    let mut config_params = OperatorParams::new();
    config_params.insert("unused".to_string(), "1".to_string());
    let outcomes = run_group("flaky", 1, 1, config_params, &registry, &catalog, &store);

    assert!(!outcomes[0].verdict.failed);
    assert_eq!(*attempts.lock().expect("attempts lock"), 2);
}

#[test]
fn healthy_probe_visits_every_phase_in_order() {
    let catalog = Arc::new(MemCatalog::new());
    let store = Arc::new(MemFragmentStore::new());
    let probe = Arc::new(ProbeState::default());
    let registry = probe_registry(&probe, false);

    let outcomes = run_group(
        "probe",
        1,
        1,
        OperatorParams::new(),
        &registry,
        &catalog,
        &store,
    );

    assert!(!outcomes[0].verdict.failed);
    let calls = probe.calls.lock().expect("probe lock").clone();
    assert_eq!(
        calls,
        vec![
            "env_set",
            "task_init",
            "task_distribute",
            "task_execute",
            "task_reduce",
            "task_destroy",
            "env_unset",
        ]
    );
}
