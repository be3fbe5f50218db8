use std::env;
use std::sync::Arc;
use std::thread;

use cbf_common::{CubeId, EngineConfig, FragmentId};
use cbf_engine::{
    register_builtin_operators, EngineCtx, FragmentRangeSet, LifecycleDriver, LocalGroup,
    OperatorParams, OperatorRegistry, RunOutcome,
};
use cbf_storage::{CatalogStore, FragmentRow, FragmentStore, MemCatalog, MemFragmentStore};

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize_or_default(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u64_or_default(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn seed_fragment_rows(
    catalog: &MemCatalog,
    store: &MemFragmentStore,
    cube: CubeId,
    set: &FragmentRangeSet,
) -> Result<(), Box<dyn std::error::Error>> {
    store.seed_cube(cube, set.iter());
    catalog.insert_fragments(
        set.iter()
            .map(|index| FragmentRow {
                id: FragmentId { cube, index },
                cube,
                relative_index: index,
            })
            .collect(),
    )?;
    Ok(())
}

fn seed_demo_cube(
    catalog: &MemCatalog,
    store: &MemFragmentStore,
    fragments: u64,
) -> Result<CubeId, Box<dyn std::error::Error>> {
    let container = catalog.create_container("demo")?;
    let cube = catalog.create_cube(container, &format!("1-{fragments}"))?;
    seed_fragment_rows(catalog, store, cube, &FragmentRangeSet::from_contiguous(1, fragments)?)?;
    Ok(cube)
}

/// Load cube records from a JSON seed file and materialize their fragments.
fn load_seeded_catalog(
    path: &str,
    store: &MemFragmentStore,
) -> Result<(MemCatalog, CubeId), Box<dyn std::error::Error>> {
    let catalog = MemCatalog::load_from_json(path)?;
    let mut first = None;
    for row in catalog.cubes() {
        let set = FragmentRangeSet::parse(&row.fragment_set)?;
        seed_fragment_rows(&catalog, store, row.id, &set)?;
        first.get_or_insert(row.id);
    }
    let cube = first.ok_or("catalog seed file contains no cubes")?;
    Ok((catalog, cube))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let operator = env_or_default("CBF_OPERATOR", "duplicate");
    let group_size = env_usize_or_default("CBF_GROUP_SIZE", 2).max(1);
    let worker_threads = env_usize_or_default("CBF_WORKER_THREADS", 2);
    let fragments = env_u64_or_default("CBF_FRAGMENTS", 8).max(1);
    let extra_params = env::var("CBF_PARAMS").ok();
    let catalog_path = env::var("CBF_CATALOG_PATH").ok();

    let store = Arc::new(MemFragmentStore::new());
    let (catalog, mut cube) = match catalog_path {
        Some(path) => {
            let (catalog, cube) = load_seeded_catalog(&path, &store)?;
            (Arc::new(catalog), cube)
        }
        None => {
            let catalog = Arc::new(MemCatalog::new());
            let cube = seed_demo_cube(&catalog, &store, fragments)?;
            (catalog, cube)
        }
    };
    if let Some(chosen) = env::var("CBF_CUBE").ok().and_then(|v| v.parse::<u64>().ok()) {
        cube = CubeId(chosen);
    }

    let registry = Arc::new(OperatorRegistry::default());
    register_builtin_operators(&registry);

    let mut params = OperatorParams::new();
    params.insert("cube".to_string(), cube.to_string());
    if let Some(raw) = extra_params {
        for pair in raw.split(',').filter(|p| !p.is_empty()) {
            if let Some((k, v)) = pair.split_once('=') {
                params.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
    }

    let config = EngineConfig {
        worker_threads,
        ..EngineConfig::default()
    };

    println!(
        "cbf-run starting (operator={operator}, group_size={group_size}, worker_threads={worker_threads}, fragments={fragments}, cube={cube})"
    );

    let members = LocalGroup::new_group(group_size);
    let outcomes: Vec<RunOutcome> = thread::scope(|s| {
        let handles: Vec<_> = members
            .into_iter()
            .map(|comm| {
                let engine = EngineCtx {
                    config: config.clone(),
                    comm: Arc::new(comm),
                    catalog: Arc::clone(&catalog) as Arc<dyn CatalogStore>,
                    store: Arc::clone(&store) as Arc<dyn FragmentStore>,
                };
                let registry = Arc::clone(&registry);
                let operator = operator.clone();
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
    });

    for (rank, outcome) in outcomes.iter().enumerate() {
        for line in &outcome.output_lines {
            println!("[rank {rank}] {line}");
        }
    }
    let verdict = outcomes[0].verdict;
    if verdict.failed {
        return Err(format!("operator {operator} failed with code {}", verdict.code).into());
    }
    if let Some(output) = outcomes[0].output_cube {
        println!("output cube: {output}");
    }
    println!("operator {operator} succeeded");
    Ok(())
}
