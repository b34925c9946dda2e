use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagehand_core::allocation::{AllocationService, PoolSpec};
use stagehand_core::app::{ConflictRetry, ControlPlaneBuilder, StartRequest};
use stagehand_core::config::ControlPlaneConfig;
use stagehand_core::domain::TaskStage;
use stagehand_core::impls::{InMemoryAdapter, InMemoryDocumentStore};
use stagehand_core::ports::{DocumentStore, SystemClock};
use stagehand_core::workflows::{
    REFERENCE_TASK_TYPES, RequestBroker, RequestPayload, register_reference_workflows,
};

const DEMO_POOL: &str = "/resources/subnet-pools/demo";

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Stagehand - provisioning task runtime with lineage queries", long_about = None)]
struct Cli {
    /// TOML config file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one provisioning request end to end and print its request graph
    Demo {
        #[arg(long, value_enum, default_value_t = Kind::Container)]
        resource_type: Kind,

        /// Number of containers to provision
        #[arg(long, default_value_t = 2)]
        count: u32,

        /// Hosts in the in-memory resource pool
        #[arg(long, default_value_t = 3)]
        hosts: usize,

        /// Network the demo subnet pool is carved from
        #[arg(long, default_value = "10.0.0.0/16")]
        network: String,
    },
    /// Allocate one subnet per key concurrently and print the pool state
    Allocate {
        #[arg(long, default_value = "10.0.0.0/16")]
        network: String,

        #[arg(long, default_value_t = 24)]
        prefix: u8,

        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Container,
    Network,
}

fn load_config(path: Option<&PathBuf>) -> Result<ControlPlaneConfig> {
    match path {
        Some(path) => ControlPlaneConfig::load(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(ControlPlaneConfig::default()),
    }
}

async fn demo(
    config: ControlPlaneConfig,
    kind: Kind,
    count: u32,
    hosts: usize,
    network: String,
) -> Result<()> {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new(Arc::new(SystemClock)));
    let adapter = Arc::new(InMemoryAdapter::single_pool(hosts));
    let allocations = Arc::new(AllocationService::new(
        store.clone(),
        ConflictRetry::from(&config.conflict_retry),
    ));

    let control_plane = register_reference_workflows(
        ControlPlaneBuilder::new(store.clone()).with_config(config),
        adapter,
        allocations.clone(),
    )?
    .expect_tasks(REFERENCE_TASK_TYPES)
    .build()?;
    let sweeper = control_plane.spawn_sweeper();

    let payload = match kind {
        Kind::Container => {
            RequestPayload::containers("/resources/container-descriptions/demo", count)
        }
        Kind::Network => {
            let pool = allocations
                .create_pool(PoolSpec {
                    pool_link: DEMO_POOL.into(),
                    network_cidr: network,
                    prefix_length: 24,
                })
                .await?;
            RequestPayload::network("/resources/network-descriptions/demo", pool.as_str())
        }
    };

    let runtime = &control_plane.runtime;
    let link = runtime
        .start(StartRequest::<RequestBroker>::new(payload))
        .await?;
    info!(%link, "Started request");

    let done = runtime.wait_for_terminal(&link, Duration::from_secs(30)).await?;
    let graph = control_plane.lineage.request_graph(&link).await?;
    println!("{}", serde_json::to_string_pretty(&graph)?);

    sweeper.shutdown_and_join().await;
    if done.stage != TaskStage::Finished {
        bail!("request {link} ended in {}", done.stage);
    }
    Ok(())
}

async fn allocate(
    config: ControlPlaneConfig,
    network: String,
    prefix: u8,
    keys: Vec<String>,
) -> Result<()> {
    let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new(Arc::new(SystemClock)));
    let allocations = Arc::new(AllocationService::new(
        store,
        ConflictRetry::from(&config.conflict_retry),
    ));
    let pool = allocations
        .create_pool(PoolSpec {
            pool_link: DEMO_POOL.into(),
            network_cidr: network,
            prefix_length: prefix,
        })
        .await?;

    let handles: Vec<_> = keys
        .into_iter()
        .map(|key| {
            let allocations = allocations.clone();
            let pool = pool.clone();
            tokio::spawn(async move {
                let subnet = allocations.allocate(&pool, &key).await;
                (key, subnet)
            })
        })
        .collect();

    for handle in handles {
        let (key, subnet) = handle.await?;
        match subnet {
            Ok(subnet) => info!(key, subnet, "Allocated"),
            Err(e) => eprintln!("{key}: {e}"),
        }
    }

    let state = allocations.state(&pool).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Demo {
            resource_type,
            count,
            hosts,
            network,
        } => demo(config, resource_type, count, hosts, network).await?,
        Commands::Allocate {
            network,
            prefix,
            keys,
        } => allocate(config, network, prefix, keys).await?,
    }

    Ok(())
}
