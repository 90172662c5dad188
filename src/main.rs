use metarepo::config::CONFIG;
use metarepo::db::{self, MetadataTables};
use metarepo::meta::{Declarations, MetaDataService, SystemEntityTypePersister, SystemRegistry};
use metarepo::MetadataResult;
use mimalloc::MiMalloc;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = &CONFIG;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        database_url = %cfg.basic.database_url,
        loglevel = %cfg.basic.loglevel,
        default_backend = %cfg.metadata.default_backend,
        reset_on_empty_attributes = cfg.metadata.reset_on_empty_attributes,
        declarations = %cfg
            .metadata
            .declarations
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string()),
    );

    if let Err(err) = run().await {
        if err.is_declaration_error() {
            error!(error = %err, "System declarations are inconsistent");
        } else {
            error!(error = %err, "Metadata bootstrap failed");
        }
        return Err(err.into());
    }
    Ok(())
}

async fn run() -> MetadataResult<()> {
    let cfg = &CONFIG;
    let pool = db::connect(&cfg.basic.database_url).await?;
    let service = Arc::new(MetaDataService::new(pool.clone(), &cfg.metadata));

    let (tables, added) = service.create_and_upgrade_metadata_tables().await?;
    match tables {
        MetadataTables::Created => info!("Initialized empty metadata store"),
        MetadataTables::Recreated => info!("Reset metadata store"),
        MetadataTables::Existing => info!(upgraded_columns = added.len(), "Opened metadata store"),
    }

    let mut builder = SystemRegistry::builder();
    if let Some(path) = cfg.metadata.declarations.as_ref() {
        builder = builder.declarations(Declarations::from_file(path).await?);
    }
    let registry = builder.build()?;

    let summary = SystemEntityTypePersister::new(service, registry)
        .persist()
        .await?;
    info!(
        created = ?summary.created_repositories,
        removed = ?summary.removed_entity_types,
        "System metadata is up to date"
    );

    pool.close().await;
    Ok(())
}
