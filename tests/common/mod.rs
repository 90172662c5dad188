#![allow(dead_code)]

use metarepo::config::MetadataConfig;
use metarepo::db;
use metarepo::meta::MetaDataService;
use sqlx::SqlitePool;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::SystemTime;

/// URL of a fresh database file in the temp directory.
pub fn temp_database_url(prefix: &str) -> String {
    let tmp_dir = std::env::temp_dir();
    let mut hasher = DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    prefix.hash(&mut hasher);
    let db_file_name = format!("test_{prefix}_{}.sqlite", hasher.finish());
    let db_path = tmp_dir.join(db_file_name);
    format!("sqlite:{}", db_path.to_str().unwrap())
}

pub async fn open(database_url: &str, reset_on_empty_attributes: bool) -> (SqlitePool, Arc<MetaDataService>) {
    let pool = db::connect(database_url).await.unwrap();
    let config = MetadataConfig {
        reset_on_empty_attributes,
        ..MetadataConfig::default()
    };
    let service = Arc::new(MetaDataService::new(pool.clone(), &config));
    (pool, service)
}

pub async fn table_exists(pool: &SqlitePool, table: &str) -> bool {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(pool)
            .await
            .unwrap();
    count > 0
}

pub async fn row_count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{table}\""))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Metadata tables in creation order.
pub async fn metadata_table_order(pool: &SqlitePool) -> Vec<String> {
    sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'sys_md_%' ORDER BY rowid",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}
