mod common;

use metarepo::db::MetadataTables;
use metarepo::meta::{SystemEntityTypePersister, SystemRegistry};
use metarepo_model::meta;

#[tokio::test]
async fn fresh_database_gets_metadata_tables() {
    let database_url = common::temp_database_url("bootstrap_fresh");
    let (pool, service) = common::open(&database_url, true).await;

    let (tables, added) = service.create_and_upgrade_metadata_tables().await.unwrap();
    assert_eq!(tables, MetadataTables::Created);
    assert!(added.is_empty(), "fresh tables already carry every column");
    assert_eq!(
        common::metadata_table_order(&pool).await,
        meta::META_ENTITY_TYPES.to_vec()
    );

    let registry = SystemRegistry::builder().build().unwrap();
    let summary = SystemEntityTypePersister::new(service.clone(), registry)
        .persist()
        .await
        .unwrap();
    assert_eq!(summary.entity_types, 3);
    assert!(summary.created_repositories.is_empty());

    // The metadata tables describe themselves once persisted.
    let persisted = service.get_entity_types().await.unwrap();
    let names: Vec<&str> = persisted.iter().map(|e| e.name.as_str()).collect();
    for name in meta::META_ENTITY_TYPES {
        assert!(names.contains(&name), "{name} not persisted");
    }
    let attribute = service
        .get_entity_type(meta::ATTRIBUTE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attribute.id_attribute.as_deref(), Some(meta::attribute::ID));
    assert!(common::row_count(&pool, meta::ATTRIBUTE).await > 0);

    let (tables, added) = service.create_and_upgrade_metadata_tables().await.unwrap();
    assert_eq!(tables, MetadataTables::Existing);
    assert!(added.is_empty());
}

#[tokio::test]
async fn empty_attribute_table_resets_metadata() {
    let database_url = common::temp_database_url("bootstrap_reset");
    let (pool, service) = common::open(&database_url, true).await;
    service.create_and_upgrade_metadata_tables().await.unwrap();

    sqlx::query("INSERT INTO \"sys_md_Package\" (\"id\", \"name\") VALUES ('stale', 'stale')")
        .execute(&pool)
        .await
        .unwrap();

    let (tables, _) = service.create_and_upgrade_metadata_tables().await.unwrap();
    assert_eq!(tables, MetadataTables::Recreated);
    assert_eq!(common::row_count(&pool, meta::PACKAGE).await, 0);
    assert_eq!(
        common::metadata_table_order(&pool).await,
        vec![meta::PACKAGE, meta::ENTITY_TYPE, meta::ATTRIBUTE]
    );
}

#[tokio::test]
async fn disabled_reset_keeps_leftover_rows() {
    let database_url = common::temp_database_url("bootstrap_no_reset");
    let (pool, service) = common::open(&database_url, false).await;
    service.create_and_upgrade_metadata_tables().await.unwrap();

    sqlx::query("INSERT INTO \"sys_md_Package\" (\"id\", \"name\") VALUES ('stale', 'stale')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("DROP TABLE \"sys_md_Attribute\"")
        .execute(&pool)
        .await
        .unwrap();

    let (tables, _) = service.create_and_upgrade_metadata_tables().await.unwrap();
    assert_eq!(tables, MetadataTables::Existing);
    assert_eq!(common::row_count(&pool, meta::PACKAGE).await, 1);
    assert!(common::table_exists(&pool, meta::ATTRIBUTE).await);
}

#[tokio::test]
async fn legacy_attribute_table_is_upgraded_once() {
    let database_url = common::temp_database_url("bootstrap_upgrade");
    let (pool, service) = common::open(&database_url, true).await;
    service.create_and_upgrade_metadata_tables().await.unwrap();
    let registry = SystemRegistry::builder().build().unwrap();
    SystemEntityTypePersister::new(service.clone(), registry)
        .persist()
        .await
        .unwrap();

    // Strip the columns a first-release installation did not have.
    for column in meta::UPGRADABLE_ATTRIBUTE_COLUMNS {
        sqlx::query(&format!("ALTER TABLE \"sys_md_Attribute\" DROP COLUMN \"{column}\""))
            .execute(&pool)
            .await
            .unwrap();
    }

    let (tables, added) = service.create_and_upgrade_metadata_tables().await.unwrap();
    assert_eq!(tables, MetadataTables::Existing);
    assert_eq!(added.len(), meta::UPGRADABLE_ATTRIBUTE_COLUMNS.len());
    for column in meta::UPGRADABLE_ATTRIBUTE_COLUMNS {
        assert!(added.iter().any(|c| c == column), "{column} not added");
    }

    let unique_flags: Vec<bool> = sqlx::query_scalar("SELECT \"unique\" FROM \"sys_md_Attribute\"")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert!(!unique_flags.is_empty());
    assert!(unique_flags.iter().all(|flag| !flag));

    let (_, added) = service.create_and_upgrade_metadata_tables().await.unwrap();
    assert!(added.is_empty(), "second upgrade must be a no-op");
}
