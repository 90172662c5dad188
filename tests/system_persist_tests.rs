mod common;

use metarepo::MetadataError;
use metarepo::meta::{SystemEntityTypePersister, SystemRegistry};
use metarepo_model::{Attribute, AttributeType, EntityType, Package, meta};

fn settings_package() -> Package {
    Package::new("sys_set").parent(meta::PACKAGE_SYSTEM)
}

fn setting() -> EntityType {
    EntityType::new("sys_set_Setting")
        .package("sys_set")
        .id_attribute(Attribute::new("key", AttributeType::String))
        .attribute(Attribute::new("value", AttributeType::Text))
        .label_attribute("key")
}

fn with_settings() -> std::sync::Arc<SystemRegistry> {
    SystemRegistry::builder()
        .package(settings_package())
        .entity_type(setting())
        .build()
        .unwrap()
}

#[tokio::test]
async fn identifiers_survive_a_restart() {
    let database_url = common::temp_database_url("persist_ids");
    let (_pool, service) = common::open(&database_url, true).await;
    service.create_and_upgrade_metadata_tables().await.unwrap();

    let first = SystemEntityTypePersister::new(service.clone(), with_settings())
        .persist()
        .await
        .unwrap();
    assert_eq!(first.preserved_ids, 0);
    assert_eq!(first.created_repositories, vec!["sys_set_Setting".to_string()]);

    let package_id = service
        .get_packages()
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.name == "sys_set")
        .unwrap()
        .id;
    let persisted = service
        .get_entity_type("sys_set_Setting")
        .await
        .unwrap()
        .unwrap();

    // Fresh declarations carry freshly generated ids.
    let restarted = with_settings();
    assert_ne!(restarted.entity_type("sys_set_Setting").unwrap().id, persisted.id);

    let second = SystemEntityTypePersister::new(service.clone(), restarted)
        .persist()
        .await
        .unwrap();
    assert!(second.preserved_ids > 0);
    assert!(second.created_repositories.is_empty());
    assert!(second.removed_entity_types.is_empty());

    let reloaded = service
        .get_entity_type("sys_set_Setting")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.id, persisted.id);
    for attribute in &persisted.attributes {
        assert_eq!(
            reloaded.get_attribute(&attribute.name).unwrap().id,
            attribute.id,
            "{}",
            attribute.name
        );
    }
    let package = service
        .get_packages()
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.name == "sys_set")
        .unwrap();
    assert_eq!(package.id, package_id);
}

#[tokio::test]
async fn only_system_orphans_are_removed() {
    let database_url = common::temp_database_url("persist_orphans");
    let (pool, service) = common::open(&database_url, true).await;
    service.create_and_upgrade_metadata_tables().await.unwrap();
    SystemEntityTypePersister::new(service.clone(), with_settings())
        .persist()
        .await
        .unwrap();

    service
        .upsert_packages(vec![Package::new("app")])
        .await
        .unwrap();
    service
        .upsert_entity_types(vec![
            EntityType::new("app_Note")
                .package("app")
                .id_attribute(Attribute::new("id", AttributeType::Int))
                .attribute(Attribute::new("body", AttributeType::Text)),
        ])
        .await
        .unwrap();

    let bare = SystemRegistry::builder().build().unwrap();
    let summary = SystemEntityTypePersister::new(service.clone(), bare)
        .persist()
        .await
        .unwrap();
    assert_eq!(summary.removed_entity_types, vec!["sys_set_Setting".to_string()]);
    assert_eq!(summary.removed_packages, vec!["sys_set".to_string()]);
    assert!(summary.kept_packages.is_empty());

    assert!(!common::table_exists(&pool, "sys_set_Setting").await);
    assert!(common::table_exists(&pool, "app_Note").await);
    assert!(service.get_entity_type("app_Note").await.unwrap().is_some());
    assert!(service.get_entity_type("sys_set_Setting").await.unwrap().is_none());
    let packages: Vec<String> = service
        .get_packages()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert!(packages.contains(&"app".to_string()));
    assert!(!packages.contains(&"sys_set".to_string()));
}

#[tokio::test]
async fn nested_orphan_packages_are_removed_deepest_first() {
    let database_url = common::temp_database_url("persist_kept");
    let (_pool, service) = common::open(&database_url, true).await;
    service.create_and_upgrade_metadata_tables().await.unwrap();
    SystemEntityTypePersister::new(service.clone(), with_settings())
        .persist()
        .await
        .unwrap();

    service
        .upsert_packages(vec![Package::new("sys_set_custom").parent("sys_set")])
        .await
        .unwrap();

    let bare = SystemRegistry::builder().build().unwrap();
    let summary = SystemEntityTypePersister::new(service.clone(), bare)
        .persist()
        .await
        .unwrap();
    assert_eq!(summary.removed_entity_types, vec!["sys_set_Setting".to_string()]);
    assert_eq!(
        summary.removed_packages,
        vec!["sys_set_custom".to_string(), "sys_set".to_string()]
    );
    assert!(summary.kept_packages.is_empty());
}

#[tokio::test]
async fn cyclic_declarations_are_rejected() {
    let database_url = common::temp_database_url("persist_cycle");
    let (_pool, service) = common::open(&database_url, true).await;
    service.create_and_upgrade_metadata_tables().await.unwrap();

    let registry = SystemRegistry::builder()
        .package(settings_package())
        .entity_type(
            EntityType::new("sys_set_A")
                .package("sys_set")
                .id_attribute(Attribute::new("id", AttributeType::String))
                .attribute(Attribute::xref("b", "sys_set_B")),
        )
        .entity_type(
            EntityType::new("sys_set_B")
                .package("sys_set")
                .id_attribute(Attribute::new("id", AttributeType::String))
                .attribute(Attribute::xref("a", "sys_set_A")),
        )
        .build()
        .unwrap();

    let err = SystemEntityTypePersister::new(service.clone(), registry)
        .persist()
        .await
        .unwrap_err();
    assert!(err.is_declaration_error());
    assert!(matches!(
        err,
        MetadataError::DependencyCycle(members) if members == vec!["sys_set_A", "sys_set_B"]
    ));
    assert!(service.get_entity_type("sys_set_A").await.unwrap().is_none());
    let packages = service.get_packages().await.unwrap();
    assert!(packages.iter().all(|p| p.name != "sys_set"));
}
