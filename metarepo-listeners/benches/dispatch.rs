use criterion::{Criterion, black_box, criterion_group, criterion_main};
use metarepo_listeners::{EntityListener, EntityListenersService, ListenerFailure};
use metarepo_model::{Entity, EntityId};
use std::sync::Arc;

struct NoopListener(EntityId);

impl EntityListener for NoopListener {
    fn entity_id(&self) -> &EntityId {
        &self.0
    }

    fn post_update(&self, entity: &Entity) -> Result<(), ListenerFailure> {
        black_box(entity);
        Ok(())
    }
}

fn bench_dispatch(c: &mut Criterion) {
    let service = EntityListenersService::new();
    service.register("Person");
    for id in 0..1_000_i64 {
        service
            .add_entity_listener("Person", Arc::new(NoopListener(EntityId::Int(id))))
            .unwrap();
    }
    let hit = Entity::new("Person", "id").with("id", 500);
    let miss = Entity::new("Person", "id").with("id", 5_000);

    c.bench_function("update_entity_hit", |b| {
        b.iter(|| service.update_entity("Person", black_box(&hit)).unwrap());
    });
    c.bench_function("update_entity_miss", |b| {
        b.iter(|| service.update_entity("Person", black_box(&miss)).unwrap());
    });
    c.bench_function("update_entities_1000", |b| {
        b.iter(|| {
            let batch = (0..1_000_i64).map(|id| Entity::new("Person", "id").with("id", id));
            service
                .update_entities("Person", batch)
                .unwrap()
                .filter(Result::is_ok)
                .count()
        });
    });
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
