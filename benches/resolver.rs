use criterion::{Criterion, criterion_group, criterion_main};
use metarepo::meta::resolve_names;
use metarepo_model::{Attribute, AttributeType, EntityType};
use std::hint::black_box;

/// Reverse-declared chains with cross references, `width` chains of `depth`.
fn declarations(width: usize, depth: usize) -> Vec<EntityType> {
    let mut entity_types = Vec::with_capacity(width * depth);
    for chain in 0..width {
        for level in (0..depth).rev() {
            let mut entity_type = EntityType::new(format!("bench_{chain}_{level}"))
                .id_attribute(Attribute::new("id", AttributeType::String));
            if level > 0 {
                entity_type = entity_type
                    .attribute(Attribute::xref("parent", format!("bench_{chain}_{}", level - 1)));
            }
            if chain > 0 {
                entity_type = entity_type
                    .attribute(Attribute::xref("peer", format!("bench_{}_{level}", chain - 1)));
            }
            entity_types.push(entity_type);
        }
    }
    entity_types
}

fn bench_resolve(c: &mut Criterion) {
    let small = declarations(10, 10);
    let large = declarations(40, 25);

    c.bench_function("resolve_100", |b| {
        b.iter(|| resolve_names(black_box(&small)).unwrap())
    });
    c.bench_function("resolve_1000", |b| {
        b.iter(|| resolve_names(black_box(&large)).unwrap())
    });
}

criterion_group!(benches, bench_resolve);
criterion_main!(benches);
