use overlay_policy_index::{denorm, EntityType, PolicyKind};
use overlay_policy_store::Db;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::sync::Arc;

/// Reports the size of the committed snapshot.
struct Instrumented(Arc<Db>);

pub fn register(reg: &mut Registry, db: Arc<Db>) {
    reg.register_collector(Box::new(Instrumented(db)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let state = self.0.view();

        let mut policies_encoder = encoder.encode_descriptor(
            "policy_index_size",
            "The number of policies in the index",
            None,
            MetricType::Gauge,
        )?;
        for kind in PolicyKind::all() {
            let labels = [("kind", kind.name)];
            let policies = ConstGauge::new(state.count(kind.bucket) as i64);
            let policies_encoder = policies_encoder.encode_family(&labels)?;
            policies.encode(policies_encoder)?;
        }

        let mut entities_encoder = encoder.encode_descriptor(
            "entity_index_size",
            "The number of entities in the index",
            None,
            MetricType::Gauge,
        )?;
        for target in EntityType::ALL {
            let labels = [("type", target.name())];
            let entities = ConstGauge::new(state.count(target.bucket()) as i64);
            let entities_encoder = entities_encoder.encode_family(&labels)?;
            entities.encode(entities_encoder)?;
        }

        let mut pairs_encoder = encoder.encode_descriptor(
            "denormalized_pairs",
            "The number of entity pairs linked by at least one policy",
            None,
            MetricType::Gauge,
        )?;
        for collection in denorm::ALL {
            let labels = [("collection", collection.name)];
            let pairs = ConstGauge::new(collection.len(&state) as i64);
            let pairs_encoder = pairs_encoder.encode_family(&labels)?;
            pairs.encode(pairs_encoder)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Instrumented {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Instrumented").finish()
    }
}
