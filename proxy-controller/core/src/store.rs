use crate::aggregate::Aggregate;
use parking_lot::RwLock;
use std::sync::Arc;

/// Holds the aggregate snapshot that admission dispatch reads from.
///
/// Writers replace the whole snapshot; readers clone the current `Arc` and
/// never observe a partially built aggregate.
pub trait AggregateStore: Send + Sync {
    fn get(&self) -> Arc<Aggregate>;

    fn publish(&self, snapshot: Arc<Aggregate>);
}

#[derive(Clone, Debug, Default)]
pub struct SharedAggregate(Arc<RwLock<Arc<Aggregate>>>);

// === impl SharedAggregate ===

impl SharedAggregate {
    pub fn new(initial: Aggregate) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(initial))))
    }
}

impl AggregateStore for SharedAggregate {
    fn get(&self) -> Arc<Aggregate> {
        self.0.read().clone()
    }

    fn publish(&self, snapshot: Arc<Aggregate>) {
        *self.0.write() = snapshot;
    }
}

impl<S: AggregateStore + ?Sized> AggregateStore for Arc<S> {
    fn get(&self) -> Arc<Aggregate> {
        (**self).get()
    }

    fn publish(&self, snapshot: Arc<Aggregate>) {
        (**self).publish(snapshot)
    }
}
