use async_trait::async_trait;
use event_log::FulfillmentEvent;

use crate::{StoreError, repository::StoreTx};

/// The value of a committed unit of work and the events it wrote.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,
    pub events: Vec<FulfillmentEvent>,
}

impl<T> Committed<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Committed<U> {
        Committed {
            value: f(self.value),
            events: self.events,
        }
    }
}

/// A store that runs sequences of writes as single atomic units.
///
/// Units of work against the same store are serializable: a unit observes
/// every unit committed before it and none committed after it started. A
/// unit either commits all of its entity writes and staged events or none.
#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    /// The repository surface handed to units of work.
    type Tx: StoreTx + Send;

    /// Runs `f` as one unit of work.
    ///
    /// If `f` fails, or the staged events cannot be appended to the log,
    /// nothing is committed.
    async fn transaction<T, E, F>(&self, f: F) -> Result<Committed<T>, E>
    where
        F: FnOnce(&mut Self::Tx) -> Result<T, E> + Send,
        T: Send,
        E: From<StoreError> + Send;

    /// Runs a read-only closure against a consistent snapshot.
    async fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Self::Tx) -> T + Send,
        T: Send;
}
