use serde::{Deserialize, Serialize};

use crate::entity::EntityRef;
use crate::error::Result;
use crate::query::QueryPlan;

/// When a session pushes its changes to the backing store on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Every transaction flush is propagated to the store.
    #[default]
    Auto,
    /// Changes stay with the session until its owner commits it.
    Commit,
}

/// A handle on the persistence engine. Sessions are acquired and released by
/// the caller; a transaction only borrows one.
pub trait Session {
    fn persist(&mut self, entity: &EntityRef) -> Result<()>;
    fn merge(&mut self, entity: &EntityRef) -> Result<()>;
    fn remove(&mut self, entity: &EntityRef) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn flush_mode(&self) -> FlushMode;
    /// Runs a fetch plan and materializes its rows.
    fn fetch(&mut self, plan: &QueryPlan) -> Result<Vec<EntityRef>>;
    /// Runs a count plan.
    fn count(&mut self, plan: &QueryPlan) -> Result<u64>;
}
