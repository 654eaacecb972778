use tracing::{debug, error, warn};

use crate::entity::EntityRef;
use crate::error::{Error, Result};
use crate::session::{FlushMode, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Flushed,
    Closed,
    RolledBack,
}

/// A mutation waiting for the next flush.
#[derive(Debug, Clone)]
pub enum PendingOperation {
    Create(EntityRef),
    Save(EntityRef),
    Delete(EntityRef),
}

impl PendingOperation {
    pub fn entity(&self) -> &EntityRef {
        match self {
            PendingOperation::Create(e) | PendingOperation::Save(e) | PendingOperation::Delete(e) => e,
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            PendingOperation::Create(_) => "create",
            PendingOperation::Save(_) => "save",
            PendingOperation::Delete(_) => "delete",
        }
    }
    fn apply<S: Session + ?Sized>(&self, session: &mut S) -> Result<()> {
        match self {
            PendingOperation::Create(e) => session.persist(e),
            PendingOperation::Save(e) => session.merge(e),
            PendingOperation::Delete(e) => session.remove(e),
        }
    }
}

/// Pending mutations in submission order, together with the transaction state.
/// Nothing reaches the session before [`TransactionBuffer::flush`].
#[derive(Debug)]
pub struct TransactionBuffer {
    state: TransactionState,
    pending: Vec<PendingOperation>,
}

impl Default for TransactionBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionBuffer {
    pub fn new() -> Self {
        Self { state: TransactionState::Open, pending: Vec::new() }
    }
    pub fn state(&self) -> TransactionState {
        self.state
    }
    pub fn pending(&self) -> &[PendingOperation] {
        &self.pending
    }
    pub fn len(&self) -> usize {
        self.pending.len()
    }
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Appends an operation. The same entity enqueued twice is applied twice.
    pub fn enqueue(&mut self, operation: PendingOperation) -> Result<()> {
        match self.state {
            TransactionState::Open => {}
            TransactionState::Flushed => self.state = TransactionState::Open,
            TransactionState::RolledBack | TransactionState::Closed => {
                return Err(Error::InvalidState(format!(
                    "Cannot {} in a transaction that is {:?}",
                    operation.name(),
                    self.state
                )));
            }
        }
        self.pending.push(operation);
        Ok(())
    }

    /// Applies every pending operation in order, clears them, and lets the
    /// session propagate the changes when its flush mode is automatic.
    /// After a failure the pending operations are in no particular state and
    /// the transaction should be rolled back.
    pub fn flush<S: Session + ?Sized>(&mut self, session: &mut S) -> Result<()> {
        if matches!(self.state, TransactionState::Closed | TransactionState::RolledBack) {
            return Err(Error::InvalidState(format!("Cannot flush a transaction that is {:?}", self.state)));
        }
        let applied = self.pending.len();
        let outcome = self
            .pending
            .iter()
            .try_for_each(|operation| operation.apply(session))
            .and_then(|_| {
                self.pending.clear();
                match session.flush_mode() {
                    FlushMode::Auto => session.flush(),
                    FlushMode::Commit => Ok(()),
                }
            });
        match outcome {
            Ok(()) => {
                debug!(operations = applied, "flushed");
                self.state = TransactionState::Flushed;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Caught session failure during flush");
                Err(match e {
                    e @ Error::QueryExecution { .. } => e,
                    other => Error::QueryExecution {
                        message: format!("Flush failed: {other}"),
                        source: Some(Box::new(other)),
                    },
                })
            }
        }
    }

    /// Discards pending operations. Work that was already flushed stays.
    pub fn rollback(&mut self) {
        if !self.pending.is_empty() {
            debug!(operations = self.pending.len(), "discarding pending operations");
        }
        self.pending.clear();
        if self.state != TransactionState::Closed {
            self.state = TransactionState::RolledBack;
        }
    }

    pub fn close(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            let pending = self.pending.len();
            warn!(pending, "transaction closed with pending operations, rolling back");
            self.rollback();
            return Err(Error::TransactionNotClosed { pending });
        }
        self.state = TransactionState::Closed;
        Ok(())
    }
}
