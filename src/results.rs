use tracing::debug;

use crate::entity::EntityRef;
use crate::error::{Error, Result};
use crate::query::{QueryMode, QueryPlan};
use crate::session::Session;

/// A one-pass sequence of query results. Once consumed it cannot be restarted.
/// Rows are fetched eagerly when the query runs; the cursor is closed before
/// the first entity is handed out.
#[derive(Debug)]
pub struct ResultSet {
    rows: std::vec::IntoIter<EntityRef>,
}

impl ResultSet {
    pub fn new(rows: Vec<EntityRef>) -> Self {
        Self { rows: rows.into_iter() }
    }
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for ResultSet {
    type Item = EntityRef;
    fn next(&mut self) -> Option<EntityRef> {
        self.rows.next()
    }
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for ResultSet {}

/// A built plan bound to the session that will run it.
pub struct Query<'q, S: Session + ?Sized> {
    session: &'q mut S,
    plan: QueryPlan,
}

impl<'q, S: Session + ?Sized> Query<'q, S> {
    pub fn new(session: &'q mut S, plan: QueryPlan) -> Self {
        Self { session, plan }
    }
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }
    fn expect_mode(&self, mode: QueryMode) -> Result<()> {
        if self.plan.mode == mode {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "A {:?} query cannot be run as {:?}",
                self.plan.mode, mode
            )))
        }
    }
    /// Exactly one row, or `NotFound` / `AmbiguousResult`.
    pub fn single_result(self) -> Result<EntityRef> {
        self.expect_mode(QueryMode::Fetch)?;
        let mut rows = self.session.fetch(&self.plan)?;
        match rows.len() {
            0 => Err(Error::NotFound),
            1 => Ok(rows.remove(0)),
            n => Err(Error::AmbiguousResult { rows: n }),
        }
    }
    pub fn results(self) -> Result<ResultSet> {
        self.expect_mode(QueryMode::Fetch)?;
        let rows = self.session.fetch(&self.plan)?;
        debug!(entity = %self.plan.entity_type, rows = rows.len(), "fetched");
        Ok(ResultSet::new(rows))
    }
    pub fn count(self) -> Result<u64> {
        self.expect_mode(QueryMode::Count)?;
        self.session.count(&self.plan)
    }
}
