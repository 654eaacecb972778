use crate::error::{Error, Result};

/// A page window plus the cell the total row count is written back into.
#[derive(Debug, Clone, PartialEq)]
pub struct Pagination {
    offset: u64,
    limit: u64,
    generate_totals: bool,
    page_totals: Option<u64>,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u64 = 500;
    pub const MAX_LIMIT: u64 = 10_000;

    pub fn new(offset: u64, limit: u64) -> Result<Self> {
        if limit == 0 || limit > Self::MAX_LIMIT {
            return Err(Error::Pagination(format!(
                "Limit must be between 1 and {}, got {limit}",
                Self::MAX_LIMIT
            )));
        }
        Ok(Self { offset, limit, generate_totals: false, page_totals: None })
    }
    /// Page numbers start at one.
    pub fn from_page(number: u64, size: u64) -> Result<Self> {
        if number == 0 {
            return Err(Error::Pagination("Page numbers start at 1".to_owned()));
        }
        let offset = (number - 1)
            .checked_mul(size)
            .ok_or_else(|| Error::Pagination(format!("Page {number} of size {size} is out of range")))?;
        Self::new(offset, size)
    }
    pub fn with_totals(mut self) -> Self {
        self.generate_totals = true;
        self
    }
    pub fn offset(&self) -> u64 {
        self.offset
    }
    pub fn limit(&self) -> u64 {
        self.limit
    }
    pub fn generate_totals(&self) -> bool {
        self.generate_totals
    }
    pub fn page_totals(&self) -> Option<u64> {
        self.page_totals
    }
    pub fn set_page_totals(&mut self, totals: u64) {
        self.page_totals = Some(totals);
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { offset: 0, limit: Self::DEFAULT_LIMIT, generate_totals: false, page_totals: None }
    }
}
