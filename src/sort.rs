use crate::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

/// Sort keys, applied left to right.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sorting {
    keys: Vec<(Path, SortOrder)>,
}

impl Sorting {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn by(mut self, path: Path, order: SortOrder) -> Self {
        self.keys.push((path, order));
        self
    }
    pub fn keys(&self) -> &[(Path, SortOrder)] {
        &self.keys
    }
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
