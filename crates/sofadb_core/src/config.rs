//! Database configuration.

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Adapter to open with. `None` picks the first valid registered one.
    pub adapter: Option<String>,

    /// Maximum number of revisions kept on any path of a revision tree.
    /// 0 disables stemming.
    pub revs_limit: u64,

    /// Whether every write compacts the documents it touched.
    pub auto_compaction: bool,

    /// Non-leaf revisions within this distance of a leaf keep their bodies
    /// during compaction.
    pub compaction_retention: u64,

    /// Rows fetched per batch by document range scans.
    pub cursor_batch_size: usize,

    /// Rows fetched per batch by the change feed.
    pub changes_batch_size: usize,

    /// Whether new revision hashes derive from document content.
    /// When false a random hash is used.
    pub deterministic_revs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adapter: None,
            revs_limit: 1000,
            auto_compaction: false,
            compaction_retention: 0,
            cursor_batch_size: 50,
            changes_batch_size: 50,
            deterministic_revs: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects an adapter by name.
    #[must_use]
    pub fn adapter(mut self, name: impl Into<String>) -> Self {
        self.adapter = Some(name.into());
        self
    }

    /// Sets the revision stemming limit.
    #[must_use]
    pub const fn revs_limit(mut self, limit: u64) -> Self {
        self.revs_limit = limit;
        self
    }

    /// Sets whether writes compact in place.
    #[must_use]
    pub const fn auto_compaction(mut self, value: bool) -> Self {
        self.auto_compaction = value;
        self
    }

    /// Sets how close to a leaf a revision must be to survive compaction.
    #[must_use]
    pub const fn compaction_retention(mut self, depth: u64) -> Self {
        self.compaction_retention = depth;
        self
    }

    /// Sets the batch size for document range scans.
    #[must_use]
    pub const fn cursor_batch_size(mut self, size: usize) -> Self {
        self.cursor_batch_size = size;
        self
    }

    /// Sets the batch size for change feed scans.
    #[must_use]
    pub const fn changes_batch_size(mut self, size: usize) -> Self {
        self.changes_batch_size = size;
        self
    }

    /// Sets whether revision hashes are content-derived.
    #[must_use]
    pub const fn deterministic_revs(mut self, value: bool) -> Self {
        self.deterministic_revs = value;
        self
    }
}
