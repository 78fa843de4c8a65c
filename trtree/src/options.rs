use std::collections::HashMap;

use crate::rtree::{
    RTreeConfig, SpatialError, SpatialResult, DEFAULT_MAX_ENTRIES, DEFAULT_MIN_ENTRIES,
    DEFAULT_SCAN_BATCH_SIZE,
};

/// Key for the maximum number of entries per node.
pub const MAX_NODE_ENTRIES: &str = "max_node_entries";
/// Key for the minimum number of entries per non-root node.
pub const MIN_NODE_ENTRIES: &str = "min_node_entries";
/// Key for the number of row ids returned by one scan call.
pub const SCAN_BATCH_SIZE: &str = "scan_batch_size";
/// Key for reporting deletes of absent entries as errors.
pub const STRICT_DELETE: &str = "strict_delete";

const KNOWN_KEYS: [&str; 4] = [MAX_NODE_ENTRIES, MIN_NODE_ENTRIES, SCAN_BATCH_SIZE, STRICT_DELETE];

/// Untyped index options as handed over by the host.
///
/// IndexOptions is a plain key/value map. Keys are matched case-insensitively;
/// values are kept as strings until [`RTreeOptions::from_index_options`]
/// interprets them.
///
/// # Usage
/// ```rust
/// use trtree::{IndexOptions, RTreeOptions};
///
/// let options = IndexOptions::from_pairs([("MAX_NODE_ENTRIES", "16")]);
/// let typed = RTreeOptions::from_index_options(&options).unwrap();
/// assert_eq!(typed.get_max_entries(), 16);
/// assert_eq!(typed.get_min_entries(), 8);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    values: HashMap<String, String>,
}

impl IndexOptions {
    pub fn new() -> IndexOptions {
        IndexOptions {
            values: HashMap::new(),
        }
    }

    /// Creates options from key/value pairs.
    ///
    /// # Arguments
    /// * `pairs` - Any iterable of key/value pairs. Later pairs win over
    ///   earlier ones with the same key.
    pub fn from_pairs<I, K, V>(pairs: I) -> IndexOptions
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut options = IndexOptions::new();
        for (key, value) in pairs {
            options.set(key.as_ref(), value);
        }
        options
    }

    /// Sets `key` to `value`, replacing any earlier value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_ascii_lowercase(), value.into());
    }

    /// Returns the value stored under `key`, ignoring case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Typed options of an [`RTreeIndex`](crate::RTreeIndex).
///
/// # Characteristics
/// - **Builder style**: setters consume and return `self`
/// - **Validated lazily**: fanout bounds are checked by [`RTreeOptions::config`]
///   and when the index is created
/// - **Defaults**: M = 64, m = 32, scan batches of 2048, lenient deletes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RTreeOptions {
    max_entries: usize,
    min_entries: Option<usize>,
    scan_batch_size: usize,
    strict_delete: bool,
}

impl Default for RTreeOptions {
    fn default() -> Self {
        RTreeOptions {
            max_entries: DEFAULT_MAX_ENTRIES,
            min_entries: Some(DEFAULT_MIN_ENTRIES),
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
            strict_delete: false,
        }
    }
}

impl RTreeOptions {
    pub fn new() -> RTreeOptions {
        RTreeOptions::default()
    }

    /// Sets the maximum node fanout (M).
    ///
    /// Unless a minimum is set explicitly afterwards, the minimum follows as
    /// `M / 2`.
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self.min_entries = None;
        self
    }

    /// Sets the minimum fanout of non-root nodes (m).
    pub fn min_entries(mut self, min_entries: usize) -> Self {
        self.min_entries = Some(min_entries);
        self
    }

    pub fn scan_batch_size(mut self, scan_batch_size: usize) -> Self {
        self.scan_batch_size = scan_batch_size;
        self
    }

    /// Report deletes of absent entries with `NotFound` instead of ignoring them.
    pub fn strict_delete(mut self, strict_delete: bool) -> Self {
        self.strict_delete = strict_delete;
        self
    }

    /// Interprets host-provided options.
    ///
    /// # Arguments
    /// * `options` - Untyped options; absent keys keep their defaults.
    ///
    /// # Returns
    /// The typed options, or `InvalidArgument` when a recognized key holds a
    /// value that does not parse or a fanout bound is out of range.
    ///
    /// # Behavior
    /// Unknown keys are logged and ignored.
    pub fn from_index_options(options: &IndexOptions) -> SpatialResult<RTreeOptions> {
        for key in options.keys() {
            if !KNOWN_KEYS.contains(&key) {
                log::warn!("Ignoring unknown R-tree index option '{}'", key);
            }
        }

        let mut typed = RTreeOptions::default();
        if let Some(value) = options.get(MAX_NODE_ENTRIES) {
            typed = typed.max_entries(parse_usize(MAX_NODE_ENTRIES, value)?);
        }
        if let Some(value) = options.get(MIN_NODE_ENTRIES) {
            typed = typed.min_entries(parse_usize(MIN_NODE_ENTRIES, value)?);
        }
        if let Some(value) = options.get(SCAN_BATCH_SIZE) {
            typed = typed.scan_batch_size(parse_usize(SCAN_BATCH_SIZE, value)?);
        }
        if let Some(value) = options.get(STRICT_DELETE) {
            typed = typed.strict_delete(parse_bool(STRICT_DELETE, value)?);
        }

        typed.validate()?;
        Ok(typed)
    }

    /// Checks fanout bounds and batch size.
    pub fn validate(&self) -> SpatialResult<()> {
        self.config()?;
        if self.scan_batch_size == 0 {
            return Err(SpatialError::InvalidArgument(format!(
                "{} must be positive",
                SCAN_BATCH_SIZE
            )));
        }
        Ok(())
    }

    /// Fanout bounds for the tree.
    pub fn config(&self) -> SpatialResult<RTreeConfig> {
        RTreeConfig::new(self.max_entries, self.get_min_entries())
    }

    pub fn get_max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn get_min_entries(&self) -> usize {
        self.min_entries.unwrap_or(self.max_entries / 2)
    }

    pub fn get_scan_batch_size(&self) -> usize {
        self.scan_batch_size
    }

    pub fn is_strict_delete(&self) -> bool {
        self.strict_delete
    }
}

fn parse_usize(key: &str, value: &str) -> SpatialResult<usize> {
    value.trim().parse().map_err(|_| {
        SpatialError::InvalidArgument(format!(
            "option '{}' expects a non-negative integer, got '{}'",
            key, value
        ))
    })
}

fn parse_bool(key: &str, value: &str) -> SpatialResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" => Ok(false),
        _ => Err(SpatialError::InvalidArgument(format!(
            "option '{}' expects a boolean, got '{}'",
            key, value
        ))),
    }
}
