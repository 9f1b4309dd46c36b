use crate::cache::DEFAULT_CACHE_MAX_ENTRIES;
use crate::common::types::{CreateMode, MoveOptions};
use crate::resolver::RootMapping;

/// Settings for an [`crate::EntryManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub create_mode: CreateMode,
    pub move_options: MoveOptions,
    pub root_mapping: RootMapping,
    pub cache_max_entries: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            create_mode: CreateMode::default(),
            move_options: MoveOptions::default(),
            root_mapping: RootMapping::default(),
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl ManagerConfig {
    pub fn with_create_mode(mut self, mode: CreateMode) -> Self {
        self.create_mode = mode;
        self
    }

    pub fn with_move_options(mut self, options: MoveOptions) -> Self {
        self.move_options = options;
        self
    }

    pub fn with_root_mapping(mut self, mapping: RootMapping) -> Self {
        self.root_mapping = mapping;
        self
    }

    pub fn with_cache_max_entries(mut self, max_entries: usize) -> Self {
        self.cache_max_entries = max_entries;
        self
    }
}
