use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::arena::SmallListStore;
use crate::command::BatchProvider;
use crate::config::ListConfig;
use crate::dump;
use crate::list::{DisplayList, ListInfo, ReleaseSummary, Storage};

/// Everything guarded by the share group's lock.
#[derive(Debug, Default)]
pub struct ListTable {
    pub(crate) lists: HashMap<u32, DisplayList>,
    pub(crate) small: SmallListStore,
    next_serial: u64,
}

impl ListTable {
    pub fn get(&self, name: u32) -> Option<&DisplayList> {
        self.lists.get(&name)
    }

    pub fn small_store(&self) -> &SmallListStore {
        &self.small
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub(crate) fn publish(
        &mut self,
        mut list: DisplayList,
        config: &ListConfig,
        batches: Option<&dyn BatchProvider>,
    ) -> Option<ReleaseSummary> {
        if config.small_lists
            && let Storage::Blocks(blocks) = &list.storage
            && let [block] = blocks.as_slice()
        {
            let words = block.len();
            match self.small.insert(block.words()) {
                Ok(start) => {
                    debug!(list = list.name, start, words, "migrated to pool");
                    list.storage = Storage::Pooled { start, words };
                }
                Err(err) => warn!(list = list.name, %err, "keeping heap storage"),
            }
        }
        list.classify(&self.small);
        self.next_serial += 1;
        list.serial = self.next_serial;

        let name = list.name;
        let replaced = self.lists.insert(name, list)?;
        Some(replaced.release(&mut self.small, batches))
    }

    pub(crate) fn remove(
        &mut self,
        name: u32,
        batches: Option<&dyn BatchProvider>,
    ) -> Option<ReleaseSummary> {
        let list = self.lists.remove(&name)?;
        Some(list.release(&mut self.small, batches))
    }

    /// First name of `range` consecutive unused names, or `None` when the
    /// namespace has no such gap.
    fn find_free_block(&self, range: u32) -> Option<u32> {
        let mut start = 1u32;
        'search: loop {
            let end = start.checked_add(range - 1)?;
            for name in start..=end {
                if self.lists.contains_key(&name) {
                    start = name.checked_add(1)?;
                    continue 'search;
                }
            }
            return Some(start);
        }
    }
}

/// Name-to-list table shared by every context of one share group.
pub struct SharedLists {
    table: Mutex<ListTable>,
    config: ListConfig,
    batches: Option<Arc<dyn BatchProvider>>,
}

impl std::fmt::Debug for SharedLists {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("SharedLists");
        out.field("config", &self.config);
        match self.table.try_lock() {
            Some(table) => out.field("lists", &table.len()),
            None => out.field("lists", &format_args!("<locked>")),
        };
        out.field("batches", &self.batches.is_some()).finish()
    }
}

impl Default for SharedLists {
    fn default() -> Self {
        Self::new(ListConfig::default())
    }
}

impl SharedLists {
    pub fn new(config: ListConfig) -> Self {
        Self {
            table: Mutex::new(ListTable::default()),
            config,
            batches: None,
        }
    }

    pub fn with_batch_provider(config: ListConfig, provider: Arc<dyn BatchProvider>) -> Self {
        Self {
            table: Mutex::new(ListTable::default()),
            config,
            batches: Some(provider),
        }
    }

    pub fn config(&self) -> &ListConfig {
        &self.config
    }

    pub fn batch_provider(&self) -> Option<&dyn BatchProvider> {
        self.batches.as_deref()
    }

    pub fn lock(&self) -> MutexGuard<'_, ListTable> {
        self.table.lock()
    }

    /// Installs `list` under its name, releasing whatever it replaces.
    pub fn publish(&self, list: DisplayList) -> Option<ReleaseSummary> {
        self.table
            .lock()
            .publish(list, &self.config, self.batch_provider())
    }

    pub fn delete(&self, name: u32) -> Option<ReleaseSummary> {
        if name == 0 {
            return None;
        }
        self.table.lock().remove(name, self.batch_provider())
    }

    pub fn delete_range(&self, first: u32, range: u32) -> ReleaseSummary {
        let mut summary = ReleaseSummary::default();
        let mut table = self.table.lock();
        for offset in 0..range {
            let Some(name) = first.checked_add(offset) else {
                break;
            };
            if name == 0 {
                continue;
            }
            if let Some(released) = table.remove(name, self.batch_provider()) {
                summary += released;
            }
        }
        summary
    }

    /// Reserves `range` consecutive unused names, each holding an empty list.
    /// Returns the first name, or 0 when `range` is 0 or no block is free.
    pub fn gen_lists(&self, range: u32) -> u32 {
        if range == 0 {
            return 0;
        }
        let mut table = self.table.lock();
        let Some(first) = table.find_free_block(range) else {
            return 0;
        };
        for name in first..=first + (range - 1) {
            let replaced = table.publish(DisplayList::empty(name), &self.config, None);
            debug_assert!(replaced.is_none());
        }
        first
    }

    pub fn is_list(&self, name: u32) -> bool {
        name != 0 && self.table.lock().lists.contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    pub fn names(&self) -> Vec<u32> {
        let mut names: Vec<u32> = self.table.lock().lists.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Returns false when no list has that name.
    pub fn set_label(&self, name: u32, label: Option<&str>) -> bool {
        let mut table = self.table.lock();
        let Some(list) = table.lists.get_mut(&name) else {
            return false;
        };
        list.label = label.map(str::to_string);
        true
    }

    pub fn label(&self, name: u32) -> Option<String> {
        self.table.lock().get(name)?.label.clone()
    }

    pub fn list_info(&self, name: u32) -> Option<ListInfo> {
        let table = self.table.lock();
        Some(table.get(name)?.info(&table.small))
    }

    pub fn dump(&self, name: u32) -> Option<String> {
        let table = self.table.lock();
        let list = table.get(name)?;
        Some(dump::dump_list(list, &table.small, self.batch_provider()))
    }
}
