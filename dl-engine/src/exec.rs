//! List playback.
//!
//! A traversal holds the share group's lock. Nested CALL_LIST recurses with
//! the lock held; CALL_LISTS releases it around the nested traversal and
//! re-checks the list's serial afterwards. Both ends of that window unlock
//! fairly, so a context waiting to publish or delete gets the lock there.

use parking_lot::MutexGuard;
use tracing::{debug, error, trace};

use crate::command::{Command, Dispatch, ListNames};
use crate::list::Cursor;
use crate::registry::{ListTable, SharedLists};

pub(crate) struct Playback<'a, D: Dispatch> {
    shared: &'a SharedLists,
    driver: &'a mut D,
    list_base: &'a mut u32,
    depth: usize,
}

impl<'a, D: Dispatch> Playback<'a, D> {
    pub(crate) fn new(shared: &'a SharedLists, driver: &'a mut D, list_base: &'a mut u32) -> Self {
        Self {
            shared,
            driver,
            list_base,
            depth: 0,
        }
    }

    pub(crate) fn call_list(&mut self, name: u32) {
        let mut table = self.shared.lock();
        self.execute_list(&mut table, name);
    }

    pub(crate) fn call_lists(&mut self, names: &ListNames) {
        let mut table = self.shared.lock();
        self.execute_lists(&mut table, names);
    }

    fn execute_lists(&mut self, table: &mut MutexGuard<'_, ListTable>, names: &ListNames) {
        let base = *self.list_base;
        for name in names.names(base) {
            self.execute_list(table, name);
        }
    }

    fn execute_list(&mut self, table: &mut MutexGuard<'_, ListTable>, name: u32) {
        let max_nesting = self.shared.config().max_nesting;
        if self.depth >= max_nesting {
            debug!(list = name, depth = self.depth, "list nesting limit reached, skipping");
            return;
        }
        let Some(serial) = table.get(name).map(|list| list.serial()) else {
            return;
        };

        self.depth += 1;
        let mut cursor = Cursor::default();
        loop {
            let fetched = {
                let Some(list) = table.get(name).filter(|list| list.serial() == serial) else {
                    debug!(list = name, "list changed during playback, stopping");
                    break;
                };
                list.fetch(table.small_store(), &mut cursor)
            };
            let command = match fetched {
                Ok(Some((_, command))) => command,
                Ok(None) => break,
                Err(err) => {
                    error!(list = name, %err, "corrupt display list, stopping playback");
                    break;
                }
            };
            trace!(list = name, op = command.mnemonic(), "dispatch");

            match command {
                Command::CallList(target) => self.execute_list(table, target),
                Command::CallLists(names) => {
                    MutexGuard::unlocked_fair(table, || {
                        let mut inner = self.shared.lock();
                        self.execute_lists(&mut inner, &names);
                        MutexGuard::unlock_fair(inner);
                    });
                }
                Command::ListBase(base) => *self.list_base = base,
                Command::Error { code, message } => self.driver.error(code, &message),
                Command::VertexBatch { batch, loopback } => match self.shared.batch_provider() {
                    Some(provider) => provider.playback(batch, loopback, &mut *self.driver),
                    None => self.driver.dispatch(&Command::VertexBatch { batch, loopback }),
                },
                other => self.driver.dispatch(&other),
            }
        }
        self.depth -= 1;
    }
}
