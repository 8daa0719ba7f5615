//! Retagging of batch instructions for lists that were called from inside
//! an open primitive while recording.

use std::collections::HashSet;

use dl_abi::{OP_CALL_LIST, OP_CALL_LISTS, OP_VERTEX_BATCH, OP_VERTEX_BATCH_LOOPBACK};
use tracing::{debug, error};

use crate::arena::SmallListStore;
use crate::command::Command;
use crate::list::{Cursor, DisplayList};
use crate::node::Node;
use crate::registry::ListTable;

/// Scans `list`, returning the header positions of its batch instructions
/// and the names it calls.
fn scan(list: &DisplayList, store: &SmallListStore, list_base: u32) -> (Vec<Cursor>, Vec<u32>) {
    let mut batches = Vec::new();
    let mut callees = Vec::new();
    for instruction in list.instructions(store) {
        let instruction = match instruction {
            Ok(instruction) => instruction,
            Err(err) => {
                error!(list = list.name(), %err, "stopping loopback scan");
                break;
            }
        };
        match instruction.opcode {
            OP_VERTEX_BATCH | OP_VERTEX_BATCH_LOOPBACK => batches.push(instruction.at),
            OP_CALL_LIST | OP_CALL_LISTS => match list.decode(&instruction) {
                Some(Command::CallList(name)) => callees.push(name),
                Some(Command::CallLists(names)) => callees.extend(names.names(list_base)),
                _ => {}
            },
            _ => {}
        }
    }
    (batches, callees)
}

fn retag(list: &mut DisplayList, store: &mut SmallListStore, at: &[Cursor]) {
    for cursor in at {
        let Some(words) = list.words_mut(store, cursor.segment) else {
            continue;
        };
        if let Some(Node::Header { opcode, .. }) = words.get_mut(cursor.offset) {
            *opcode = OP_VERTEX_BATCH_LOOPBACK;
        }
    }
}

/// Rewrites every batch instruction in `root` and in each registered list
/// reachable from it into its loopback form. Each list is visited once.
pub(crate) fn rewrite(table: &mut ListTable, root: &mut DisplayList, list_base: u32) {
    let ListTable { lists, small, .. } = table;

    let (batches, mut pending) = scan(root, small, list_base);
    retag(root, small, &batches);

    let mut visited = HashSet::new();
    visited.insert(root.name());
    let mut rewritten = 0usize;
    while let Some(name) = pending.pop() {
        if !visited.insert(name) {
            continue;
        }
        let Some(list) = lists.get_mut(&name) else {
            continue;
        };
        let (batches, callees) = scan(list, small, list_base);
        retag(list, small, &batches);
        rewritten += batches.len();
        pending.extend(callees);
    }
    debug!(list = root.name(), rewritten, "loopback rewrite");
}
