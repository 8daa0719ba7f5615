use dl_abi::{OP_END_OF_LIST, OP_NOP, Ownership, opcode_info};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::arena::{Block, SmallListStore};
use crate::codec;
use crate::command::{BatchId, BatchProvider, Command};
use crate::node::{Node, read_ref};
use crate::payload::PayloadTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    MissingHeader { segment: usize, offset: usize },
    BadSize { opcode: u16, size: u16, offset: usize },
    UnknownOpcode { opcode: u16, offset: usize },
    Undecodable { opcode: u16, offset: usize },
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::MissingHeader { segment, offset } => {
                write!(f, "expected instruction header at {segment}:{offset}")
            }
            StreamError::BadSize {
                opcode,
                size,
                offset,
            } => write!(f, "opcode {opcode} at {offset} declares bad size {size}"),
            StreamError::UnknownOpcode { opcode, offset } => {
                write!(f, "unknown opcode {opcode} at {offset}")
            }
            StreamError::Undecodable { opcode, offset } => {
                write!(f, "payload of opcode {opcode} at {offset} does not decode")
            }
        }
    }
}

impl std::error::Error for StreamError {}

#[derive(Debug)]
pub enum Storage {
    Blocks(Vec<Block>),
    Pooled { start: usize, words: usize },
}

impl Storage {
    pub fn segment<'a>(&'a self, store: &'a SmallListStore, index: usize) -> Option<&'a [Node]> {
        match self {
            Storage::Blocks(blocks) => blocks.get(index).map(Block::words),
            Storage::Pooled { start, words } => (index == 0).then(|| store.get(*start, *words)),
        }
    }

    pub fn segment_count(&self) -> usize {
        match self {
            Storage::Blocks(blocks) => blocks.len(),
            Storage::Pooled { .. } => 1,
        }
    }

    pub fn word_count(&self) -> usize {
        match self {
            Storage::Blocks(blocks) => blocks.iter().map(Block::len).sum(),
            Storage::Pooled { words, .. } => *words,
        }
    }

    /// Reads the instruction at `cursor`, moving on to the next segment when
    /// the current one is exhausted. NOPs are returned like any other
    /// instruction; `Ok(None)` is the end of the list.
    pub fn read_at<'a>(
        &'a self,
        store: &'a SmallListStore,
        cursor: &mut Cursor,
    ) -> Result<Option<InstructionRef<'a>>, StreamError> {
        loop {
            let Some(words) = self.segment(store, cursor.segment) else {
                return Ok(None);
            };
            if cursor.offset >= words.len() {
                cursor.segment += 1;
                cursor.offset = 0;
                continue;
            }

            let at = *cursor;
            let Some((opcode, size)) = words[at.offset].header() else {
                return Err(StreamError::MissingHeader {
                    segment: at.segment,
                    offset: at.offset,
                });
            };
            let end = at.offset + usize::from(size);
            if size == 0 || end > words.len() {
                return Err(StreamError::BadSize {
                    opcode,
                    size,
                    offset: at.offset,
                });
            }
            let Some(info) = opcode_info(opcode) else {
                return Err(StreamError::UnknownOpcode {
                    opcode,
                    offset: at.offset,
                });
            };
            if usize::from(size) < info.instruction_words() {
                return Err(StreamError::BadSize {
                    opcode,
                    size,
                    offset: at.offset,
                });
            }
            if opcode == OP_END_OF_LIST {
                return Ok(None);
            }
            cursor.offset = end;
            return Ok(Some(InstructionRef {
                at,
                opcode,
                words: &words[at.offset + 1..end],
            }));
        }
    }

    pub fn instructions<'a>(&'a self, store: &'a SmallListStore) -> Instructions<'a> {
        Instructions {
            storage: self,
            store,
            cursor: Cursor::default(),
            done: false,
        }
    }
}

/// Resume point inside a list: which segment (block) and which word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub segment: usize,
    pub offset: usize,
}

/// One instruction as stored: header fields plus its argument words,
/// including any trailing padding.
#[derive(Debug, Clone, Copy)]
pub struct InstructionRef<'a> {
    pub at: Cursor,
    pub opcode: u16,
    pub words: &'a [Node],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseSummary {
    pub instructions: usize,
    pub buffers: usize,
    pub messages: usize,
    pub batches: usize,
}

impl std::ops::AddAssign for ReleaseSummary {
    fn add_assign(&mut self, other: Self) {
        self.instructions += other.instructions;
        self.buffers += other.buffers;
        self.messages += other.messages;
        self.batches += other.batches;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListInfo {
    pub name: u32,
    pub label: Option<String>,
    pub serial: u64,
    pub storage: &'static str,
    pub blocks: usize,
    pub words: usize,
    pub instructions: usize,
    pub buffers: usize,
    pub payload_bytes: usize,
    pub batches: usize,
    pub needs_frontend_replay: bool,
}

#[derive(Debug)]
pub struct DisplayList {
    pub(crate) name: u32,
    pub(crate) label: Option<String>,
    pub(crate) serial: u64,
    pub(crate) storage: Storage,
    pub(crate) payloads: PayloadTable,
    pub(crate) needs_frontend_replay: bool,
}

impl DisplayList {
    pub(crate) fn new(name: u32, blocks: Vec<Block>, payloads: PayloadTable) -> Self {
        Self {
            name,
            label: None,
            serial: 0,
            storage: Storage::Blocks(blocks),
            payloads,
            needs_frontend_replay: false,
        }
    }

    pub(crate) fn empty(name: u32) -> Self {
        Self::new(name, Vec::new(), PayloadTable::new())
    }

    pub fn name(&self) -> u32 {
        self.name
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self.storage, Storage::Pooled { .. })
    }

    pub fn needs_frontend_replay(&self) -> bool {
        self.needs_frontend_replay
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn segment<'a>(&'a self, store: &'a SmallListStore, index: usize) -> Option<&'a [Node]> {
        self.storage.segment(store, index)
    }

    pub fn segment_count(&self) -> usize {
        self.storage.segment_count()
    }

    pub fn word_count(&self) -> usize {
        self.storage.word_count()
    }

    pub fn read_at<'a>(
        &'a self,
        store: &'a SmallListStore,
        cursor: &mut Cursor,
    ) -> Result<Option<InstructionRef<'a>>, StreamError> {
        self.storage.read_at(store, cursor)
    }

    pub fn instructions<'a>(&'a self, store: &'a SmallListStore) -> Instructions<'a> {
        self.storage.instructions(store)
    }

    /// Reads and decodes the next non-NOP instruction at `cursor`.
    pub(crate) fn fetch(
        &self,
        store: &SmallListStore,
        cursor: &mut Cursor,
    ) -> Result<Option<(u16, Command)>, StreamError> {
        loop {
            let Some(instruction) = self.read_at(store, cursor)? else {
                return Ok(None);
            };
            if instruction.opcode == OP_NOP {
                continue;
            }
            let command = codec::decode(instruction.opcode, instruction.words, &self.payloads)
                .ok_or(StreamError::Undecodable {
                    opcode: instruction.opcode,
                    offset: instruction.at.offset,
                })?;
            return Ok(Some((instruction.opcode, command)));
        }
    }

    pub fn decode(&self, instruction: &InstructionRef<'_>) -> Option<Command> {
        codec::decode(instruction.opcode, instruction.words, &self.payloads)
    }

    pub(crate) fn words_mut<'a>(
        &'a mut self,
        store: &'a mut SmallListStore,
        segment: usize,
    ) -> Option<&'a mut [Node]> {
        match &mut self.storage {
            Storage::Blocks(blocks) => blocks.get_mut(segment).map(Block::words_mut),
            Storage::Pooled { start, words } => {
                (segment == 0).then(|| store.get_mut(*start, *words))
            }
        }
    }

    pub(crate) fn classify(&mut self, store: &SmallListStore) {
        self.needs_frontend_replay = self.instructions(store).any(|instruction| {
            instruction.is_ok_and(|instruction| {
                opcode_info(instruction.opcode).is_some_and(|info| info.frontend_state)
            })
        });
    }

    pub fn info(&self, store: &SmallListStore) -> ListInfo {
        let mut instructions = 0;
        let mut batches = 0;
        for instruction in self.instructions(store).flatten() {
            if instruction.opcode == OP_NOP {
                continue;
            }
            instructions += 1;
            if let Some(info) = opcode_info(instruction.opcode) {
                batches += info
                    .refs()
                    .filter(|(offset, ownership)| {
                        *ownership == Ownership::Batch
                            && read_ref(&instruction.words[*offset..]).is_some_and(|id| id != 0)
                    })
                    .count();
            }
        }
        ListInfo {
            name: self.name,
            label: self.label.clone(),
            serial: self.serial,
            storage: if self.is_pooled() { "pooled" } else { "heap" },
            blocks: self.segment_count(),
            words: self.word_count(),
            instructions,
            buffers: self.payloads.live(),
            payload_bytes: self.payloads.live_bytes(),
            batches,
            needs_frontend_replay: self.needs_frontend_replay,
        }
    }

    /// Visits every instruction once and releases what it owns: buffers and
    /// messages from the payload table, batches through `batches`, and the
    /// pooled word range if the list lives in the pool.
    pub(crate) fn release(
        self,
        store: &mut SmallListStore,
        batches: Option<&dyn BatchProvider>,
    ) -> ReleaseSummary {
        let DisplayList {
            name,
            storage,
            mut payloads,
            ..
        } = self;
        let mut summary = ReleaseSummary::default();

        for instruction in storage.instructions(store) {
            let instruction = match instruction {
                Ok(instruction) => instruction,
                Err(err) => {
                    error!(list = name, %err, "stopping cleanup of corrupt list");
                    break;
                }
            };
            if instruction.opcode == OP_NOP {
                continue;
            }
            summary.instructions += 1;
            let Some(info) = opcode_info(instruction.opcode) else {
                continue;
            };
            for (offset, ownership) in info.refs() {
                let Some(handle) = read_ref(&instruction.words[offset..]) else {
                    continue;
                };
                if handle == 0 {
                    continue;
                }
                match ownership {
                    Ownership::Batch => {
                        match batches {
                            Some(provider) => provider.destroy(BatchId(handle)),
                            None => debug!(list = name, batch = handle, "no batch provider"),
                        }
                        summary.batches += 1;
                    }
                    Ownership::Buffer | Ownership::Message => match payloads.release(handle) {
                        Some(_) if ownership == Ownership::Buffer => summary.buffers += 1,
                        Some(_) => summary.messages += 1,
                        None => warn!(
                            list = name,
                            opcode = info.name,
                            handle,
                            "payload already released"
                        ),
                    },
                }
            }
        }

        if let Storage::Pooled { start, words } = storage {
            store.remove(start, words);
        }
        summary
    }
}

pub struct Instructions<'a> {
    storage: &'a Storage,
    store: &'a SmallListStore,
    cursor: Cursor,
    done: bool,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<InstructionRef<'a>, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.storage.read_at(self.store, &mut self.cursor) {
            Ok(Some(instruction)) => Some(Ok(instruction)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dl_abi::{COMPILE, OP_ENABLE};

    use super::*;
    use crate::command::{Dispatch, ErrorCode};
    use crate::context::Context;
    use crate::registry::SharedLists;

    #[derive(Default)]
    struct Trace(Vec<Command>);

    impl Dispatch for Trace {
        fn dispatch(&mut self, command: &Command) {
            self.0.push(command.clone());
        }

        fn error(&mut self, _code: ErrorCode, _message: &str) {}
    }

    fn recorded() -> Context<Trace> {
        let mut ctx = Context::new(Arc::new(SharedLists::default()), Trace::default());
        for (name, caps) in [(1, &[1, 2, 3][..]), (2, &[20][..])] {
            ctx.new_list(name, COMPILE);
            for &cap in caps {
                ctx.submit(Command::Enable(cap));
            }
            ctx.end_list();
        }
        ctx
    }

    /// Rewrites the header of the `index`th ENABLE in list `name`.
    fn corrupt(ctx: &Context<Trace>, name: u32, index: usize, header: Node) {
        let mut guard = ctx.shared().lock();
        let table = &mut *guard;
        let list = table.lists.get_mut(&name).expect("list is recorded");
        let words = list
            .words_mut(&mut table.small, 0)
            .expect("list has a first segment");
        let at = words
            .iter()
            .enumerate()
            .filter(|(_, word)| word.header().is_some_and(|(opcode, _)| opcode == OP_ENABLE))
            .map(|(at, _)| at)
            .nth(index)
            .expect("enough enable instructions");
        words[at] = header;
    }

    fn stream_error(ctx: &Context<Trace>, name: u32) -> Option<StreamError> {
        let table = ctx.shared().lock();
        let list = table.get(name)?;
        list.instructions(table.small_store())
            .find_map(Result::err)
    }

    fn play_both(ctx: &mut Context<Trace>) -> Vec<Command> {
        ctx.driver_mut().0.clear();
        ctx.call_list(1);
        ctx.call_list(2);
        std::mem::take(&mut ctx.driver_mut().0)
    }

    #[test]
    fn intact_lists_have_no_stream_errors() {
        let mut ctx = recorded();
        assert_eq!(stream_error(&ctx, 1), None);
        assert_eq!(
            play_both(&mut ctx),
            vec![
                Command::Enable(1),
                Command::Enable(2),
                Command::Enable(3),
                Command::Enable(20),
            ]
        );
    }

    #[test]
    fn unknown_opcode_stops_only_that_list() {
        let mut ctx = recorded();
        corrupt(&ctx, 1, 1, Node::Header { opcode: 0x7fff, size: 2 });
        assert!(matches!(
            stream_error(&ctx, 1),
            Some(StreamError::UnknownOpcode { opcode: 0x7fff, .. })
        ));
        assert_eq!(
            play_both(&mut ctx),
            vec![Command::Enable(1), Command::Enable(20)]
        );
    }

    #[test]
    fn bad_size_stops_only_that_list() {
        let mut ctx = recorded();
        corrupt(&ctx, 1, 2, Node::Header { opcode: OP_ENABLE, size: 0 });
        assert!(matches!(
            stream_error(&ctx, 1),
            Some(StreamError::BadSize { opcode: OP_ENABLE, size: 0, .. })
        ));
        assert_eq!(
            play_both(&mut ctx),
            vec![Command::Enable(1), Command::Enable(2), Command::Enable(20)]
        );

        corrupt(&ctx, 2, 0, Node::Header { opcode: OP_ENABLE, size: u16::MAX });
        assert!(matches!(stream_error(&ctx, 2), Some(StreamError::BadSize { .. })));
        assert_eq!(
            play_both(&mut ctx),
            vec![Command::Enable(1), Command::Enable(2)]
        );
    }

    #[test]
    fn missing_header_is_reported_by_read_at() {
        let ctx = recorded();
        corrupt(&ctx, 1, 1, Node::UInt(5));

        let table = ctx.shared().lock();
        let list = table.get(1).expect("list is recorded");
        let mut cursor = Cursor::default();
        let first = list
            .read_at(table.small_store(), &mut cursor)
            .expect("first instruction is intact")
            .expect("list is not empty");
        assert_eq!(first.opcode, OP_ENABLE);
        assert!(matches!(
            list.read_at(table.small_store(), &mut cursor),
            Err(StreamError::MissingHeader { segment: 0, .. })
        ));
    }

    #[test]
    fn corrupt_list_is_still_released() {
        let ctx = recorded();
        corrupt(&ctx, 1, 1, Node::Header { opcode: 0x7fff, size: 2 });
        let summary = ctx.shared().delete(1).expect("list exists");
        assert_eq!(summary.instructions, 1);
        assert!(!ctx.shared().is_list(1));
        assert!(ctx.shared().is_list(2));
    }
}
