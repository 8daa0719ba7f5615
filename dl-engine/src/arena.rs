//! Block storage for lists under construction and the pooled store that
//! short finished lists are migrated into.

use dl_abi::OP_NOP;
use tracing::debug;

use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The list already owns as many blocks as it is allowed.
    BlockBudget(usize),
    /// The allocator refused memory for a fresh block.
    Reserve,
    /// The instruction cannot fit in any block of this size.
    TooLarge(usize),
}

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocError::BlockBudget(limit) => write!(f, "block budget of {limit} exhausted"),
            AllocError::Reserve => write!(f, "failed to reserve a new block"),
            AllocError::TooLarge(words) => write!(f, "instruction of {words} words exceeds block"),
        }
    }
}

impl std::error::Error for AllocError {}

/// Fixed-capacity run of instruction words. A block never reallocates once
/// created; when an instruction does not fit the arena starts a new one.
#[derive(Debug, Clone)]
pub struct Block {
    words: Vec<Node>,
    capacity: usize,
}

impl Block {
    fn try_new(capacity: usize) -> Result<Self, AllocError> {
        let mut words = Vec::new();
        words
            .try_reserve_exact(capacity)
            .map_err(|_| AllocError::Reserve)?;
        Ok(Self { words, capacity })
    }

    pub fn words(&self) -> &[Node] {
        &self.words
    }

    pub(crate) fn words_mut(&mut self) -> &mut [Node] {
        &mut self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn remaining(&self) -> usize {
        self.capacity - self.words.len()
    }
}

/// Recording-side allocator: appends instructions to a chain of blocks and
/// remembers where the previous instruction started so it can be padded.
#[derive(Debug)]
pub struct Arena {
    blocks: Vec<Block>,
    block_words: usize,
    max_blocks: Option<usize>,
    last_header: Option<usize>,
}

impl Arena {
    pub fn new(block_words: usize, max_blocks: Option<usize>) -> Self {
        Self {
            blocks: Vec::new(),
            block_words,
            max_blocks,
            last_header: None,
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn words(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    /// Reserves a header plus `payload_words` argument words and returns the
    /// argument slice. `wide` payloads start at an even offset within their
    /// block: the previous instruction absorbs one padding word, or a one-word
    /// NOP is placed at the head of a fresh block.
    pub fn alloc(
        &mut self,
        opcode: u16,
        payload_words: usize,
        wide: bool,
    ) -> Result<&mut [Node], AllocError> {
        let size = 1 + payload_words;
        if size + 1 > self.block_words || size > usize::from(u16::MAX) {
            return Err(AllocError::TooLarge(size));
        }

        let needs_pad = |block: &Block| wide && block.len() % 2 == 0;
        let fits = match self.blocks.last() {
            Some(block) => size + usize::from(needs_pad(block)) <= block.remaining(),
            None => false,
        };
        if !fits {
            self.push_block()?;
        }

        let block_index = self.blocks.len() - 1;
        let block = &mut self.blocks[block_index];
        if needs_pad(block) {
            match self.last_header {
                Some(at) => {
                    if let Node::Header { size: previous, .. } = &mut block.words[at] {
                        *previous += 1;
                    }
                    block.words.push(Node::Pad);
                }
                None => block.words.push(Node::Header {
                    opcode: OP_NOP,
                    size: 1,
                }),
            }
        }

        let at = block.words.len();
        block.words.push(Node::Header {
            opcode,
            size: size as u16,
        });
        block
            .words
            .extend(std::iter::repeat_n(Node::UInt(0), payload_words));
        self.last_header = Some(at);
        Ok(&mut block.words[at + 1..at + size])
    }

    fn push_block(&mut self) -> Result<(), AllocError> {
        if let Some(limit) = self.max_blocks
            && self.blocks.len() >= limit
        {
            return Err(AllocError::BlockBudget(limit));
        }
        self.blocks
            .try_reserve(1)
            .map_err(|_| AllocError::Reserve)?;
        self.blocks.push(Block::try_new(self.block_words)?);
        self.last_header = None;
        Ok(())
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }
}

/// Bitmap range allocator over word indices of the pooled store.
#[derive(Debug, Default)]
pub struct IdAlloc {
    bits: Vec<u64>,
    len: usize,
}

impl IdAlloc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indices ever handed out, including freed ones.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_used(&self, index: usize) -> bool {
        self.bits
            .get(index / 64)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }

    pub fn used(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Returns the start of `count` consecutive free indices, growing the
    /// range when no gap is large enough.
    pub fn alloc_range(&mut self, count: usize) -> usize {
        if count == 0 {
            return self.len;
        }
        let mut run_start = 0;
        let mut run_len = 0;
        for index in 0..self.len {
            if self.is_used(index) {
                run_len = 0;
                run_start = index + 1;
                continue;
            }
            run_len += 1;
            if run_len == count {
                self.mark(run_start, count, true);
                return run_start;
            }
        }
        // A free tail run is extended instead of skipped.
        let start = run_start;
        self.len = start + count;
        let needed = self.len.div_ceil(64);
        if self.bits.len() < needed {
            self.bits.resize(needed, 0);
        }
        self.mark(start, count, true);
        start
    }

    pub fn free_range(&mut self, start: usize, count: usize) {
        self.mark(start, count, false);
    }

    fn mark(&mut self, start: usize, count: usize, used: bool) {
        for index in start..start + count {
            let Some(word) = self.bits.get_mut(index / 64) else {
                return;
            };
            let bit = 1u64 << (index % 64);
            if used {
                *word |= bit;
            } else {
                *word &= !bit;
            }
        }
    }
}

/// Shared array that co-locates the words of many short lists.
#[derive(Debug, Default)]
pub struct SmallListStore {
    words: Vec<Node>,
    ids: IdAlloc,
}

impl SmallListStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, words: &[Node]) -> Result<usize, AllocError> {
        let start = self.ids.alloc_range(words.len());
        let end = start + words.len();
        if self.words.len() < end {
            if self.words.try_reserve(end - self.words.len()).is_err() {
                self.ids.free_range(start, words.len());
                return Err(AllocError::Reserve);
            }
            self.words.resize(end, Node::Pad);
        }
        self.words[start..end].copy_from_slice(words);
        debug!(start, count = words.len(), "pooled list storage");
        Ok(start)
    }

    pub fn get(&self, start: usize, count: usize) -> &[Node] {
        self.words.get(start..start + count).unwrap_or(&[])
    }

    pub(crate) fn get_mut(&mut self, start: usize, count: usize) -> &mut [Node] {
        self.words
            .get_mut(start..start + count)
            .unwrap_or(&mut [])
    }

    pub fn remove(&mut self, start: usize, count: usize) {
        if let Some(words) = self.words.get_mut(start..start + count) {
            words.fill(Node::Pad);
        }
        self.ids.free_range(start, count);
    }

    pub fn used_words(&self) -> usize {
        self.ids.used()
    }

    pub fn ids(&self) -> &IdAlloc {
        &self.ids
    }
}
