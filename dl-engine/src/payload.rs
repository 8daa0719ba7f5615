use std::borrow::Cow;
use std::sync::Arc;

/// Variable-length data owned by one display list and referenced from its
/// instructions by handle.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Floats(Arc<[f32]>),
    Bytes(Arc<[u8]>),
    Message(Cow<'static, str>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Floats(values) => values.len(),
            Payload::Bytes(bytes) => bytes.len(),
            Payload::Message(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-list handle table. Handle `0` is the null reference; a live handle is
/// its slot index plus one.
#[derive(Debug, Default)]
pub struct PayloadTable {
    slots: Vec<Option<Payload>>,
}

impl PayloadTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, payload: Payload) -> u64 {
        self.slots.push(Some(payload));
        self.slots.len() as u64
    }

    pub fn get(&self, handle: u64) -> Option<&Payload> {
        let index = usize::try_from(handle.checked_sub(1)?).ok()?;
        self.slots.get(index)?.as_ref()
    }

    pub fn release(&mut self, handle: u64) -> Option<Payload> {
        let index = usize::try_from(handle.checked_sub(1)?).ok()?;
        self.slots.get_mut(index)?.take()
    }

    pub fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn live_bytes(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .map(|payload| match payload {
                Payload::Floats(values) => values.len() * std::mem::size_of::<f32>(),
                other => other.len(),
            })
            .sum()
    }
}
