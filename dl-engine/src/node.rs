//! Instruction words.
//!
//! Every instruction is a header word followed by fixed-position argument
//! words. Owned references (buffers, batches, messages) and doubles are split
//! across a fixed number of words so the layout is the same for any build of
//! the same pointer width.

pub use dl_abi::POINTER_WORDS as REF_WORDS;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Node {
    Header { opcode: u16, size: u16 },
    Int(i32),
    UInt(u32),
    Float(f32),
    Enum(u32),
    Bool(bool),
    Pad,
}

impl Node {
    pub fn header(self) -> Option<(u16, u16)> {
        match self {
            Node::Header { opcode, size } => Some((opcode, size)),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i32> {
        match self {
            Node::Int(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_uint(self) -> Option<u32> {
        match self {
            Node::UInt(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_float(self) -> Option<f32> {
        match self {
            Node::Float(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_enum(self) -> Option<u32> {
        match self {
            Node::Enum(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Node::Bool(value) => Some(value),
            _ => None,
        }
    }
}

/// Splits an opaque reference across `WORDS` words, low half first.
///
/// With one word only the low 32 bits survive, which is every value a 32-bit
/// build can produce.
pub fn pack_ref<const WORDS: usize>(value: u64) -> [Node; WORDS] {
    debug_assert!(WORDS == 1 || WORDS == 2);
    let mut out = [Node::UInt(0); WORDS];
    for (index, slot) in out.iter_mut().enumerate() {
        *slot = Node::UInt((value >> (32 * index)) as u32);
    }
    out
}

pub fn unpack_ref<const WORDS: usize>(words: &[Node]) -> Option<u64> {
    let words = words.get(..WORDS)?;
    let mut value = 0u64;
    for (index, word) in words.iter().enumerate() {
        value |= u64::from(word.as_uint()?) << (32 * index);
    }
    Some(value)
}

pub fn write_ref(dst: &mut [Node], value: u64) {
    dst[..REF_WORDS].copy_from_slice(&pack_ref::<REF_WORDS>(value));
}

pub fn read_ref(words: &[Node]) -> Option<u64> {
    unpack_ref::<REF_WORDS>(words)
}

pub fn pack_f64(value: f64) -> [Node; 2] {
    pack_ref::<2>(value.to_bits())
}

pub fn unpack_f64(words: &[Node]) -> Option<f64> {
    unpack_ref::<2>(words).map(f64::from_bits)
}
