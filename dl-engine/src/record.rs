use std::borrow::Cow;

use dl_abi::*;
use tracing::{debug, warn};

use crate::arena::{AllocError, Arena};
use crate::codec;
use crate::command::{BatchProvider, Command, ErrorCode, ListMode};
use crate::config::ListConfig;
use crate::list::{DisplayList, ReleaseSummary};
use crate::payload::PayloadTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    OutOfMemory { opcode: u16, cause: AllocError },
}

impl RecordError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RecordError::OutOfMemory { .. } => ErrorCode::OutOfMemory,
        }
    }
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::OutOfMemory { opcode, cause } => {
                let name = opcode_info(*opcode).map_or("?", |info| info.name);
                write!(f, "out of memory recording {name}: {cause}")
            }
        }
    }
}

impl std::error::Error for RecordError {}

/// What happened to one command handed to the recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Stored,
    /// Same value as the last recorded one; nothing was written.
    Elided,
    /// The command was invalid; an error instruction was written instead.
    Deferred(ErrorCode, &'static str),
}

/// Whether recording is currently between a BEGIN and its END.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveState {
    /// The list was started with no knowledge of an enclosing BEGIN.
    Unknown,
    Inside(u32),
    Outside,
}

const MATERIAL_SLOTS: usize = 6;
const FRONT_FACE: usize = 0;
const BACK_FACE: usize = 1;

/// Cache slot and number of meaningful floats for a single-attribute pname.
fn material_slot(pname: u32) -> Option<(usize, usize)> {
    match pname {
        AMBIENT => Some((0, 4)),
        DIFFUSE => Some((1, 4)),
        SPECULAR => Some((2, 4)),
        EMISSION => Some((3, 4)),
        SHININESS => Some((4, 1)),
        COLOR_INDEXES => Some((5, 3)),
        _ => None,
    }
}

fn material_slots(pname: u32) -> Option<&'static [u32]> {
    match pname {
        AMBIENT => Some(&[AMBIENT]),
        DIFFUSE => Some(&[DIFFUSE]),
        SPECULAR => Some(&[SPECULAR]),
        EMISSION => Some(&[EMISSION]),
        SHININESS => Some(&[SHININESS]),
        COLOR_INDEXES => Some(&[COLOR_INDEXES]),
        AMBIENT_AND_DIFFUSE => Some(&[AMBIENT, DIFFUSE]),
        _ => None,
    }
}

fn material_faces(face: u32) -> Option<&'static [usize]> {
    match face {
        FRONT => Some(&[FRONT_FACE]),
        BACK => Some(&[BACK_FACE]),
        FRONT_AND_BACK => Some(&[FRONT_FACE, BACK_FACE]),
        _ => None,
    }
}

/// Last recorded value of each de-duplicated state category.
#[derive(Debug, Clone, Default)]
pub struct StateCache {
    shade_model: Option<u32>,
    material: [[Option<[f32; 4]>; MATERIAL_SLOTS]; 2],
}

impl StateCache {
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    /// Records `mode` as current; false when it already was.
    fn update_shade_model(&mut self, mode: u32) -> bool {
        if self.shade_model == Some(mode) {
            return false;
        }
        self.shade_model = Some(mode);
        true
    }

    /// Records every face/attribute slot `pname` touches; false when all of
    /// them already held `params`.
    fn update_material(&mut self, faces: &[usize], pnames: &[u32], params: &[f32; 4]) -> bool {
        let mut changed = false;
        for &face in faces {
            for &pname in pnames {
                let Some((slot, len)) = material_slot(pname) else {
                    continue;
                };
                let current = &mut self.material[face][slot];
                let same = current.is_some_and(|cached| cached[..len] == params[..len]);
                if !same {
                    *current = Some(*params);
                    changed = true;
                }
            }
        }
        changed
    }
}

/// One in-progress recording. Owns the list under construction until it is
/// finished or discarded; nothing here is visible to other contexts.
#[derive(Debug)]
pub struct Recorder {
    name: u32,
    mode: ListMode,
    arena: Arena,
    payloads: PayloadTable,
    cache: StateCache,
    primitive: PrimitiveState,
    use_loopback: bool,
}

impl Recorder {
    pub fn new(name: u32, mode: ListMode, config: &ListConfig) -> Self {
        Self {
            name,
            mode,
            arena: Arena::new(config.block_words, config.max_blocks_per_list),
            payloads: PayloadTable::new(),
            cache: StateCache::default(),
            primitive: PrimitiveState::Unknown,
            use_loopback: false,
        }
    }

    pub fn name(&self) -> u32 {
        self.name
    }

    pub fn mode(&self) -> ListMode {
        self.mode
    }

    pub fn primitive(&self) -> PrimitiveState {
        self.primitive
    }

    pub fn uses_loopback(&self) -> bool {
        self.use_loopback
    }

    pub fn words(&self) -> usize {
        self.arena.words()
    }

    pub fn invalidate_cache(&mut self) {
        self.cache.invalidate();
    }

    /// Appends `command`, applying primitive-nesting checks and state
    /// de-duplication first.
    pub fn record(&mut self, command: &Command) -> Result<Recorded, RecordError> {
        match command {
            Command::Begin(mode) => {
                if *mode > PATCHES {
                    return self.defer(ErrorCode::InvalidEnum, "glBegin(mode)");
                }
                if matches!(self.primitive, PrimitiveState::Inside(_)) {
                    return self.defer(ErrorCode::InvalidOperation, "glBegin");
                }
                self.primitive = PrimitiveState::Inside(*mode);
            }
            Command::End => {
                if self.primitive == PrimitiveState::Outside {
                    return self.defer(ErrorCode::InvalidOperation, "glEnd");
                }
                self.primitive = PrimitiveState::Outside;
            }
            Command::ShadeModel(mode) => {
                if !self.cache.update_shade_model(*mode) {
                    debug!(list = self.name, mode, "elided shade_model");
                    return Ok(Recorded::Elided);
                }
            }
            Command::Material {
                face,
                pname,
                params,
            } => {
                let Some(faces) = material_faces(*face) else {
                    return self.defer(ErrorCode::InvalidEnum, "glMaterial(face)");
                };
                let Some(pnames) = material_slots(*pname) else {
                    return self.defer(ErrorCode::InvalidEnum, "glMaterial(pname)");
                };
                if !self.cache.update_material(faces, pnames, params) {
                    debug!(list = self.name, face, pname, "elided material");
                    return Ok(Recorded::Elided);
                }
            }
            Command::CallList(_) | Command::CallLists(_) => {
                if matches!(self.primitive, PrimitiveState::Inside(_)) {
                    self.use_loopback = true;
                }
                self.cache.invalidate();
            }
            Command::PopAttrib => self.cache.invalidate(),
            _ => {}
        }
        self.store(command)?;
        Ok(Recorded::Stored)
    }

    /// Writes an error instruction that reports `code` each time the list
    /// executes.
    pub fn record_error(
        &mut self,
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
    ) -> Result<(), RecordError> {
        self.store(&Command::Error {
            code,
            message: message.into(),
        })
    }

    fn defer(&mut self, code: ErrorCode, message: &'static str) -> Result<Recorded, RecordError> {
        self.record_error(code, message)?;
        Ok(Recorded::Deferred(code, message))
    }

    fn store(&mut self, command: &Command) -> Result<(), RecordError> {
        let opcode = command.opcode();
        let Some(info) = opcode_info(opcode) else {
            return Ok(());
        };
        let words = self
            .arena
            .alloc(opcode, info.payload_words(), info.wide())
            .map_err(|cause| {
                warn!(list = self.name, opcode = info.name, %cause, "dropping instruction");
                RecordError::OutOfMemory { opcode, cause }
            })?;
        codec::encode(command, words, &mut self.payloads);
        Ok(())
    }

    /// Terminates the stream and hands the list over for publishing.
    pub fn finish(mut self) -> (DisplayList, bool) {
        // Without room for the marker the list still ends with its last block.
        if let Err(cause) = self.arena.alloc(OP_END_OF_LIST, 0, false) {
            debug!(list = self.name, %cause, "list ends without marker");
        }
        let list = DisplayList::new(self.name, self.arena.into_blocks(), self.payloads);
        (list, self.use_loopback)
    }

    /// Drops an unfinished recording, releasing everything it already owns.
    pub fn discard(self, batches: Option<&dyn BatchProvider>) -> ReleaseSummary {
        let list = DisplayList::new(self.name, self.arena.into_blocks(), self.payloads);
        let mut scratch = crate::arena::SmallListStore::new();
        list.release(&mut scratch, batches)
    }
}
