use std::borrow::Cow;
use std::sync::Arc;

use dl_abi::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidEnum,
    InvalidValue,
    InvalidOperation,
    StackOverflow,
    StackUnderflow,
    OutOfMemory,
}

impl ErrorCode {
    pub fn as_raw(self) -> u32 {
        match self {
            ErrorCode::InvalidEnum => INVALID_ENUM,
            ErrorCode::InvalidValue => INVALID_VALUE,
            ErrorCode::InvalidOperation => INVALID_OPERATION,
            ErrorCode::StackOverflow => STACK_OVERFLOW,
            ErrorCode::StackUnderflow => STACK_UNDERFLOW,
            ErrorCode::OutOfMemory => OUT_OF_MEMORY,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            INVALID_ENUM => Some(ErrorCode::InvalidEnum),
            INVALID_VALUE => Some(ErrorCode::InvalidValue),
            INVALID_OPERATION => Some(ErrorCode::InvalidOperation),
            STACK_OVERFLOW => Some(ErrorCode::StackOverflow),
            STACK_UNDERFLOW => Some(ErrorCode::StackUnderflow),
            OUT_OF_MEMORY => Some(ErrorCode::OutOfMemory),
            _ => None,
        }
    }

    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "invalid_enum" => Some(ErrorCode::InvalidEnum),
            "invalid_value" => Some(ErrorCode::InvalidValue),
            "invalid_operation" => Some(ErrorCode::InvalidOperation),
            "stack_overflow" => Some(ErrorCode::StackOverflow),
            "stack_underflow" => Some(ErrorCode::StackUnderflow),
            "out_of_memory" => Some(ErrorCode::OutOfMemory),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::InvalidEnum => "invalid enum",
            ErrorCode::InvalidValue => "invalid value",
            ErrorCode::InvalidOperation => "invalid operation",
            ErrorCode::StackOverflow => "stack overflow",
            ErrorCode::StackUnderflow => "stack underflow",
            ErrorCode::OutOfMemory => "out of memory",
        };
        write!(f, "{name} ({:#06x})", self.as_raw())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListMode {
    Compile,
    CompileAndExecute,
}

impl ListMode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            COMPILE => Some(ListMode::Compile),
            COMPILE_AND_EXECUTE => Some(ListMode::CompileAndExecute),
            _ => None,
        }
    }

    pub fn executes(self) -> bool {
        self == ListMode::CompileAndExecute
    }
}

/// Element encodings accepted for an indirect array of list names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListNameType {
    Byte,
    UnsignedByte,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Float,
}

impl ListNameType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            BYTE => Some(ListNameType::Byte),
            UNSIGNED_BYTE => Some(ListNameType::UnsignedByte),
            SHORT => Some(ListNameType::Short),
            UNSIGNED_SHORT => Some(ListNameType::UnsignedShort),
            INT => Some(ListNameType::Int),
            UNSIGNED_INT => Some(ListNameType::UnsignedInt),
            FLOAT => Some(ListNameType::Float),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            ListNameType::Byte => BYTE,
            ListNameType::UnsignedByte => UNSIGNED_BYTE,
            ListNameType::Short => SHORT,
            ListNameType::UnsignedShort => UNSIGNED_SHORT,
            ListNameType::Int => INT,
            ListNameType::UnsignedInt => UNSIGNED_INT,
            ListNameType::Float => FLOAT,
        }
    }

    pub fn size(self) -> usize {
        match self {
            ListNameType::Byte | ListNameType::UnsignedByte => 1,
            ListNameType::Short | ListNameType::UnsignedShort => 2,
            ListNameType::Int | ListNameType::UnsignedInt | ListNameType::Float => 4,
        }
    }

    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "byte" => Some(ListNameType::Byte),
            "ubyte" => Some(ListNameType::UnsignedByte),
            "short" => Some(ListNameType::Short),
            "ushort" => Some(ListNameType::UnsignedShort),
            "int" => Some(ListNameType::Int),
            "uint" => Some(ListNameType::UnsignedInt),
            "float" => Some(ListNameType::Float),
            _ => None,
        }
    }

    fn read(self, bytes: &[u8]) -> u32 {
        match self {
            ListNameType::Byte => i8::from_ne_bytes([bytes[0]]) as u32,
            ListNameType::UnsignedByte => u32::from(bytes[0]),
            ListNameType::Short => i16::from_ne_bytes([bytes[0], bytes[1]]) as u32,
            ListNameType::UnsignedShort => u32::from(u16::from_ne_bytes([bytes[0], bytes[1]])),
            ListNameType::Int => {
                i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u32
            }
            ListNameType::UnsignedInt => {
                u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            ListNameType::Float => {
                f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).floor() as i32 as u32
            }
        }
    }

    pub fn encode(self, values: &[i64]) -> Vec<u8> {
        let mut out = Vec::with_capacity(values.len() * self.size());
        for &value in values {
            match self {
                ListNameType::Byte => out.extend_from_slice(&(value as i8).to_ne_bytes()),
                ListNameType::UnsignedByte => out.extend_from_slice(&(value as u8).to_ne_bytes()),
                ListNameType::Short => out.extend_from_slice(&(value as i16).to_ne_bytes()),
                ListNameType::UnsignedShort => {
                    out.extend_from_slice(&(value as u16).to_ne_bytes())
                }
                ListNameType::Int => out.extend_from_slice(&(value as i32).to_ne_bytes()),
                ListNameType::UnsignedInt => out.extend_from_slice(&(value as u32).to_ne_bytes()),
                ListNameType::Float => out.extend_from_slice(&(value as f32).to_ne_bytes()),
            }
        }
        out
    }
}

/// A client array of list names, snapshotted at the time of the call.
#[derive(Clone, Debug, PartialEq)]
pub struct ListNames {
    pub ty: ListNameType,
    pub count: usize,
    pub data: Arc<[u8]>,
}

impl ListNames {
    pub fn new(ty: ListNameType, data: &[u8]) -> Self {
        let count = data.len() / ty.size();
        Self {
            ty,
            count,
            data: Arc::from(&data[..count * ty.size()]),
        }
    }

    pub fn from_values(ty: ListNameType, values: &[i64]) -> Self {
        Self::new(ty, &ty.encode(values))
    }

    pub fn offsets(&self) -> impl Iterator<Item = u32> + '_ {
        let size = self.ty.size();
        self.data
            .chunks_exact(size)
            .take(self.count)
            .map(move |chunk| self.ty.read(chunk))
    }

    pub fn names(&self, base: u32) -> impl Iterator<Item = u32> + '_ {
        self.offsets().map(move |offset| base.wrapping_add(offset))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u64);

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CallList(u32),
    CallLists(ListNames),
    ListBase(u32),
    VertexBatch {
        batch: BatchId,
        loopback: bool,
    },
    Error {
        code: ErrorCode,
        message: Cow<'static, str>,
    },
    Begin(u32),
    End,
    ShadeModel(u32),
    Enable(u32),
    Disable(u32),
    MatrixMode(u32),
    LoadIdentity,
    PushMatrix,
    PopMatrix,
    LoadMatrix([f32; 16]),
    MultMatrix([f32; 16]),
    Translate([f32; 3]),
    Rotate {
        angle: f32,
        axis: [f32; 3],
    },
    Scale([f32; 3]),
    Viewport {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    Scissor {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    ClearColor([f32; 4]),
    ClearDepth(f64),
    DepthRange {
        near: f64,
        far: f64,
    },
    Clear(u32),
    BlendFunc {
        src: u32,
        dst: u32,
    },
    DepthFunc(u32),
    DepthMask(bool),
    ColorMask([bool; 4]),
    LineWidth(f32),
    PointSize(f32),
    Color([f32; 4]),
    Normal([f32; 3]),
    TexCoord([f32; 2]),
    Vertex([f32; 3]),
    Material {
        face: u32,
        pname: u32,
        params: [f32; 4],
    },
    Light {
        light: u32,
        pname: u32,
        params: [f32; 4],
    },
    ActiveTexture(u32),
    BindTexture {
        target: u32,
        texture: u32,
    },
    TexParameter {
        target: u32,
        pname: u32,
        value: f32,
    },
    UseProgram(u32),
    Uniform1i {
        location: i32,
        value: i32,
    },
    Uniform4fv {
        location: i32,
        count: i32,
        values: Option<Arc<[f32]>>,
    },
    PixelMap {
        map: u32,
        size: i32,
        values: Option<Arc<[f32]>>,
    },
    PolygonStipple(Option<Arc<[u8]>>),
    Bitmap {
        width: i32,
        height: i32,
        origin: [f32; 2],
        advance: [f32; 2],
        bitmap: Option<Arc<[u8]>>,
    },
    DrawPixels {
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        pixels: Option<Arc<[u8]>>,
    },
    TexImage2D {
        target: u32,
        level: i32,
        internal_format: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        pixels: Option<Arc<[u8]>>,
    },
    PushAttrib(u32),
    PopAttrib,
}

impl Command {
    pub fn opcode(&self) -> u16 {
        match self {
            Command::CallList(_) => OP_CALL_LIST,
            Command::CallLists(_) => OP_CALL_LISTS,
            Command::ListBase(_) => OP_LIST_BASE,
            Command::VertexBatch { loopback: false, .. } => OP_VERTEX_BATCH,
            Command::VertexBatch { loopback: true, .. } => OP_VERTEX_BATCH_LOOPBACK,
            Command::Error { .. } => OP_ERROR,
            Command::Begin(_) => OP_BEGIN,
            Command::End => OP_END,
            Command::ShadeModel(_) => OP_SHADE_MODEL,
            Command::Enable(_) => OP_ENABLE,
            Command::Disable(_) => OP_DISABLE,
            Command::MatrixMode(_) => OP_MATRIX_MODE,
            Command::LoadIdentity => OP_LOAD_IDENTITY,
            Command::PushMatrix => OP_PUSH_MATRIX,
            Command::PopMatrix => OP_POP_MATRIX,
            Command::LoadMatrix(_) => OP_LOAD_MATRIX,
            Command::MultMatrix(_) => OP_MULT_MATRIX,
            Command::Translate(_) => OP_TRANSLATE,
            Command::Rotate { .. } => OP_ROTATE,
            Command::Scale(_) => OP_SCALE,
            Command::Viewport { .. } => OP_VIEWPORT,
            Command::Scissor { .. } => OP_SCISSOR,
            Command::ClearColor(_) => OP_CLEAR_COLOR,
            Command::ClearDepth(_) => OP_CLEAR_DEPTH,
            Command::DepthRange { .. } => OP_DEPTH_RANGE,
            Command::Clear(_) => OP_CLEAR,
            Command::BlendFunc { .. } => OP_BLEND_FUNC,
            Command::DepthFunc(_) => OP_DEPTH_FUNC,
            Command::DepthMask(_) => OP_DEPTH_MASK,
            Command::ColorMask(_) => OP_COLOR_MASK,
            Command::LineWidth(_) => OP_LINE_WIDTH,
            Command::PointSize(_) => OP_POINT_SIZE,
            Command::Color(_) => OP_COLOR,
            Command::Normal(_) => OP_NORMAL,
            Command::TexCoord(_) => OP_TEX_COORD,
            Command::Vertex(_) => OP_VERTEX,
            Command::Material { .. } => OP_MATERIAL,
            Command::Light { .. } => OP_LIGHT,
            Command::ActiveTexture(_) => OP_ACTIVE_TEXTURE,
            Command::BindTexture { .. } => OP_BIND_TEXTURE,
            Command::TexParameter { .. } => OP_TEX_PARAMETER,
            Command::UseProgram(_) => OP_USE_PROGRAM,
            Command::Uniform1i { .. } => OP_UNIFORM_1I,
            Command::Uniform4fv { .. } => OP_UNIFORM_4FV,
            Command::PixelMap { .. } => OP_PIXEL_MAP,
            Command::PolygonStipple(_) => OP_POLYGON_STIPPLE,
            Command::Bitmap { .. } => OP_BITMAP,
            Command::DrawPixels { .. } => OP_DRAW_PIXELS,
            Command::TexImage2D { .. } => OP_TEX_IMAGE_2D,
            Command::PushAttrib(_) => OP_PUSH_ATTRIB,
            Command::PopAttrib => OP_POP_ATTRIB,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        opcode_info(self.opcode()).map_or("?", |info| info.name)
    }
}

/// The driver layer that performs the actual state changes and draws.
pub trait Dispatch {
    fn dispatch(&mut self, command: &Command);

    fn error(&mut self, code: ErrorCode, message: &str);
}

/// Owner of the bulk per-vertex batch objects referenced by batch
/// instructions. The engine sequences and frees batches but never looks
/// inside them.
pub trait BatchProvider: Send + Sync {
    fn playback(&self, batch: BatchId, loopback: bool, driver: &mut dyn Dispatch);

    fn describe(&self, batch: BatchId) -> String;

    fn destroy(&self, batch: BatchId);
}
