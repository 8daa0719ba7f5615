#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ownership {
    Buffer,
    Batch,
    Message,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Int,
    UInt,
    Float,
    Enum,
    Bool,
    Double,
    Ref(Ownership),
}

impl Field {
    pub const fn words(self) -> usize {
        match self {
            Field::Double => 2,
            Field::Ref(_) => POINTER_WORDS,
            _ => 1,
        }
    }

    pub const fn is_wide(self) -> bool {
        match self {
            Field::Double => true,
            Field::Ref(_) => POINTER_WORDS > 1,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpClass {
    Control,
    State,
    Transform,
    Attribute,
    Primitive,
    Pixel,
    Shader,
    Batch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub opcode: u16,
    pub name: &'static str,
    pub fields: &'static [Field],
    pub class: OpClass,
    pub frontend_state: bool,
}

impl OpcodeInfo {
    pub const fn payload_words(&self) -> usize {
        let mut total = 0;
        let mut index = 0;
        while index < self.fields.len() {
            total += self.fields[index].words();
            index += 1;
        }
        total
    }

    pub const fn instruction_words(&self) -> usize {
        1 + self.payload_words()
    }

    pub const fn wide(&self) -> bool {
        let mut index = 0;
        while index < self.fields.len() {
            if self.fields[index].is_wide() {
                return true;
            }
            index += 1;
        }
        false
    }

    /// Word offsets (relative to the payload start) of every reference field.
    pub fn refs(&self) -> impl Iterator<Item = (usize, Ownership)> + '_ {
        let mut offset = 0;
        self.fields.iter().filter_map(move |field| {
            let at = offset;
            offset += field.words();
            match field {
                Field::Ref(ownership) => Some((at, *ownership)),
                _ => None,
            }
        })
    }
}

pub const POINTER_WORDS: usize = if usize::BITS > 32 { 2 } else { 1 };

pub const OP_NOP: u16 = 0;
pub const OP_ERROR: u16 = 1;
pub const OP_CALL_LIST: u16 = 2;
pub const OP_CALL_LISTS: u16 = 3;
pub const OP_LIST_BASE: u16 = 4;
pub const OP_VERTEX_BATCH: u16 = 5;
pub const OP_VERTEX_BATCH_LOOPBACK: u16 = 6;
pub const OP_END_OF_LIST: u16 = 7;
pub const OP_BEGIN: u16 = 8;
pub const OP_END: u16 = 9;
pub const OP_SHADE_MODEL: u16 = 10;
pub const OP_ENABLE: u16 = 11;
pub const OP_DISABLE: u16 = 12;
pub const OP_MATRIX_MODE: u16 = 13;
pub const OP_LOAD_IDENTITY: u16 = 14;
pub const OP_PUSH_MATRIX: u16 = 15;
pub const OP_POP_MATRIX: u16 = 16;
pub const OP_LOAD_MATRIX: u16 = 17;
pub const OP_MULT_MATRIX: u16 = 18;
pub const OP_TRANSLATE: u16 = 19;
pub const OP_ROTATE: u16 = 20;
pub const OP_SCALE: u16 = 21;
pub const OP_VIEWPORT: u16 = 22;
pub const OP_SCISSOR: u16 = 23;
pub const OP_CLEAR_COLOR: u16 = 24;
pub const OP_CLEAR_DEPTH: u16 = 25;
pub const OP_DEPTH_RANGE: u16 = 26;
pub const OP_CLEAR: u16 = 27;
pub const OP_BLEND_FUNC: u16 = 28;
pub const OP_DEPTH_FUNC: u16 = 29;
pub const OP_DEPTH_MASK: u16 = 30;
pub const OP_COLOR_MASK: u16 = 31;
pub const OP_LINE_WIDTH: u16 = 32;
pub const OP_POINT_SIZE: u16 = 33;
pub const OP_COLOR: u16 = 34;
pub const OP_NORMAL: u16 = 35;
pub const OP_TEX_COORD: u16 = 36;
pub const OP_VERTEX: u16 = 37;
pub const OP_MATERIAL: u16 = 38;
pub const OP_LIGHT: u16 = 39;
pub const OP_ACTIVE_TEXTURE: u16 = 40;
pub const OP_BIND_TEXTURE: u16 = 41;
pub const OP_TEX_PARAMETER: u16 = 42;
pub const OP_USE_PROGRAM: u16 = 43;
pub const OP_UNIFORM_1I: u16 = 44;
pub const OP_UNIFORM_4FV: u16 = 45;
pub const OP_PIXEL_MAP: u16 = 46;
pub const OP_POLYGON_STIPPLE: u16 = 47;
pub const OP_BITMAP: u16 = 48;
pub const OP_DRAW_PIXELS: u16 = 49;
pub const OP_TEX_IMAGE_2D: u16 = 50;
pub const OP_PUSH_ATTRIB: u16 = 51;
pub const OP_POP_ATTRIB: u16 = 52;

pub const OPCODE_COUNT: usize = 53;

const F4: [Field; 4] = [Field::Float, Field::Float, Field::Float, Field::Float];
const F3: [Field; 3] = [Field::Float, Field::Float, Field::Float];
const I4: [Field; 4] = [Field::Int, Field::Int, Field::Int, Field::Int];
const F16: [Field; 16] = [Field::Float; 16];
const ENUM1: [Field; 1] = [Field::Enum];
const NONE: [Field; 0] = [];

const fn op(
    opcode: u16,
    name: &'static str,
    fields: &'static [Field],
    class: OpClass,
    frontend_state: bool,
) -> OpcodeInfo {
    OpcodeInfo {
        opcode,
        name,
        fields,
        class,
        frontend_state,
    }
}

pub const OPCODES: [OpcodeInfo; OPCODE_COUNT] = [
    op(OP_NOP, "nop", &NONE, OpClass::Control, false),
    op(
        OP_ERROR,
        "error",
        &[Field::Enum, Field::Ref(Ownership::Message)],
        OpClass::Control,
        false,
    ),
    op(OP_CALL_LIST, "call_list", &[Field::UInt], OpClass::Control, true),
    op(
        OP_CALL_LISTS,
        "call_lists",
        &[Field::Int, Field::Enum, Field::Ref(Ownership::Buffer)],
        OpClass::Control,
        true,
    ),
    op(OP_LIST_BASE, "list_base", &[Field::UInt], OpClass::Control, true),
    op(
        OP_VERTEX_BATCH,
        "vertex_batch",
        &[Field::Ref(Ownership::Batch)],
        OpClass::Batch,
        false,
    ),
    op(
        OP_VERTEX_BATCH_LOOPBACK,
        "vertex_batch_loopback",
        &[Field::Ref(Ownership::Batch)],
        OpClass::Batch,
        false,
    ),
    op(OP_END_OF_LIST, "end_of_list", &NONE, OpClass::Control, false),
    op(OP_BEGIN, "begin", &ENUM1, OpClass::Primitive, false),
    op(OP_END, "end", &NONE, OpClass::Primitive, false),
    op(OP_SHADE_MODEL, "shade_model", &ENUM1, OpClass::State, false),
    op(OP_ENABLE, "enable", &ENUM1, OpClass::State, false),
    op(OP_DISABLE, "disable", &ENUM1, OpClass::State, false),
    op(OP_MATRIX_MODE, "matrix_mode", &ENUM1, OpClass::Transform, true),
    op(OP_LOAD_IDENTITY, "load_identity", &NONE, OpClass::Transform, false),
    op(OP_PUSH_MATRIX, "push_matrix", &NONE, OpClass::Transform, true),
    op(OP_POP_MATRIX, "pop_matrix", &NONE, OpClass::Transform, true),
    op(OP_LOAD_MATRIX, "load_matrix", &F16, OpClass::Transform, false),
    op(OP_MULT_MATRIX, "mult_matrix", &F16, OpClass::Transform, false),
    op(OP_TRANSLATE, "translate", &F3, OpClass::Transform, false),
    op(OP_ROTATE, "rotate", &F4, OpClass::Transform, false),
    op(OP_SCALE, "scale", &F3, OpClass::Transform, false),
    op(OP_VIEWPORT, "viewport", &I4, OpClass::State, false),
    op(OP_SCISSOR, "scissor", &I4, OpClass::State, false),
    op(OP_CLEAR_COLOR, "clear_color", &F4, OpClass::State, false),
    op(OP_CLEAR_DEPTH, "clear_depth", &[Field::Double], OpClass::State, false),
    op(
        OP_DEPTH_RANGE,
        "depth_range",
        &[Field::Double, Field::Double],
        OpClass::State,
        false,
    ),
    op(OP_CLEAR, "clear", &[Field::UInt], OpClass::Primitive, false),
    op(
        OP_BLEND_FUNC,
        "blend_func",
        &[Field::Enum, Field::Enum],
        OpClass::State,
        false,
    ),
    op(OP_DEPTH_FUNC, "depth_func", &ENUM1, OpClass::State, false),
    op(OP_DEPTH_MASK, "depth_mask", &[Field::Bool], OpClass::State, false),
    op(
        OP_COLOR_MASK,
        "color_mask",
        &[Field::Bool, Field::Bool, Field::Bool, Field::Bool],
        OpClass::State,
        false,
    ),
    op(OP_LINE_WIDTH, "line_width", &[Field::Float], OpClass::State, false),
    op(OP_POINT_SIZE, "point_size", &[Field::Float], OpClass::State, false),
    op(OP_COLOR, "color", &F4, OpClass::Attribute, false),
    op(OP_NORMAL, "normal", &F3, OpClass::Attribute, false),
    op(
        OP_TEX_COORD,
        "tex_coord",
        &[Field::Float, Field::Float],
        OpClass::Attribute,
        false,
    ),
    op(OP_VERTEX, "vertex", &F3, OpClass::Attribute, false),
    op(
        OP_MATERIAL,
        "material",
        &[
            Field::Enum,
            Field::Enum,
            Field::Float,
            Field::Float,
            Field::Float,
            Field::Float,
        ],
        OpClass::Attribute,
        false,
    ),
    op(
        OP_LIGHT,
        "light",
        &[
            Field::Enum,
            Field::Enum,
            Field::Float,
            Field::Float,
            Field::Float,
            Field::Float,
        ],
        OpClass::State,
        false,
    ),
    op(OP_ACTIVE_TEXTURE, "active_texture", &ENUM1, OpClass::State, true),
    op(
        OP_BIND_TEXTURE,
        "bind_texture",
        &[Field::Enum, Field::UInt],
        OpClass::State,
        false,
    ),
    op(
        OP_TEX_PARAMETER,
        "tex_parameter",
        &[Field::Enum, Field::Enum, Field::Float],
        OpClass::State,
        false,
    ),
    op(OP_USE_PROGRAM, "use_program", &[Field::UInt], OpClass::Shader, false),
    op(
        OP_UNIFORM_1I,
        "uniform_1i",
        &[Field::Int, Field::Int],
        OpClass::Shader,
        false,
    ),
    op(
        OP_UNIFORM_4FV,
        "uniform_4fv",
        &[Field::Int, Field::Int, Field::Ref(Ownership::Buffer)],
        OpClass::Shader,
        false,
    ),
    op(
        OP_PIXEL_MAP,
        "pixel_map",
        &[Field::Enum, Field::Int, Field::Ref(Ownership::Buffer)],
        OpClass::Pixel,
        false,
    ),
    op(
        OP_POLYGON_STIPPLE,
        "polygon_stipple",
        &[Field::Ref(Ownership::Buffer)],
        OpClass::Pixel,
        false,
    ),
    op(
        OP_BITMAP,
        "bitmap",
        &[
            Field::Int,
            Field::Int,
            Field::Float,
            Field::Float,
            Field::Float,
            Field::Float,
            Field::Ref(Ownership::Buffer),
        ],
        OpClass::Pixel,
        false,
    ),
    op(
        OP_DRAW_PIXELS,
        "draw_pixels",
        &[
            Field::Int,
            Field::Int,
            Field::Enum,
            Field::Enum,
            Field::Ref(Ownership::Buffer),
        ],
        OpClass::Pixel,
        false,
    ),
    op(
        OP_TEX_IMAGE_2D,
        "tex_image_2d",
        &[
            Field::Enum,
            Field::Int,
            Field::Int,
            Field::Int,
            Field::Int,
            Field::Enum,
            Field::Enum,
            Field::Ref(Ownership::Buffer),
        ],
        OpClass::Pixel,
        false,
    ),
    op(OP_PUSH_ATTRIB, "push_attrib", &[Field::UInt], OpClass::State, false),
    op(OP_POP_ATTRIB, "pop_attrib", &NONE, OpClass::State, false),
];

pub fn opcode_info(opcode: u16) -> Option<&'static OpcodeInfo> {
    OPCODES
        .get(opcode as usize)
        .filter(|info| info.opcode == opcode)
}

pub fn opcode_by_name(name: &str) -> Option<&'static OpcodeInfo> {
    OPCODES.iter().find(|info| info.name == name)
}

pub const NO_ERROR: u32 = 0;
pub const INVALID_ENUM: u32 = 0x0500;
pub const INVALID_VALUE: u32 = 0x0501;
pub const INVALID_OPERATION: u32 = 0x0502;
pub const STACK_OVERFLOW: u32 = 0x0503;
pub const STACK_UNDERFLOW: u32 = 0x0504;
pub const OUT_OF_MEMORY: u32 = 0x0505;

pub const COMPILE: u32 = 0x1300;
pub const COMPILE_AND_EXECUTE: u32 = 0x1301;

pub const BYTE: u32 = 0x1400;
pub const UNSIGNED_BYTE: u32 = 0x1401;
pub const SHORT: u32 = 0x1402;
pub const UNSIGNED_SHORT: u32 = 0x1403;
pub const INT: u32 = 0x1404;
pub const UNSIGNED_INT: u32 = 0x1405;
pub const FLOAT: u32 = 0x1406;
pub const TWO_BYTES: u32 = 0x1407;
pub const THREE_BYTES: u32 = 0x1408;
pub const FOUR_BYTES: u32 = 0x1409;
pub const BITMAP: u32 = 0x1A00;

pub const FLAT: u32 = 0x1D00;
pub const SMOOTH: u32 = 0x1D01;

pub const FRONT: u32 = 0x0404;
pub const BACK: u32 = 0x0405;
pub const FRONT_AND_BACK: u32 = 0x0408;

pub const AMBIENT: u32 = 0x1200;
pub const DIFFUSE: u32 = 0x1201;
pub const SPECULAR: u32 = 0x1202;
pub const EMISSION: u32 = 0x1600;
pub const SHININESS: u32 = 0x1601;
pub const AMBIENT_AND_DIFFUSE: u32 = 0x1602;
pub const COLOR_INDEXES: u32 = 0x1603;

pub const POINTS: u32 = 0x0000;
pub const LINES: u32 = 0x0001;
pub const TRIANGLES: u32 = 0x0004;
pub const QUADS: u32 = 0x0007;
pub const POLYGON: u32 = 0x0009;
pub const PATCHES: u32 = 0x000E;

pub const COLOR_INDEX: u32 = 0x1900;
pub const STENCIL_INDEX: u32 = 0x1901;
pub const DEPTH_COMPONENT: u32 = 0x1902;
pub const RED: u32 = 0x1903;
pub const GREEN: u32 = 0x1904;
pub const BLUE: u32 = 0x1905;
pub const ALPHA: u32 = 0x1906;
pub const RGB: u32 = 0x1907;
pub const RGBA: u32 = 0x1908;
pub const LUMINANCE: u32 = 0x1909;
pub const LUMINANCE_ALPHA: u32 = 0x190A;
pub const BGRA: u32 = 0x80E1;

pub const MODELVIEW: u32 = 0x1700;
pub const PROJECTION: u32 = 0x1701;
pub const TEXTURE: u32 = 0x1702;

pub const COLOR_BUFFER_BIT: u32 = 0x0000_4000;
pub const DEPTH_BUFFER_BIT: u32 = 0x0000_0100;
pub const LIGHTING_BIT: u32 = 0x0000_0040;
pub const ALL_ATTRIB_BITS: u32 = 0xFFFF_FFFF;

pub const LIGHTING: u32 = 0x0B50;
pub const DEPTH_TEST: u32 = 0x0B71;
pub const BLEND: u32 = 0x0BE2;
pub const TEXTURE_2D: u32 = 0x0DE1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_indexed_by_opcode() {
        for (index, info) in OPCODES.iter().enumerate() {
            assert_eq!(info.opcode as usize, index, "{} is out of place", info.name);
        }
    }

    #[test]
    fn names_are_unique() {
        for info in &OPCODES {
            let matches = OPCODES.iter().filter(|other| other.name == info.name).count();
            assert_eq!(matches, 1, "duplicate mnemonic {}", info.name);
        }
    }

    #[test]
    fn ref_offsets_account_for_preceding_fields() {
        let info = opcode_info(OP_CALL_LISTS).expect("call_lists should exist");
        let refs: Vec<_> = info.refs().collect();
        assert_eq!(refs, vec![(2, Ownership::Buffer)]);
        assert_eq!(info.payload_words(), 2 + POINTER_WORDS);

        let depth = opcode_info(OP_DEPTH_RANGE).expect("depth_range should exist");
        assert_eq!(depth.payload_words(), 4);
        assert!(depth.wide());
    }

    #[test]
    fn largest_instruction_fits_in_a_small_block() {
        let largest = OPCODES
            .iter()
            .map(OpcodeInfo::instruction_words)
            .max()
            .expect("table is not empty");
        assert!(largest < 32);
    }
}
