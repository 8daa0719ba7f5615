//! Per-command encoding into instruction payload words and the inverse.
//!
//! Field order always follows the opcode's layout in `dl_abi::OPCODES`;
//! everything else (cleanup, dumping, script parsing) reads that table.

use std::sync::Arc;

use dl_abi::*;

use crate::command::{BatchId, Command, ErrorCode, ListNameType, ListNames};
use crate::node::{Node, REF_WORDS, pack_f64, read_ref, unpack_f64, write_ref};
use crate::payload::{Payload, PayloadTable};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Floats,
    Bytes,
}

pub fn buffer_kind(opcode: u16) -> Option<BufferKind> {
    match opcode {
        OP_UNIFORM_4FV | OP_PIXEL_MAP => Some(BufferKind::Floats),
        OP_CALL_LISTS | OP_POLYGON_STIPPLE | OP_BITMAP | OP_DRAW_PIXELS | OP_TEX_IMAGE_2D => {
            Some(BufferKind::Bytes)
        }
        _ => None,
    }
}

pub(crate) struct Writer<'a> {
    words: &'a mut [Node],
    at: usize,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(words: &'a mut [Node]) -> Self {
        Self { words, at: 0 }
    }

    fn put(&mut self, node: Node) {
        self.words[self.at] = node;
        self.at += 1;
    }

    fn int(&mut self, value: i32) {
        self.put(Node::Int(value));
    }

    fn uint(&mut self, value: u32) {
        self.put(Node::UInt(value));
    }

    fn float(&mut self, value: f32) {
        self.put(Node::Float(value));
    }

    fn floats(&mut self, values: &[f32]) {
        for &value in values {
            self.float(value);
        }
    }

    fn enumerant(&mut self, value: u32) {
        self.put(Node::Enum(value));
    }

    fn boolean(&mut self, value: bool) {
        self.put(Node::Bool(value));
    }

    fn double(&mut self, value: f64) {
        let [low, high] = pack_f64(value);
        self.put(low);
        self.put(high);
    }

    fn reference(&mut self, handle: u64) {
        write_ref(&mut self.words[self.at..], handle);
        self.at += REF_WORDS;
    }
}

pub(crate) struct Reader<'a> {
    words: &'a [Node],
    at: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(words: &'a [Node]) -> Self {
        Self { words, at: 0 }
    }

    fn next(&mut self) -> Option<Node> {
        let node = *self.words.get(self.at)?;
        self.at += 1;
        Some(node)
    }

    fn int(&mut self) -> Option<i32> {
        self.next()?.as_int()
    }

    fn uint(&mut self) -> Option<u32> {
        self.next()?.as_uint()
    }

    fn float(&mut self) -> Option<f32> {
        self.next()?.as_float()
    }

    fn floats<const N: usize>(&mut self) -> Option<[f32; N]> {
        let mut out = [0.0; N];
        for slot in &mut out {
            *slot = self.float()?;
        }
        Some(out)
    }

    fn enumerant(&mut self) -> Option<u32> {
        self.next()?.as_enum()
    }

    fn boolean(&mut self) -> Option<bool> {
        self.next()?.as_bool()
    }

    fn double(&mut self) -> Option<f64> {
        let value = unpack_f64(self.words.get(self.at..)?)?;
        self.at += 2;
        Some(value)
    }

    pub(crate) fn reference(&mut self) -> Option<u64> {
        let value = read_ref(self.words.get(self.at..)?)?;
        self.at += REF_WORDS;
        Some(value)
    }
}

fn stash_floats(payloads: &mut PayloadTable, values: &Option<Arc<[f32]>>) -> u64 {
    match values {
        Some(values) => payloads.insert(Payload::Floats(values.clone())),
        None => 0,
    }
}

fn stash_bytes(payloads: &mut PayloadTable, bytes: &Option<Arc<[u8]>>) -> u64 {
    match bytes {
        Some(bytes) => payloads.insert(Payload::Bytes(bytes.clone())),
        None => 0,
    }
}

/// Writes `command` into an already allocated payload region. Buffers are
/// shared into `payloads`, which owns them from now on.
pub fn encode(command: &Command, words: &mut [Node], payloads: &mut PayloadTable) {
    let mut out = Writer::new(words);
    match command {
        Command::CallList(name) => out.uint(*name),
        Command::CallLists(names) => {
            out.int(names.count as i32);
            out.enumerant(names.ty.as_raw());
            let handle = payloads.insert(Payload::Bytes(names.data.clone()));
            out.reference(handle);
        }
        Command::ListBase(base) => out.uint(*base),
        Command::VertexBatch { batch, .. } => out.reference(batch.0),
        Command::Error { code, message } => {
            out.enumerant(code.as_raw());
            let handle = payloads.insert(Payload::Message(message.clone()));
            out.reference(handle);
        }
        Command::Begin(mode) => out.enumerant(*mode),
        Command::End
        | Command::LoadIdentity
        | Command::PushMatrix
        | Command::PopMatrix
        | Command::PopAttrib => {}
        Command::ShadeModel(mode) => out.enumerant(*mode),
        Command::Enable(cap) | Command::Disable(cap) => out.enumerant(*cap),
        Command::MatrixMode(mode) => out.enumerant(*mode),
        Command::LoadMatrix(m) | Command::MultMatrix(m) => out.floats(m),
        Command::Translate(v) | Command::Scale(v) => out.floats(v),
        Command::Rotate { angle, axis } => {
            out.float(*angle);
            out.floats(axis);
        }
        Command::Viewport {
            x,
            y,
            width,
            height,
        }
        | Command::Scissor {
            x,
            y,
            width,
            height,
        } => {
            out.int(*x);
            out.int(*y);
            out.int(*width);
            out.int(*height);
        }
        Command::ClearColor(color) => out.floats(color),
        Command::ClearDepth(depth) => out.double(*depth),
        Command::DepthRange { near, far } => {
            out.double(*near);
            out.double(*far);
        }
        Command::Clear(mask) => out.uint(*mask),
        Command::BlendFunc { src, dst } => {
            out.enumerant(*src);
            out.enumerant(*dst);
        }
        Command::DepthFunc(func) => out.enumerant(*func),
        Command::DepthMask(flag) => out.boolean(*flag),
        Command::ColorMask(mask) => {
            for &flag in mask {
                out.boolean(flag);
            }
        }
        Command::LineWidth(width) => out.float(*width),
        Command::PointSize(size) => out.float(*size),
        Command::Color(color) => out.floats(color),
        Command::Normal(normal) => out.floats(normal),
        Command::TexCoord(coord) => out.floats(coord),
        Command::Vertex(vertex) => out.floats(vertex),
        Command::Material {
            face,
            pname,
            params,
        } => {
            out.enumerant(*face);
            out.enumerant(*pname);
            out.floats(params);
        }
        Command::Light {
            light,
            pname,
            params,
        } => {
            out.enumerant(*light);
            out.enumerant(*pname);
            out.floats(params);
        }
        Command::ActiveTexture(unit) => out.enumerant(*unit),
        Command::BindTexture { target, texture } => {
            out.enumerant(*target);
            out.uint(*texture);
        }
        Command::TexParameter {
            target,
            pname,
            value,
        } => {
            out.enumerant(*target);
            out.enumerant(*pname);
            out.float(*value);
        }
        Command::UseProgram(program) => out.uint(*program),
        Command::Uniform1i { location, value } => {
            out.int(*location);
            out.int(*value);
        }
        Command::Uniform4fv {
            location,
            count,
            values,
        } => {
            out.int(*location);
            out.int(*count);
            let handle = stash_floats(payloads, values);
            out.reference(handle);
        }
        Command::PixelMap { map, size, values } => {
            out.enumerant(*map);
            out.int(*size);
            let handle = stash_floats(payloads, values);
            out.reference(handle);
        }
        Command::PolygonStipple(pattern) => {
            let handle = stash_bytes(payloads, pattern);
            out.reference(handle);
        }
        Command::Bitmap {
            width,
            height,
            origin,
            advance,
            bitmap,
        } => {
            out.int(*width);
            out.int(*height);
            out.floats(origin);
            out.floats(advance);
            let handle = stash_bytes(payloads, bitmap);
            out.reference(handle);
        }
        Command::DrawPixels {
            width,
            height,
            format,
            ty,
            pixels,
        } => {
            out.int(*width);
            out.int(*height);
            out.enumerant(*format);
            out.enumerant(*ty);
            let handle = stash_bytes(payloads, pixels);
            out.reference(handle);
        }
        Command::TexImage2D {
            target,
            level,
            internal_format,
            width,
            height,
            format,
            ty,
            pixels,
        } => {
            out.enumerant(*target);
            out.int(*level);
            out.int(*internal_format);
            out.int(*width);
            out.int(*height);
            out.enumerant(*format);
            out.enumerant(*ty);
            let handle = stash_bytes(payloads, pixels);
            out.reference(handle);
        }
        Command::PushAttrib(mask) => out.uint(*mask),
    }
}

fn floats_at(payloads: &PayloadTable, handle: u64) -> Option<Option<Arc<[f32]>>> {
    if handle == 0 {
        return Some(None);
    }
    match payloads.get(handle)? {
        Payload::Floats(values) => Some(Some(values.clone())),
        _ => None,
    }
}

fn bytes_at(payloads: &PayloadTable, handle: u64) -> Option<Option<Arc<[u8]>>> {
    if handle == 0 {
        return Some(None);
    }
    match payloads.get(handle)? {
        Payload::Bytes(bytes) => Some(Some(bytes.clone())),
        _ => None,
    }
}

/// Rebuilds the command stored in an instruction. `None` means the words do
/// not match the opcode's layout or reference a released payload.
pub fn decode(opcode: u16, words: &[Node], payloads: &PayloadTable) -> Option<Command> {
    let mut input = Reader::new(words);
    let command = match opcode {
        OP_CALL_LIST => Command::CallList(input.uint()?),
        OP_CALL_LISTS => {
            let count = usize::try_from(input.int()?).ok()?;
            let ty = ListNameType::from_raw(input.enumerant()?)?;
            let data = bytes_at(payloads, input.reference()?)?.unwrap_or_else(|| Arc::from([]));
            let count = count.min(data.len() / ty.size());
            Command::CallLists(ListNames { ty, count, data })
        }
        OP_LIST_BASE => Command::ListBase(input.uint()?),
        OP_VERTEX_BATCH | OP_VERTEX_BATCH_LOOPBACK => Command::VertexBatch {
            batch: BatchId(input.reference()?),
            loopback: opcode == OP_VERTEX_BATCH_LOOPBACK,
        },
        OP_ERROR => {
            let code = ErrorCode::from_raw(input.enumerant()?)?;
            let message = match payloads.get(input.reference()?)? {
                Payload::Message(message) => message.clone(),
                _ => return None,
            };
            Command::Error { code, message }
        }
        OP_BEGIN => Command::Begin(input.enumerant()?),
        OP_END => Command::End,
        OP_SHADE_MODEL => Command::ShadeModel(input.enumerant()?),
        OP_ENABLE => Command::Enable(input.enumerant()?),
        OP_DISABLE => Command::Disable(input.enumerant()?),
        OP_MATRIX_MODE => Command::MatrixMode(input.enumerant()?),
        OP_LOAD_IDENTITY => Command::LoadIdentity,
        OP_PUSH_MATRIX => Command::PushMatrix,
        OP_POP_MATRIX => Command::PopMatrix,
        OP_LOAD_MATRIX => Command::LoadMatrix(input.floats()?),
        OP_MULT_MATRIX => Command::MultMatrix(input.floats()?),
        OP_TRANSLATE => Command::Translate(input.floats()?),
        OP_ROTATE => Command::Rotate {
            angle: input.float()?,
            axis: input.floats()?,
        },
        OP_SCALE => Command::Scale(input.floats()?),
        OP_VIEWPORT => Command::Viewport {
            x: input.int()?,
            y: input.int()?,
            width: input.int()?,
            height: input.int()?,
        },
        OP_SCISSOR => Command::Scissor {
            x: input.int()?,
            y: input.int()?,
            width: input.int()?,
            height: input.int()?,
        },
        OP_CLEAR_COLOR => Command::ClearColor(input.floats()?),
        OP_CLEAR_DEPTH => Command::ClearDepth(input.double()?),
        OP_DEPTH_RANGE => Command::DepthRange {
            near: input.double()?,
            far: input.double()?,
        },
        OP_CLEAR => Command::Clear(input.uint()?),
        OP_BLEND_FUNC => Command::BlendFunc {
            src: input.enumerant()?,
            dst: input.enumerant()?,
        },
        OP_DEPTH_FUNC => Command::DepthFunc(input.enumerant()?),
        OP_DEPTH_MASK => Command::DepthMask(input.boolean()?),
        OP_COLOR_MASK => Command::ColorMask([
            input.boolean()?,
            input.boolean()?,
            input.boolean()?,
            input.boolean()?,
        ]),
        OP_LINE_WIDTH => Command::LineWidth(input.float()?),
        OP_POINT_SIZE => Command::PointSize(input.float()?),
        OP_COLOR => Command::Color(input.floats()?),
        OP_NORMAL => Command::Normal(input.floats()?),
        OP_TEX_COORD => Command::TexCoord(input.floats()?),
        OP_VERTEX => Command::Vertex(input.floats()?),
        OP_MATERIAL => Command::Material {
            face: input.enumerant()?,
            pname: input.enumerant()?,
            params: input.floats()?,
        },
        OP_LIGHT => Command::Light {
            light: input.enumerant()?,
            pname: input.enumerant()?,
            params: input.floats()?,
        },
        OP_ACTIVE_TEXTURE => Command::ActiveTexture(input.enumerant()?),
        OP_BIND_TEXTURE => Command::BindTexture {
            target: input.enumerant()?,
            texture: input.uint()?,
        },
        OP_TEX_PARAMETER => Command::TexParameter {
            target: input.enumerant()?,
            pname: input.enumerant()?,
            value: input.float()?,
        },
        OP_USE_PROGRAM => Command::UseProgram(input.uint()?),
        OP_UNIFORM_1I => Command::Uniform1i {
            location: input.int()?,
            value: input.int()?,
        },
        OP_UNIFORM_4FV => Command::Uniform4fv {
            location: input.int()?,
            count: input.int()?,
            values: floats_at(payloads, input.reference()?)?,
        },
        OP_PIXEL_MAP => Command::PixelMap {
            map: input.enumerant()?,
            size: input.int()?,
            values: floats_at(payloads, input.reference()?)?,
        },
        OP_POLYGON_STIPPLE => Command::PolygonStipple(bytes_at(payloads, input.reference()?)?),
        OP_BITMAP => Command::Bitmap {
            width: input.int()?,
            height: input.int()?,
            origin: input.floats()?,
            advance: input.floats()?,
            bitmap: bytes_at(payloads, input.reference()?)?,
        },
        OP_DRAW_PIXELS => Command::DrawPixels {
            width: input.int()?,
            height: input.int()?,
            format: input.enumerant()?,
            ty: input.enumerant()?,
            pixels: bytes_at(payloads, input.reference()?)?,
        },
        OP_TEX_IMAGE_2D => Command::TexImage2D {
            target: input.enumerant()?,
            level: input.int()?,
            internal_format: input.int()?,
            width: input.int()?,
            height: input.int()?,
            format: input.enumerant()?,
            ty: input.enumerant()?,
            pixels: bytes_at(payloads, input.reference()?)?,
        },
        OP_PUSH_ATTRIB => Command::PushAttrib(input.uint()?),
        OP_POP_ATTRIB => Command::PopAttrib,
        _ => return None,
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(command: Command) -> Option<Command> {
        let info = opcode_info(command.opcode()).expect("command has a descriptor");
        let mut words = vec![Node::UInt(0); info.payload_words()];
        let mut payloads = PayloadTable::new();
        encode(&command, &mut words, &mut payloads);
        decode(info.opcode, &words, &payloads)
    }

    #[test]
    fn payload_words_match_descriptor_layout() {
        let command = Command::DrawPixels {
            width: 2,
            height: 1,
            format: RGBA,
            ty: UNSIGNED_BYTE,
            pixels: Some(Arc::from(&[1u8, 2, 3, 4, 5, 6, 7, 8][..])),
        };
        assert_eq!(roundtrip(command.clone()), Some(command));

        let depth = Command::DepthRange {
            near: 0.25,
            far: 0.75,
        };
        assert_eq!(roundtrip(depth.clone()), Some(depth));
    }

    #[test]
    fn mistyped_words_do_not_decode() {
        let payloads = PayloadTable::new();
        assert_eq!(decode(OP_VERTEX, &[Node::Int(1)], &payloads), None);
        assert_eq!(decode(OP_SHADE_MODEL, &[], &payloads), None);
        assert_eq!(decode(999, &[Node::Int(1)], &payloads), None);
    }

    #[test]
    fn released_buffer_is_not_resurrected() {
        let mut payloads = PayloadTable::new();
        let mut words = vec![Node::UInt(0); REF_WORDS];
        encode(
            &Command::PolygonStipple(Some(Arc::from(vec![0xAA; 128]))),
            &mut words,
            &mut payloads,
        );
        let handle = Reader::new(&words).reference().expect("handle");
        payloads.release(handle);
        assert_eq!(decode(OP_POLYGON_STIPPLE, &words, &payloads), None);
    }
}
