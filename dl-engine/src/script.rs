//! Line-oriented text format for building and running display lists.
//!
//! ```text
//! .list 1 compile        # or `execute`
//! shade_model smooth
//! color 1 0 0 1
//! draw_pixels 1 1 rgba ubyte 255 0 0 255
//! .end
//! .call 1
//! ```

use std::borrow::Cow;
use std::fmt::Write;

use dl_abi::*;

use crate::codec::{self, BufferKind};
use crate::command::{BatchId, Command, Dispatch, ErrorCode, ListMode, ListNameType, ListNames};
use crate::context::Context;
use crate::node::{Node, pack_f64, write_ref};
use crate::payload::{Payload, PayloadTable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ScriptError {}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    NewList { name: u32, mode: ListMode },
    EndList,
    GenLists(i32),
    DeleteLists { first: u32, range: i32 },
    Label { name: u32, text: String },
    CallList(u32),
    CallLists(ListNames),
    ListBase(u32),
    Batch(BatchId),
    Error { code: ErrorCode, message: String },
    Dump(u32),
    Info(u32),
    Command(Command),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub line: usize,
    pub action: Action,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub steps: Vec<Step>,
}

const SYMBOLS: &[(&str, u32)] = &[
    ("compile", COMPILE),
    ("compile_and_execute", COMPILE_AND_EXECUTE),
    ("byte", BYTE),
    ("ubyte", UNSIGNED_BYTE),
    ("short", SHORT),
    ("ushort", UNSIGNED_SHORT),
    ("int", INT),
    ("uint", UNSIGNED_INT),
    ("float", FLOAT),
    ("bitmap", BITMAP),
    ("flat", FLAT),
    ("smooth", SMOOTH),
    ("front", FRONT),
    ("back", BACK),
    ("front_and_back", FRONT_AND_BACK),
    ("ambient", AMBIENT),
    ("diffuse", DIFFUSE),
    ("specular", SPECULAR),
    ("emission", EMISSION),
    ("shininess", SHININESS),
    ("ambient_and_diffuse", AMBIENT_AND_DIFFUSE),
    ("color_indexes", COLOR_INDEXES),
    ("points", POINTS),
    ("lines", LINES),
    ("triangles", TRIANGLES),
    ("quads", QUADS),
    ("polygon", POLYGON),
    ("color_index", COLOR_INDEX),
    ("stencil_index", STENCIL_INDEX),
    ("depth_component", DEPTH_COMPONENT),
    ("red", RED),
    ("alpha", ALPHA),
    ("rgb", RGB),
    ("rgba", RGBA),
    ("bgra", BGRA),
    ("luminance", LUMINANCE),
    ("luminance_alpha", LUMINANCE_ALPHA),
    ("modelview", MODELVIEW),
    ("projection", PROJECTION),
    ("texture", TEXTURE),
    ("lighting", LIGHTING),
    ("depth_test", DEPTH_TEST),
    ("blend", BLEND),
    ("texture_2d", TEXTURE_2D),
    ("color_buffer_bit", COLOR_BUFFER_BIT),
    ("depth_buffer_bit", DEPTH_BUFFER_BIT),
    ("lighting_bit", LIGHTING_BIT),
    ("all_attrib_bits", ALL_ATTRIB_BITS),
    ("invalid_enum", INVALID_ENUM),
    ("invalid_value", INVALID_VALUE),
    ("invalid_operation", INVALID_OPERATION),
    ("out_of_memory", OUT_OF_MEMORY),
];

fn err(line: usize, message: impl Into<String>) -> ScriptError {
    ScriptError {
        line,
        message: message.into(),
    }
}

pub fn parse_script(source: &str) -> Result<Script, ScriptError> {
    let mut steps = Vec::new();
    for (line_idx, raw_line) in source.lines().enumerate() {
        let line_no = line_idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let action = match line.strip_prefix('.') {
            Some(rest) => parse_directive(Tokens::new(rest, line_no))?,
            None => Action::Command(parse_command(Tokens::new(line, line_no))?),
        };
        steps.push(Step {
            line: line_no,
            action,
        });
    }
    Ok(Script { steps })
}

/// Cuts a `#` or `//` comment. Markers inside a quoted string are text.
fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '#' if !quoted => return &line[..idx],
            '/' if !quoted && line[idx + 1..].starts_with('/') => return &line[..idx],
            _ => {}
        }
    }
    line
}

/// Operands of one line. Fields are whitespace separated; a message operand
/// takes whatever is left.
struct Tokens<'a> {
    rest: &'a str,
    line: usize,
}

impl<'a> Iterator for Tokens<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let text = self.rest.trim_start();
        let end = text.find(char::is_whitespace).unwrap_or(text.len());
        let (token, rest) = text.split_at(end);
        self.rest = rest;
        (!token.is_empty()).then_some(token)
    }
}

impl<'a> Tokens<'a> {
    fn new(rest: &'a str, line: usize) -> Self {
        Self { rest, line }
    }

    fn expect(&mut self, what: &str) -> Result<&'a str, ScriptError> {
        self.next()
            .ok_or_else(|| err(self.line, format!("missing {what}")))
    }

    fn name(&mut self, what: &str) -> Result<u32, ScriptError> {
        let token = self.expect(what)?;
        parse_u32(token, self.line)
    }

    /// The rest of the line as text: a quoted literal with `\n`, `\t`, `\\`
    /// and `\"` escapes, or the bare words.
    fn text(&mut self) -> Result<String, ScriptError> {
        let text = std::mem::take(&mut self.rest).trim();
        let Some(body) = text.strip_prefix('"') else {
            return Ok(text.to_string());
        };
        let mut out = String::with_capacity(body.len());
        let mut chars = body.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '"' if chars.as_str().trim().is_empty() => return Ok(out),
                '"' => return Err(err(self.line, "text after closing quote")),
                '\\' => out.push(match chars.next() {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('\\') => '\\',
                    Some('"') => '"',
                    Some(other) => {
                        return Err(err(self.line, format!("invalid escape '\\{other}'")));
                    }
                    None => break,
                }),
                other => out.push(other),
            }
        }
        Err(err(self.line, "unterminated string literal"))
    }

    fn finish(mut self) -> Result<(), ScriptError> {
        match self.next() {
            Some(_) => Err(err(self.line, "unexpected extra tokens")),
            None => Ok(()),
        }
    }
}

fn parse_directive(mut tokens: Tokens<'_>) -> Result<Action, ScriptError> {
    let line_no = tokens.line;
    let directive = tokens.next().unwrap_or("").to_ascii_lowercase();
    let action = match directive.as_str() {
        "list" => {
            let name = tokens.name("list name")?;
            let mode = match tokens.next() {
                None | Some("compile") => ListMode::Compile,
                Some("execute") | Some("compile_and_execute") => ListMode::CompileAndExecute,
                Some(other) => return Err(err(line_no, format!("unknown list mode '{other}'"))),
            };
            Action::NewList { name, mode }
        }
        "end" => Action::EndList,
        "gen" => Action::GenLists(parse_i32(tokens.expect("range")?, line_no)?),
        "delete" => {
            let first = tokens.name("first name")?;
            let range = parse_i32(tokens.expect("range")?, line_no)?;
            Action::DeleteLists { first, range }
        }
        "label" => Action::Label {
            name: tokens.name("list name")?,
            text: tokens.text()?,
        },
        "call" => Action::CallList(tokens.name("list name")?),
        "call_lists" => {
            let ty_name = tokens.expect("name type")?;
            let ty = ListNameType::parse_name(ty_name)
                .ok_or_else(|| err(line_no, format!("unknown name type '{ty_name}'")))?;
            let values = tokens
                .by_ref()
                .map(|token| parse_i64(token, line_no))
                .collect::<Result<Vec<_>, _>>()?;
            Action::CallLists(ListNames::from_values(ty, &values))
        }
        "base" => Action::ListBase(tokens.name("list base")?),
        "batch" => Action::Batch(BatchId(parse_batch(tokens.expect("batch id")?, line_no)?)),
        "error" => {
            let token = tokens.expect("error code")?;
            let code = ErrorCode::parse_name(token)
                .or_else(|| parse_number(token).and_then(ErrorCode::from_raw))
                .ok_or_else(|| err(line_no, format!("unknown error code '{token}'")))?;
            Action::Error {
                code,
                message: tokens.text()?,
            }
        }
        "dump" => Action::Dump(tokens.name("list name")?),
        "info" => Action::Info(tokens.name("list name")?),
        other => return Err(err(line_no, format!("unknown directive '.{other}'"))),
    };
    tokens.finish()?;
    Ok(action)
}

/// Parses `mnemonic field...` using the opcode's field layout and decodes
/// the result through the same path playback uses.
fn parse_command(mut tokens: Tokens<'_>) -> Result<Command, ScriptError> {
    let line_no = tokens.line;
    let op = tokens.next().unwrap_or("").to_ascii_lowercase();
    let info = opcode_by_name(&op).ok_or_else(|| err(line_no, format!("unknown opcode '{op}'")))?;
    if matches!(info.opcode, OP_NOP | OP_END_OF_LIST) {
        return Err(err(line_no, format!("'{op}' cannot be written directly")));
    }

    let mut words = vec![Node::UInt(0); info.payload_words()];
    let mut payloads = PayloadTable::new();
    let mut at = 0;
    let mut last_enum = None;
    for &field in info.fields {
        let slot = &mut words[at..at + field.words()];
        match field {
            Field::Int => slot[0] = Node::Int(parse_i32(tokens.expect("int")?, line_no)?),
            Field::UInt => slot[0] = Node::UInt(parse_u32(tokens.expect("uint")?, line_no)?),
            Field::Enum => {
                let value = parse_u32(tokens.expect("enum")?, line_no)?;
                last_enum = Some(value);
                slot[0] = Node::Enum(value);
            }
            Field::Float => slot[0] = Node::Float(parse_f32(tokens.expect("float")?, line_no)?),
            Field::Bool => slot[0] = Node::Bool(parse_bool(tokens.expect("bool")?, line_no)?),
            Field::Double => {
                let token = tokens.expect("double")?;
                let value = token
                    .parse::<f64>()
                    .map_err(|_| err(line_no, format!("invalid double '{token}'")))?;
                slot.copy_from_slice(&pack_f64(value));
            }
            Field::Ref(Ownership::Batch) => {
                write_ref(slot, parse_batch(tokens.expect("batch id")?, line_no)?);
            }
            Field::Ref(Ownership::Message) => {
                let handle = payloads.insert(Payload::Message(Cow::Owned(tokens.text()?)));
                write_ref(slot, handle);
            }
            Field::Ref(Ownership::Buffer) => {
                let values: Vec<&str> = tokens.by_ref().collect();
                let handle = if values.is_empty() {
                    0
                } else {
                    let payload = match codec::buffer_kind(info.opcode) {
                        // List names are stored in the element type the call names.
                        Some(BufferKind::Bytes) if info.opcode == OP_CALL_LISTS => {
                            let ty = last_enum
                                .and_then(ListNameType::from_raw)
                                .ok_or_else(|| err(line_no, "invalid list name type"))?;
                            let values = values
                                .iter()
                                .map(|token| parse_i64(token, line_no))
                                .collect::<Result<Vec<_>, _>>()?;
                            Payload::Bytes(ty.encode(&values).into())
                        }
                        Some(BufferKind::Floats) => Payload::Floats(
                            values
                                .iter()
                                .map(|token| parse_f32(token, line_no))
                                .collect::<Result<Vec<_>, _>>()?
                                .into(),
                        ),
                        _ => Payload::Bytes(
                            values
                                .iter()
                                .map(|token| parse_u8(token, line_no))
                                .collect::<Result<Vec<_>, _>>()?
                                .into(),
                        ),
                    };
                    payloads.insert(payload)
                };
                write_ref(slot, handle);
            }
        }
        at += field.words();
    }

    tokens.finish()?;
    codec::decode(info.opcode, &words, &payloads)
        .ok_or_else(|| err(line_no, format!("invalid operands for '{op}'")))
}

impl Script {
    /// Runs every step against `ctx`, returning the text produced by
    /// `.gen`, `.dump` and `.info`.
    pub fn run<D: Dispatch>(&self, ctx: &mut Context<D>) -> String {
        let mut out = String::new();
        for step in &self.steps {
            match &step.action {
                Action::NewList { name, mode } => {
                    let raw = match mode {
                        ListMode::Compile => COMPILE,
                        ListMode::CompileAndExecute => COMPILE_AND_EXECUTE,
                    };
                    ctx.new_list(*name, raw);
                }
                Action::EndList => ctx.end_list(),
                Action::GenLists(range) => {
                    let first = ctx.gen_lists(*range);
                    let _ = writeln!(&mut out, "gen {range} -> {first}");
                }
                Action::DeleteLists { first, range } => {
                    ctx.delete_lists(*first, *range);
                }
                Action::Label { name, text } => ctx.object_label(*name, Some(text)),
                Action::CallList(name) => ctx.call_list(*name),
                Action::CallLists(names) => ctx.call_list_names(names),
                Action::ListBase(base) => ctx.list_base(*base),
                Action::Batch(batch) => ctx.record_vertex_batch(*batch),
                Action::Error { code, message } => ctx.compile_error(*code, message.clone()),
                Action::Dump(name) => match ctx.shared().dump(*name) {
                    Some(text) => out.push_str(&text),
                    None => {
                        let _ = writeln!(&mut out, "list {name}: not found");
                    }
                },
                Action::Info(name) => match ctx.shared().list_info(*name) {
                    Some(info) => match serde_json::to_string_pretty(&info) {
                        Ok(json) => {
                            let _ = writeln!(&mut out, "{json}");
                        }
                        Err(err) => {
                            let _ = writeln!(&mut out, "list {name}: {err}");
                        }
                    },
                    None => {
                        let _ = writeln!(&mut out, "list {name}: not found");
                    }
                },
                Action::Command(command) => ctx.submit(command.clone()),
            }
        }
        out
    }
}

fn parse_number(token: &str) -> Option<u32> {
    match token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => token.parse::<u32>().ok(),
    }
}

fn parse_u32(token: &str, line_no: usize) -> Result<u32, ScriptError> {
    parse_number(token)
        .or_else(|| {
            SYMBOLS
                .iter()
                .find(|(name, _)| token.eq_ignore_ascii_case(name))
                .map(|(_, value)| *value)
        })
        .ok_or_else(|| err(line_no, format!("invalid value '{token}'")))
}

fn parse_i32(token: &str, line_no: usize) -> Result<i32, ScriptError> {
    token
        .parse::<i32>()
        .map_err(|_| err(line_no, format!("invalid int '{token}'")))
}

fn parse_i64(token: &str, line_no: usize) -> Result<i64, ScriptError> {
    token
        .parse::<i64>()
        .map_err(|_| err(line_no, format!("invalid int '{token}'")))
}

fn parse_u8(token: &str, line_no: usize) -> Result<u8, ScriptError> {
    parse_number(token)
        .and_then(|value| u8::try_from(value).ok())
        .ok_or_else(|| err(line_no, format!("invalid byte '{token}'")))
}

fn parse_f32(token: &str, line_no: usize) -> Result<f32, ScriptError> {
    token
        .parse::<f32>()
        .map_err(|_| err(line_no, format!("invalid float '{token}'")))
}

fn parse_bool(token: &str, line_no: usize) -> Result<bool, ScriptError> {
    match token.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(err(line_no, format!("invalid bool '{token}'"))),
    }
}

fn parse_batch(token: &str, line_no: usize) -> Result<u64, ScriptError> {
    token
        .parse::<u64>()
        .map_err(|_| err(line_no, format!("invalid batch id '{token}'")))
}
