use std::fmt::Write;

use dl_abi::{Field, OP_NOP, Ownership, opcode_info};

use crate::arena::SmallListStore;
use crate::command::{BatchId, BatchProvider};
use crate::list::{DisplayList, Storage};
use crate::node::{Node, read_ref, unpack_f64};
use crate::payload::{Payload, PayloadTable};

fn write_field(
    out: &mut String,
    field: Field,
    words: &[Node],
    payloads: &PayloadTable,
    batches: Option<&dyn BatchProvider>,
) {
    let first = words.first().copied();
    match field {
        Field::Int => match first.and_then(Node::as_int) {
            Some(value) => {
                let _ = write!(out, " {value}");
            }
            None => out.push_str(" <bad int>"),
        },
        Field::UInt => match first.and_then(Node::as_uint) {
            Some(value) => {
                let _ = write!(out, " {value}");
            }
            None => out.push_str(" <bad uint>"),
        },
        Field::Float => match first.and_then(Node::as_float) {
            Some(value) => {
                let _ = write!(out, " {value}");
            }
            None => out.push_str(" <bad float>"),
        },
        Field::Enum => match first.and_then(Node::as_enum) {
            Some(value) => {
                let _ = write!(out, " {value:#06x}");
            }
            None => out.push_str(" <bad enum>"),
        },
        Field::Bool => match first.and_then(Node::as_bool) {
            Some(value) => {
                let _ = write!(out, " {value}");
            }
            None => out.push_str(" <bad bool>"),
        },
        Field::Double => match unpack_f64(words) {
            Some(value) => {
                let _ = write!(out, " {value}");
            }
            None => out.push_str(" <bad double>"),
        },
        Field::Ref(ownership) => {
            let Some(handle) = read_ref(words) else {
                out.push_str(" <bad ref>");
                return;
            };
            if handle == 0 {
                out.push_str(" null");
                return;
            }
            match (ownership, payloads.get(handle)) {
                (Ownership::Batch, _) => {
                    let _ = write!(out, " batch#{handle}");
                    if let Some(provider) = batches {
                        let _ = write!(out, " ({})", provider.describe(BatchId(handle)));
                    }
                }
                (_, Some(Payload::Message(message))) => {
                    let _ = write!(out, " {message:?}");
                }
                (_, Some(Payload::Floats(values))) => {
                    let _ = write!(out, " buf#{handle}[{} floats]", values.len());
                }
                (_, Some(Payload::Bytes(bytes))) => {
                    let _ = write!(out, " buf#{handle}[{} bytes]", bytes.len());
                }
                (_, None) => {
                    let _ = write!(out, " buf#{handle}<released>");
                }
            }
        }
    }
}

/// Human-readable listing of an encoded list, one instruction per line.
pub fn dump_list(
    list: &DisplayList,
    store: &SmallListStore,
    batches: Option<&dyn BatchProvider>,
) -> String {
    let mut out = String::new();
    let storage = match list.storage() {
        Storage::Blocks(_) => "heap",
        Storage::Pooled { .. } => "pooled",
    };
    let _ = write!(&mut out, "list {}", list.name());
    if let Some(label) = list.label() {
        let _ = write!(&mut out, " {label:?}");
    }
    let _ = writeln!(
        &mut out,
        " ({storage}, {} blocks, {} words)",
        list.segment_count(),
        list.word_count()
    );

    let mut count = 0usize;
    for instruction in list.instructions(store) {
        let instruction = match instruction {
            Ok(instruction) => instruction,
            Err(err) => {
                let _ = writeln!(&mut out, "  <corrupt: {err}>");
                return out;
            }
        };
        if instruction.opcode == OP_NOP {
            continue;
        }
        count += 1;
        let Some(info) = opcode_info(instruction.opcode) else {
            continue;
        };
        let mut line = format!(
            "  [{}:{:04}] {}",
            instruction.at.segment, instruction.at.offset, info.name
        );
        let mut offset = 0;
        for &field in info.fields {
            write_field(
                &mut line,
                field,
                &instruction.words[offset..],
                &list.payloads,
                batches,
            );
            offset += field.words();
        }
        let _ = writeln!(&mut out, "{line}");
    }
    let _ = writeln!(&mut out, "  end ({count} instructions)");
    out
}
