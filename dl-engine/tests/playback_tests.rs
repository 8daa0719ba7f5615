mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::*;
use proptest::prelude::*;

fn replayable_command() -> impl Strategy<Value = Command> {
    let float = (-1000i32..1000).prop_map(|value| value as f32 * 0.5);
    prop_oneof![
        (0u32..0x4000).prop_map(Command::Enable),
        (0u32..0x4000).prop_map(Command::Disable),
        prop::array::uniform4(float.clone()).prop_map(Command::Color),
        prop::array::uniform3(float.clone()).prop_map(Command::Vertex),
        (-1000i32..1000).prop_map(|value| Command::ClearDepth(f64::from(value) / 8.0)),
        (0i32..64, 0i32..64, 1i32..512, 1i32..512).prop_map(|(x, y, width, height)| {
            Command::Viewport {
                x,
                y,
                width,
                height,
            }
        }),
        float.prop_map(Command::LineWidth),
        Just(Command::PushMatrix),
        Just(Command::PopMatrix),
    ]
}

proptest! {
    #[test]
    fn playback_preserves_order_across_blocks(
        commands in prop::collection::vec(replayable_command(), 0..200),
    ) {
        let mut ctx = context_with(small_blocks());
        record(&mut ctx, 1, &commands);
        prop_assert!(ctx.driver().errors.is_empty());
        prop_assert_eq!(run(&mut ctx, 1), commands);
    }
}

#[test]
fn elided_state_and_nested_call() {
    let mut ctx = context();
    record(&mut ctx, 2, &[Command::ShadeModel(SMOOTH)]);
    record(
        &mut ctx,
        1,
        &[
            Command::ShadeModel(FLAT),
            Command::ShadeModel(FLAT),
            Command::LineWidth(3.5),
            Command::CallList(2),
            Command::ShadeModel(FLAT),
        ],
    );

    assert_eq!(
        run(&mut ctx, 1),
        vec![
            Command::ShadeModel(FLAT),
            Command::LineWidth(3.5),
            Command::ShadeModel(SMOOTH),
            Command::ShadeModel(FLAT),
        ]
    );
    let info = ctx.shared().list_info(1).expect("list 1 exists");
    assert_eq!(info.instructions, 4);
}

#[test]
fn different_values_are_both_recorded() {
    let mut ctx = context();
    record(
        &mut ctx,
        1,
        &[Command::ShadeModel(FLAT), Command::ShadeModel(SMOOTH)],
    );
    assert_eq!(
        run(&mut ctx, 1),
        vec![Command::ShadeModel(FLAT), Command::ShadeModel(SMOOTH)]
    );
}

#[test]
fn pop_attrib_forgets_cached_state() {
    let mut ctx = context();
    record(
        &mut ctx,
        1,
        &[
            Command::PushAttrib(LIGHTING_BIT),
            Command::ShadeModel(FLAT),
            Command::PopAttrib,
            Command::ShadeModel(FLAT),
        ],
    );
    assert_eq!(run(&mut ctx, 1).len(), 4);
}

#[test]
fn deferred_errors_surface_on_every_execution() {
    let mut ctx = context();
    ctx.new_list(1, COMPILE);
    ctx.submit(Command::Begin(TRIANGLES));
    ctx.submit(Command::Begin(TRIANGLES));
    ctx.submit(Command::Vertex([0.0, 1.0, 0.0]));
    ctx.submit(Command::End);
    ctx.end_list();
    assert!(ctx.driver().errors.is_empty());

    let trace = run(&mut ctx, 1);
    assert_eq!(
        trace,
        vec![
            Command::Begin(TRIANGLES),
            Command::Vertex([0.0, 1.0, 0.0]),
            Command::End,
        ]
    );
    assert_eq!(
        ctx.driver().errors,
        vec![(ErrorCode::InvalidOperation, "glBegin".to_string())]
    );

    run(&mut ctx, 1);
    assert_eq!(
        ctx.driver().error_codes(),
        vec![ErrorCode::InvalidOperation, ErrorCode::InvalidOperation]
    );
}

#[test]
fn wrapper_errors_are_recorded_with_their_message() {
    let mut ctx = context();
    ctx.new_list(1, COMPILE);
    ctx.compile_error(ErrorCode::InvalidEnum, format!("glFoo(pname={:#x})", 0x1234));
    ctx.submit(Command::Material {
        face: 0x9999,
        pname: DIFFUSE,
        params: [1.0; 4],
    });
    ctx.end_list();
    assert!(ctx.driver().errors.is_empty());

    ctx.call_list(1);
    assert_eq!(
        ctx.driver().errors,
        vec![
            (ErrorCode::InvalidEnum, "glFoo(pname=0x1234)".to_string()),
            (ErrorCode::InvalidEnum, "glMaterial(face)".to_string()),
        ]
    );
}

#[test]
fn compile_and_execute_dispatches_while_recording() {
    let mut ctx = context();
    ctx.new_list(1, COMPILE_AND_EXECUTE);
    assert_eq!(ctx.list_index(), 1);
    ctx.submit(Command::ShadeModel(FLAT));
    ctx.submit(Command::ShadeModel(FLAT));
    ctx.submit(Command::End);
    ctx.submit(Command::End);
    ctx.end_list();

    assert_eq!(
        ctx.driver_mut().take(),
        vec![
            Command::ShadeModel(FLAT),
            Command::ShadeModel(FLAT),
            Command::End,
        ]
    );
    assert_eq!(ctx.driver().error_codes(), vec![ErrorCode::InvalidOperation]);
    assert_eq!(
        run(&mut ctx, 1),
        vec![Command::ShadeModel(FLAT), Command::End]
    );
    assert_eq!(ctx.driver().errors.len(), 2);
}

#[test]
fn compile_mode_does_not_dispatch() {
    let mut ctx = context();
    ctx.new_list(1, COMPILE);
    ctx.submit(Command::Enable(LIGHTING));
    ctx.call_list(5);
    ctx.end_list();
    assert!(ctx.driver().commands.is_empty());
    assert!(ctx.driver().errors.is_empty());
}

#[test]
fn self_recursion_stops_at_nesting_limit() {
    let mut ctx = context();
    record(
        &mut ctx,
        1,
        &[Command::Enable(LIGHTING), Command::CallList(1)],
    );
    let trace = run(&mut ctx, 1);
    assert_eq!(trace.len(), ctx.shared().config().max_nesting);
    assert!(trace.iter().all(|command| *command == Command::Enable(LIGHTING)));
    assert!(ctx.driver().errors.is_empty());
}

#[test]
fn call_cycle_stops_at_nesting_limit() {
    let mut ctx = context();
    record(&mut ctx, 1, &[Command::Enable(1), Command::CallList(2)]);
    record(&mut ctx, 2, &[Command::Enable(2), Command::CallList(3)]);
    record(&mut ctx, 3, &[Command::Enable(3), Command::CallList(1)]);

    let trace = run(&mut ctx, 1);
    assert_eq!(trace.len(), 64);
    let count = |cap: u32| {
        trace
            .iter()
            .filter(|command| **command == Command::Enable(cap))
            .count()
    };
    assert_eq!((count(1), count(2), count(3)), (22, 21, 21));
    assert_eq!(trace[0], Command::Enable(1));
    assert_eq!(trace[63], Command::Enable(1));
}

#[test]
fn nesting_limit_is_configurable() {
    let mut ctx = context_with(ListConfig {
        max_nesting: 3,
        ..ListConfig::default()
    });
    record(&mut ctx, 7, &[Command::PushMatrix, Command::CallList(7)]);
    assert_eq!(run(&mut ctx, 7).len(), 3);
}

#[test]
fn call_lists_uses_base_and_type() {
    let mut ctx = context();
    record(&mut ctx, 11, &[Command::Enable(11)]);
    record(&mut ctx, 12, &[Command::Enable(12)]);
    ctx.list_base(10);
    ctx.call_lists(3, UNSIGNED_BYTE, &[2, 1, 40]);
    assert_eq!(
        ctx.driver_mut().take(),
        vec![Command::Enable(12), Command::Enable(11)]
    );

    ctx.list_base(0);
    let names = 12u16.to_ne_bytes();
    ctx.call_lists(1, UNSIGNED_SHORT, &names);
    assert_eq!(ctx.driver_mut().take(), vec![Command::Enable(12)]);
    assert!(ctx.driver().errors.is_empty());
}

#[test]
fn float_names_are_floored_signed_offsets() {
    let mut ctx = context();
    record(&mut ctx, 9, &[Command::Enable(9)]);
    record(&mut ctx, 10, &[Command::Enable(10)]);
    record(&mut ctx, 12, &[Command::Enable(12)]);
    ctx.list_base(10);

    let names: Vec<u8> = [-1.0f32, -0.5, 0.75, 2.9]
        .iter()
        .flat_map(|value| value.to_ne_bytes())
        .collect();
    ctx.call_lists(4, FLOAT, &names);
    assert_eq!(
        ctx.driver_mut().take(),
        vec![
            Command::Enable(9),
            Command::Enable(9),
            Command::Enable(10),
            Command::Enable(12),
        ]
    );

    let bytes = [(-1i8) as u8];
    ctx.call_lists(1, BYTE, &bytes);
    assert_eq!(ctx.driver_mut().take(), vec![Command::Enable(9)]);
    assert!(ctx.driver().errors.is_empty());
}

#[test]
fn call_lists_argument_errors() {
    let mut ctx = context();
    ctx.call_lists(-1, UNSIGNED_BYTE, &[]);
    ctx.call_lists(1, 0x1234, &[1]);
    ctx.call_lists(4, UNSIGNED_SHORT, &[1, 0]);
    assert_eq!(
        ctx.driver().error_codes(),
        vec![
            ErrorCode::InvalidValue,
            ErrorCode::InvalidEnum,
            ErrorCode::InvalidOperation,
        ]
    );

    ctx.new_list(1, COMPILE);
    ctx.call_lists(-1, UNSIGNED_BYTE, &[]);
    ctx.end_list();
    assert_eq!(ctx.driver().errors.len(), 3);
    ctx.call_list(1);
    assert_eq!(ctx.driver().errors.len(), 4);
}

#[test]
fn list_base_inside_a_list_changes_the_context() {
    let mut ctx = context();
    record(&mut ctx, 20, &[Command::ListBase(5)]);
    assert_eq!(ctx.current_list_base(), 0);
    run(&mut ctx, 20);
    assert_eq!(ctx.current_list_base(), 5);
}

#[test]
fn nested_call_lists_reads_the_current_base() {
    let mut ctx = context();
    record(&mut ctx, 31, &[Command::Enable(31)]);
    record(
        &mut ctx,
        1,
        &[
            Command::ListBase(30),
            Command::CallLists(ListNames::from_values(ListNameType::Int, &[1, 1])),
        ],
    );
    assert_eq!(
        run(&mut ctx, 1),
        vec![Command::Enable(31), Command::Enable(31)]
    );
}

#[test]
fn immediate_api_errors() {
    let mut ctx = context();
    ctx.new_list(0, COMPILE);
    ctx.new_list(1, 0x1234);
    ctx.end_list();
    assert_eq!(ctx.gen_lists(-1), 0);
    ctx.call_list(0);
    ctx.new_list(1, COMPILE);
    ctx.new_list(2, COMPILE);
    assert_eq!(ctx.list_index(), 1);
    ctx.end_list();

    assert_eq!(
        ctx.driver().error_codes(),
        vec![
            ErrorCode::InvalidValue,
            ErrorCode::InvalidEnum,
            ErrorCode::InvalidOperation,
            ErrorCode::InvalidValue,
            ErrorCode::InvalidValue,
            ErrorCode::InvalidOperation,
        ]
    );
    assert!(ctx.is_list(1));
    assert!(!ctx.is_list(2));
}

#[test]
fn calling_an_unknown_list_does_nothing() {
    let mut ctx = context();
    assert!(run(&mut ctx, 42).is_empty());
    assert!(ctx.driver().errors.is_empty());
}

#[test]
fn contexts_share_lists_across_threads() {
    let shared = Arc::new(SharedLists::new(small_blocks()));
    let handles: Vec<_> = (1..=4u32)
        .map(|name| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let mut ctx = Context::new(shared, TraceDriver::default());
                let commands: Vec<Command> =
                    (0..40).map(|i| Command::Enable(name * 100 + i)).collect();
                for _ in 0..10 {
                    record(&mut ctx, name, &commands);
                    assert_eq!(run(&mut ctx, name), commands);
                }
                for other in 1..=4 {
                    ctx.call_list(other);
                }
                ctx.driver().errors.len()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().expect("thread should finish"), 0);
    }
    assert_eq!(shared.names(), vec![1, 2, 3, 4]);
}

#[test]
fn replacing_a_list_while_another_context_calls_it() {
    let shared = Arc::new(SharedLists::default());
    let mut writer = Context::new(Arc::clone(&shared), TraceDriver::default());
    let mut reader = Context::new(Arc::clone(&shared), TraceDriver::default());

    record(&mut writer, 1, &[Command::Enable(1)]);
    assert_eq!(run(&mut reader, 1), vec![Command::Enable(1)]);
    record(&mut writer, 1, &[Command::Enable(2), Command::Enable(3)]);
    assert_eq!(
        run(&mut reader, 1),
        vec![Command::Enable(2), Command::Enable(3)]
    );
}

/// Holds the first batch playback until another thread has been released
/// and had time to queue on the share group's lock.
struct GatedBatches {
    armed: AtomicBool,
    gate: Arc<Barrier>,
}

impl BatchProvider for GatedBatches {
    fn playback(&self, batch: BatchId, loopback: bool, driver: &mut dyn Dispatch) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.gate.wait();
            thread::sleep(Duration::from_millis(100));
        }
        driver.dispatch(&Command::VertexBatch { batch, loopback });
    }

    fn describe(&self, batch: BatchId) -> String {
        format!("gated batch {}", batch.0)
    }

    fn destroy(&self, _batch: BatchId) {}
}

/// List 1 plays `enable 1`, then list 2 through CALL_LISTS (a single gated
/// batch), then `enable 100`.
fn gated_outer_list() -> (Arc<SharedLists>, Context<TraceDriver>, Arc<Barrier>) {
    let gate = Arc::new(Barrier::new(2));
    let batches = Arc::new(GatedBatches {
        armed: AtomicBool::new(false),
        gate: Arc::clone(&gate),
    });
    let shared = Arc::new(SharedLists::with_batch_provider(
        ListConfig::default(),
        batches.clone(),
    ));
    let mut ctx = Context::new(Arc::clone(&shared), TraceDriver::default());

    ctx.new_list(2, COMPILE);
    ctx.record_vertex_batch(BatchId(5));
    ctx.end_list();
    record(
        &mut ctx,
        1,
        &[
            Command::Enable(1),
            Command::CallLists(ListNames::from_values(ListNameType::UnsignedInt, &[2])),
            Command::Enable(100),
        ],
    );
    batches.armed.store(true, Ordering::SeqCst);
    (shared, ctx, gate)
}

#[test]
fn replacing_the_outer_list_inside_call_lists_stops_it() {
    let (shared, mut reader, gate) = gated_outer_list();
    let writer = thread::spawn(move || {
        let mut writer = Context::new(shared, TraceDriver::default());
        writer.new_list(1, COMPILE);
        writer.submit(Command::Enable(7));
        gate.wait();
        writer.end_list();
    });

    let played = run(&mut reader, 1);
    writer.join().expect("writer should finish");
    assert_eq!(
        played,
        vec![
            Command::Enable(1),
            Command::VertexBatch {
                batch: BatchId(5),
                loopback: false,
            },
        ]
    );
    assert_eq!(run(&mut reader, 1), vec![Command::Enable(7)]);
}

#[test]
fn deleting_the_outer_list_inside_call_lists_stops_it() {
    let (shared, mut reader, gate) = gated_outer_list();
    let deleter = thread::spawn(move || {
        gate.wait();
        shared.delete(1).is_some()
    });

    let played = run(&mut reader, 1);
    assert!(deleter.join().expect("deleter should finish"));
    assert_eq!(played.len(), 2);
    assert!(!played.contains(&Command::Enable(100)));
    assert!(!reader.is_list(1));
    assert!(reader.driver().errors.is_empty());
}
