mod common;

use common::*;
use dlist::{Action, ConfigError};

#[test]
fn script_records_and_calls_lists() {
    let source = r#"
        .list 2 compile
        shade_model smooth
        .end

        .list 1
        shade_model flat
        shade_model flat          # elided
        line_width 3.5
        call_list 2
        shade_model flat
        .end
        .call 1
    "#;
    let script = parse_script(source).expect("script should parse");
    let mut ctx = context();
    let output = script.run(&mut ctx);

    assert!(output.is_empty());
    assert_eq!(
        ctx.driver().commands,
        vec![
            Command::ShadeModel(FLAT),
            Command::LineWidth(3.5),
            Command::ShadeModel(SMOOTH),
            Command::ShadeModel(FLAT),
        ]
    );
}

#[test]
fn script_errors_labels_and_inspection() {
    let source = r#"
        .gen 2
        .list 1 compile
        .error invalid_value "size must be positive"
        begin triangles
        begin triangles
        end
        .end
        .label 1 "error demo"
        .dump 1
        .info 1
        .call 1
        .dump 9
    "#;
    let script = parse_script(source).expect("script should parse");
    let mut ctx = context();
    let output = script.run(&mut ctx);

    assert!(output.starts_with("gen 2 -> 1\n"));
    assert!(output.contains("list 1 \"error demo\""));
    assert!(output.contains("error 0x0501 \"size must be positive\""));
    assert!(output.contains("\"instructions\": 4"));
    assert!(output.contains("list 9: not found"));
    assert_eq!(
        ctx.driver().errors,
        vec![
            (ErrorCode::InvalidValue, "size must be positive".to_string()),
            (ErrorCode::InvalidOperation, "glBegin".to_string()),
        ]
    );
}

#[test]
fn script_call_lists_and_base() {
    let source = "
        .list 11\nenable lighting\n.end
        .list 12\nenable blend\n.end
        .base 10
        .call_lists ubyte 2 1
        call_lists 1 uint 1
    ";
    let script = parse_script(source).expect("script should parse");
    let mut ctx = context();
    script.run(&mut ctx);
    assert_eq!(
        ctx.driver().commands,
        vec![
            Command::Enable(BLEND),
            Command::Enable(LIGHTING),
            Command::Enable(LIGHTING),
        ]
    );
}

#[test]
fn script_parses_every_field_kind() {
    let source = "
        clear_depth 0.25
        color_mask true false 1 0
        viewport 0 0 640 480
        draw_pixels 1 1 rgba ubyte 255 0 0x80 255
        pixel_map 0x0C70 3 0 0.5 1
        vertex_batch 12
        error invalid_enum bare message text
    ";
    let script = parse_script(source).expect("script should parse");
    let commands: Vec<Command> = script
        .steps
        .iter()
        .map(|step| match &step.action {
            Action::Command(command) => command.clone(),
            other => panic!("unexpected action {other:?}"),
        })
        .collect();

    assert_eq!(commands[0], Command::ClearDepth(0.25));
    assert_eq!(commands[1], Command::ColorMask([true, false, true, false]));
    assert_eq!(
        commands[2],
        Command::Viewport {
            x: 0,
            y: 0,
            width: 640,
            height: 480,
        }
    );
    match &commands[3] {
        Command::DrawPixels {
            format,
            ty,
            pixels: Some(pixels),
            ..
        } => {
            assert_eq!((*format, *ty), (RGBA, UNSIGNED_BYTE));
            assert_eq!(&pixels[..], &[255, 0, 0x80, 255]);
        }
        other => panic!("unexpected {other:?}"),
    }
    match &commands[4] {
        Command::PixelMap {
            map: 0x0C70,
            size: 3,
            values: Some(values),
        } => assert_eq!(&values[..], &[0.0, 0.5, 1.0]),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        commands[5],
        Command::VertexBatch {
            batch: BatchId(12),
            loopback: false,
        }
    );
    match &commands[6] {
        Command::Error { code, message } => {
            assert_eq!(*code, ErrorCode::InvalidEnum);
            assert_eq!(message, "bare message text");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn script_rejects_bad_lines() {
    let cases = [
        (".list", "missing list name"),
        (".list 1 sometimes", "unknown list mode"),
        (".frobnicate", "unknown directive"),
        ("enable", "missing enum"),
        ("enable lighting blend", "unexpected extra tokens"),
        ("enable not_a_symbol", "invalid value"),
        ("nop", "cannot be written directly"),
        (".call_lists word 1", "unknown name type"),
        (".error nope \"x\"", "unknown error code"),
        (".label 1 \"open", "unterminated string literal"),
        ("depth_mask maybe", "invalid bool"),
    ];
    for (source, expected) in cases {
        let err = parse_script(source).expect_err("line should be rejected");
        assert_eq!(err.line, 1, "{source}");
        assert!(
            err.message.contains(expected),
            "{source}: {} does not mention {expected}",
            err.message
        );
    }
}

#[test]
fn config_from_json() {
    let config = ListConfig::from_json_str(r#"{ "block_words": 64, "small_lists": false }"#)
        .expect("config should parse");
    assert_eq!(config.block_words, 64);
    assert!(!config.small_lists);
    assert_eq!(config.max_nesting, 64);
    assert_eq!(config.unpack_alignment, 4);

    assert!(matches!(
        ListConfig::from_json_str(r#"{ "block_words": 8 }"#),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        ListConfig::from_json_str(r#"{ "unknown": 1 }"#),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        ListConfig::from_json_str(r#"{ "unpack_alignment": 3 }"#),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        ListConfig::from_file("/nonexistent/dl-config.json"),
        Err(ConfigError::Io(_))
    ));
}

#[test]
fn unpack_alignment_comes_from_config() {
    let mut ctx = context_with(ListConfig {
        unpack_alignment: 1,
        ..ListConfig::default()
    });
    assert_eq!(ctx.pixel_store().alignment, 1);
    ctx.draw_pixels(
        2,
        2,
        RGB,
        UNSIGNED_BYTE,
        PixelSource::Client(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]),
    );
    assert!(ctx.driver().errors.is_empty());

    ctx.pixel_store_mut().alignment = 4;
    ctx.draw_pixels(
        2,
        2,
        RGB,
        UNSIGNED_BYTE,
        PixelSource::Client(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]),
    );
    assert_eq!(ctx.driver().error_codes(), vec![ErrorCode::InvalidOperation]);
    assert_eq!(ctx.driver().commands.len(), 1);
}
