use std::collections::HashSet;
use std::io;
use std::sync::Arc;

use dlist::logging::{category_dispatch, category_error, category_record, error_label};
use dlist::{
    BatchId, BatchProvider, Command, Context, Dispatch, ErrorCode, ListConfig, SharedLists,
    parse_script,
};
use parking_lot::Mutex;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct CliConfig {
    script: Option<String>,
    config_path: Option<String>,
    no_small_lists: bool,
    max_nesting: Option<usize>,
    block_words: Option<usize>,
    dump: Vec<u32>,
    info: Vec<u32>,
    quiet: bool,
    repl: bool,
    help: bool,
}

/// Driver that logs every command it receives.
#[derive(Debug, Default)]
struct LogDriver {
    quiet: bool,
    commands: usize,
    errors: usize,
}

impl Dispatch for LogDriver {
    fn dispatch(&mut self, command: &Command) {
        self.commands += 1;
        if !self.quiet {
            info!("{} {:?}", category_dispatch(), command);
        }
    }

    fn error(&mut self, code: ErrorCode, message: &str) {
        self.errors += 1;
        warn!("{} {} {}", category_error(), error_label(code), message);
    }
}

/// Batches are opaque ids here; playback just reports them.
#[derive(Debug, Default)]
struct LogBatches {
    destroyed: Mutex<HashSet<u64>>,
}

impl BatchProvider for LogBatches {
    fn playback(&self, batch: BatchId, loopback: bool, driver: &mut dyn Dispatch) {
        driver.dispatch(&Command::VertexBatch { batch, loopback });
    }

    fn describe(&self, batch: BatchId) -> String {
        if self.destroyed.lock().contains(&batch.0) {
            "destroyed".to_string()
        } else {
            "live".to_string()
        }
    }

    fn destroy(&self, batch: BatchId) {
        if !self.destroyed.lock().insert(batch.0) {
            warn!(batch = batch.0, "batch destroyed twice");
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dlist::logging::init()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli_args(&args).map_err(io::Error::other)?;
    if cli.help {
        print_usage();
        return Ok(());
    }

    let config = load_config(&cli)?;
    let shared = Arc::new(SharedLists::with_batch_provider(
        config,
        Arc::new(LogBatches::default()),
    ));
    let driver = LogDriver {
        quiet: cli.quiet,
        ..LogDriver::default()
    };
    let mut ctx = Context::new(shared, driver);

    if cli.repl {
        return run_repl(&mut ctx);
    }

    let Some(path) = cli.script.as_ref() else {
        return Err(Box::new(io::Error::other("missing script path")));
    };
    let source = std::fs::read_to_string(path)?;
    let script = parse_script(&source)?;
    info!("{} {} ({} steps)", category_record(), path, script.steps.len());
    print!("{}", script.run(&mut ctx));

    for name in &cli.dump {
        match ctx.shared().dump(*name) {
            Some(text) => print!("{text}"),
            None => println!("list {name}: not found"),
        }
    }
    for name in &cli.info {
        match ctx.shared().list_info(*name) {
            Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
            None => println!("list {name}: not found"),
        }
    }
    let driver = ctx.driver();
    println!(
        "dispatched {} commands, {} errors, {} lists",
        driver.commands,
        driver.errors,
        ctx.shared().len()
    );
    Ok(())
}

fn load_config(cli: &CliConfig) -> Result<ListConfig, Box<dyn std::error::Error>> {
    let mut config = match cli.config_path.as_deref() {
        Some(path) => ListConfig::from_file(path)?,
        None => ListConfig::default(),
    };
    if cli.no_small_lists {
        config.small_lists = false;
    }
    if let Some(max_nesting) = cli.max_nesting {
        config.max_nesting = max_nesting;
    }
    if let Some(block_words) = cli.block_words {
        config.block_words = block_words;
    }
    config.validate()?;
    Ok(config)
}

fn parse_cli_args(args: &[String]) -> Result<CliConfig, String> {
    let mut cfg = CliConfig::default();
    if args.is_empty() {
        cfg.repl = true;
        return Ok(cfg);
    }
    let mut index = 0usize;

    if let Some(first) = args.first()
        && first == "repl"
    {
        cfg.repl = true;
        index = 1;
    }

    while index < args.len() {
        match args[index].as_str() {
            "-h" | "--help" => {
                cfg.help = true;
                index += 1;
            }
            "--repl" => {
                cfg.repl = true;
                index += 1;
            }
            "--quiet" => {
                cfg.quiet = true;
                index += 1;
            }
            "--no-small-lists" => {
                cfg.no_small_lists = true;
                index += 1;
            }
            "--config" => {
                let path = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --config".to_string())?;
                cfg.config_path = Some(path.clone());
                index += 2;
            }
            "--max-nesting" => {
                let raw = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --max-nesting".to_string())?;
                let value = raw
                    .parse::<usize>()
                    .map_err(|_| format!("invalid --max-nesting value '{raw}'"))?;
                cfg.max_nesting = Some(value);
                index += 2;
            }
            "--block-words" => {
                let raw = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --block-words".to_string())?;
                let value = raw
                    .parse::<usize>()
                    .map_err(|_| format!("invalid --block-words value '{raw}'"))?;
                cfg.block_words = Some(value);
                index += 2;
            }
            flag @ ("--dump" | "--info") => {
                let raw = args
                    .get(index + 1)
                    .ok_or_else(|| format!("missing value for {flag}"))?;
                let name = raw
                    .parse::<u32>()
                    .map_err(|_| format!("invalid {flag} value '{raw}'"))?;
                if flag == "--dump" {
                    cfg.dump.push(name);
                } else {
                    cfg.info.push(name);
                }
                index += 2;
            }
            value if value.starts_with('-') => {
                return Err(format!("unknown flag '{value}'"));
            }
            path => {
                if cfg.script.is_some() {
                    return Err("multiple script paths provided".to_string());
                }
                cfg.script = Some(path.to_string());
                index += 1;
            }
        }
    }

    if cfg.repl && cfg.script.is_some() {
        return Err("repl mode does not accept a script path".to_string());
    }
    if !cfg.repl && !cfg.help && cfg.script.is_none() {
        return Err("missing script path".to_string());
    }
    Ok(cfg)
}

fn run_repl(ctx: &mut Context<LogDriver>) -> Result<(), Box<dyn std::error::Error>> {
    println!("dl-run REPL");
    println!("history: up/down arrows, commands: .help, .lists, .quit");
    let mut editor = DefaultEditor::new()?;
    loop {
        let prompt = if ctx.is_recording() {
            format!("dl[{}]> ", ctx.list_index())
        } else {
            "dl> ".to_string()
        };
        match editor.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                match line {
                    ".quit" | ".exit" => break,
                    ".help" => {
                        print_repl_help();
                        continue;
                    }
                    ".lists" => {
                        println!("{:?}", ctx.shared().names());
                        continue;
                    }
                    _ => {}
                }
                match parse_script(line) {
                    Ok(script) => print!("{}", script.run(ctx)),
                    Err(err) => println!("{err}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("bye");
                break;
            }
            Err(err) => {
                return Err(Box::new(io::Error::other(err.to_string())));
            }
        }
    }
    Ok(())
}

fn print_repl_help() {
    println!("  .list <name> [compile|execute]   start recording");
    println!("  .end                             finish recording");
    println!("  .gen <n> / .delete <first> <n>   allocate or delete names");
    println!("  .call <name> / .base <n>         call a list, set the list base");
    println!("  .call_lists <type> <n>...        call several lists");
    println!("  .batch <id> / .error <code> msg  vertex batch, deferred error");
    println!("  .label <name> text               label a list");
    println!("  .dump <name> / .info <name>      inspect a list");
    println!("  <mnemonic> <operands>            any command, e.g. `color 1 0 0 1`");
}

fn print_usage() {
    println!("Usage:");
    println!("  dl-run                  (defaults to REPL)");
    println!("  dl-run [--config <file.json>] [--no-small-lists] [--max-nesting <n>]");
    println!("         [--block-words <n>] [--dump <name>]... [--info <name>]... [--quiet] <script>");
    println!("  dl-run --repl");
    println!("  dl-run repl");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parse_cli_defaults_to_repl() {
        let cfg = parse_cli_args(&[]).expect("cli should parse");
        assert!(cfg.repl);
    }

    #[test]
    fn parse_cli_collects_dumps_and_overrides() {
        let cfg = parse_cli_args(&args(&[
            "--no-small-lists",
            "--max-nesting",
            "8",
            "--dump",
            "1",
            "--dump",
            "2",
            "scene.dl",
        ]))
        .expect("cli should parse");
        assert!(cfg.no_small_lists);
        assert_eq!(cfg.max_nesting, Some(8));
        assert_eq!(cfg.dump, vec![1, 2]);
        assert_eq!(cfg.script.as_deref(), Some("scene.dl"));
    }

    #[test]
    fn parse_cli_rejects_repl_with_script() {
        let err = parse_cli_args(&args(&["repl", "scene.dl"])).expect_err("should fail");
        assert!(err.contains("repl mode"));
    }
}
