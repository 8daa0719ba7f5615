#![allow(dead_code, unused_imports)]

use std::sync::Arc;

use parking_lot::Mutex;

pub use dlist::dl_abi::*;
pub use dlist::{
    BatchId, BatchProvider, Command, Context, Dispatch, ErrorCode, ListConfig, ListNameType,
    ListNames, PixelSource, SharedLists, parse_script,
};

/// Records everything the engine hands to the driver layer.
#[derive(Debug, Default)]
pub struct TraceDriver {
    pub commands: Vec<Command>,
    pub errors: Vec<(ErrorCode, String)>,
}

impl Dispatch for TraceDriver {
    fn dispatch(&mut self, command: &Command) {
        self.commands.push(command.clone());
    }

    fn error(&mut self, code: ErrorCode, message: &str) {
        self.errors.push((code, message.to_string()));
    }
}

impl TraceDriver {
    pub fn take(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn error_codes(&self) -> Vec<ErrorCode> {
        self.errors.iter().map(|(code, _)| *code).collect()
    }
}

/// Batch provider that counts playbacks and releases.
#[derive(Debug, Default)]
pub struct CountingBatches {
    pub played: Mutex<Vec<(u64, bool)>>,
    pub destroyed: Mutex<Vec<u64>>,
}

impl BatchProvider for CountingBatches {
    fn playback(&self, batch: BatchId, loopback: bool, driver: &mut dyn Dispatch) {
        self.played.lock().push((batch.0, loopback));
        driver.dispatch(&Command::VertexBatch { batch, loopback });
    }

    fn describe(&self, batch: BatchId) -> String {
        format!("test batch {}", batch.0)
    }

    fn destroy(&self, batch: BatchId) {
        self.destroyed.lock().push(batch.0);
    }
}

pub fn context() -> Context<TraceDriver> {
    context_with(ListConfig::default())
}

pub fn context_with(config: ListConfig) -> Context<TraceDriver> {
    Context::new(Arc::new(SharedLists::new(config)), TraceDriver::default())
}

pub fn context_with_batches(config: ListConfig) -> (Context<TraceDriver>, Arc<CountingBatches>) {
    let batches = Arc::new(CountingBatches::default());
    let shared = Arc::new(SharedLists::with_batch_provider(config, batches.clone()));
    (Context::new(shared, TraceDriver::default()), batches)
}

pub fn small_blocks() -> ListConfig {
    ListConfig {
        block_words: 32,
        ..ListConfig::default()
    }
}

/// Records `commands` into list `name` in compile mode.
pub fn record(ctx: &mut Context<TraceDriver>, name: u32, commands: &[Command]) {
    ctx.new_list(name, COMPILE);
    for command in commands {
        ctx.submit(command.clone());
    }
    ctx.end_list();
}

/// Executes list `name` and returns what reached the driver.
pub fn run(ctx: &mut Context<TraceDriver>, name: u32) -> Vec<Command> {
    ctx.driver_mut().take();
    ctx.call_list(name);
    ctx.driver_mut().take()
}
