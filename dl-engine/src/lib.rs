pub mod arena;
pub mod codec;
pub mod command;
pub mod config;
pub mod context;
pub mod dump;
mod exec;
pub mod list;
#[cfg(feature = "cli")]
pub mod logging;
mod loopback;
pub mod node;
pub mod payload;
pub mod record;
pub mod registry;
pub mod script;
pub mod unpack;

pub use dl_abi;

pub use arena::{AllocError, Arena, Block, IdAlloc, SmallListStore};
pub use command::{
    BatchId, BatchProvider, Command, Dispatch, ErrorCode, ListMode, ListNameType, ListNames,
};
pub use config::{ConfigError, ListConfig};
pub use context::Context;
pub use dump::dump_list;
pub use list::{DisplayList, ListInfo, ReleaseSummary, StreamError};
pub use node::Node;
pub use payload::{Payload, PayloadTable};
pub use record::{PrimitiveState, RecordError, Recorded, Recorder};
pub use registry::{ListTable, SharedLists};
pub use script::{Action, Script, ScriptError, Step, parse_script};
pub use unpack::{PixelSource, PixelStore, UnpackError};
