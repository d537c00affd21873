//! Tool-calling support on top of `anyllm-client`.
//!
//! Reassembles streamed tool-call fragments, decodes their arguments and
//! dispatches completed calls to registered handlers.

mod accumulator;
mod arguments;
mod builder;
mod error;
mod registry;

pub use accumulator::{PendingToolCallInfo, ToolCallAccumulator};
pub use arguments::{
    Parsed, RawArguments, is_valid_json, parse_arguments, parse_arguments_safely,
    parse_raw_arguments_safely,
};
pub use builder::{
    PropertyDefinition, TYPE_ARRAY, TYPE_BOOLEAN, TYPE_INTEGER, TYPE_NUMBER, TYPE_OBJECT,
    TYPE_STRING, ToolBuilder,
};
pub use error::{Result, ToolError};
pub use registry::{
    ChunkSender, ChunkStream, FnHandler, FunctionRegistry, StreamChunk, StreamingToolCallHandler,
    ToolCallHandler, ToolCallResult, UnifiedToolCallHandler, chunk_channel, handler_fn,
};
