pub mod structured_logging;

pub use structured_logging::{
    init_structured_logging, ExecutionContext, JsonFormatter, LoggingConfig, OperationTimer,
    RequestTiming, StructuredLogEntry,
};
