pub mod config;
pub mod errors;
pub mod trace;
pub mod traits;

pub use config::{AppConfig, CompanionConfig, SchedulerConfig, ServerConfig};
pub use errors::{XiaoyouError, XiaoyouResult};
pub use trace::{TraceContext, SYSTEM_TRACE_ID};
pub use traits::{ChatTurn, LlmService, MemoryService, SttService, TtsService};
