pub mod collaborators;

pub use collaborators::{ChatTurn, LlmService, MemoryService, SttService, TtsService};
