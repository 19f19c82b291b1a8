pub mod entities;
pub mod messages;

pub use entities::{TaskId, TaskInfo, TaskLane, TaskPriority, TaskStatus};
pub use messages::{ClientMessage, ServerMessage, StatusData};
