//! Task data model: reset categories, task and sub-task records, and the
//! structural validation applied at the editing boundary.

mod category;
mod record;

pub use category::{validate_schedule, ResetCategory, ScheduleParams, ValidationError};
pub use record::{rollup_completed, NewSubTask, NewTask, SubTask, Task, TaskDraft, TaskPatch};
