//! Core value types shared by descriptors and runs.

mod id;
mod status;

pub use id::StageId;
pub use status::{OperationKind, StageStatus};
