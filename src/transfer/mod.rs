pub mod cleanup;
pub mod engine;
pub mod naming;
pub mod ops;
pub mod types;

pub use engine::TransferEngine;
pub use naming::{NamingContext, PLACEHOLDERS};
pub use ops::{operation_for, FileOperation};
pub use types::{OverwriteDecision, TransferPlan, TransferRequest, TransferResult, TransferShape};
