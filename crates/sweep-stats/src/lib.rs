#![forbid(unsafe_code)]

pub mod aggregate;
pub mod expr;
pub mod frame;
pub mod progress;

pub use aggregate::{StatAggregate, SummaryTable};
pub use expr::{Expr, ExprError};
pub use frame::{StatError, StatFrame};
pub use progress::{JobStatus, Progress};
