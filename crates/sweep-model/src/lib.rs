#![forbid(unsafe_code)]

pub mod entity;
pub mod launch;
pub mod registry;
pub mod snapshot;

pub use entity::{Collection, Entity, ExecKind, Executable, Mix};
pub use launch::{LaunchConfig, SimParams};
pub use registry::{Job, Registry};
pub use snapshot::RunSnapshot;
