mod error;
pub use error::ExecError;

pub mod pin;
pub use pin::{CpuPinner, NoopPinner, PinError, select_pinner};

pub mod command;
pub use command::{SlotCommand, renderer_command};

pub mod supervisor;
pub use supervisor::{SupervisorConfig, WorkerSlot, run};

pub mod orchestrator;
pub use orchestrator::Orchestrator;

pub mod prelude {
    pub use crate::error::ExecError;
    pub use crate::orchestrator::Orchestrator;
}
