pub mod admission;
pub mod orchestrator;

pub use admission::{AdmissionController, AdmissionDecision};
pub use orchestrator::{ScanOrchestrator, SubmitError, SubmitOutcome};
