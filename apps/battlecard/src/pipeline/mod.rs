pub mod orchestrator;
pub mod report;

pub use orchestrator::Pipeline;
pub use report::RunReport;
