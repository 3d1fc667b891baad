pub mod dispatcher;
pub mod generator;
pub mod ingest;
pub mod reaper;
pub mod retry;

pub use dispatcher::TaskDispatcher;
pub use generator::TaskGenerator;
pub use ingest::{ReportIngestor, ReportStatus, TaskReport};
pub use reaper::HeartbeatReaper;
pub use retry::FailureHandler;
