pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod poller;
pub mod sheet;
pub mod status;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::{HttpJobClient, JobBackend, PollReply};
pub use config::Config;
pub use error::{BridgeError, ErrorKind, Result};
pub use orchestrator::{Orchestrator, RunReport};
pub use poller::{PollLoop, PollPolicy, PollState, Poller};
pub use sheet::{MemoryWorkbook, SheetWriter, SqliteWorkbook, Workbook, WriteSummary};
pub use status::{ChannelStatusSink, LogStatusSink, Severity, StatusEvent, StatusSink};
pub use types::{Destination, JobHandle, JobRequest, JobStatus, PriceSummary, RawEnvelope, Table};
