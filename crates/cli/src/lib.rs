/*
 * DynamoDB Table Copy
 *
 * Copies a source table into a destination table within a throughput
 * budget. A large table can be split into sections copied by
 * cooperating processes.
 */

pub mod backend;
pub mod cli;
pub mod orchestrator;

pub use backend::DynamoDbBackend;
pub use cli::Cli;
pub use orchestrator::{CopyBackend, CopyJob, Delegation, JobReport, JobState, Orchestrator};
