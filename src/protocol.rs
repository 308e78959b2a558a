//! Wire protocol between the engine and a worker process.
//!
//! Requests and replies are newline-delimited JSON over the worker's
//! stdin/stdout, matched by correlation id. The call set is closed: a worker
//! hosts exactly one test runner and understands nothing else.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::test_runner::{RunOptions, RunResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: u64,
    pub call: WorkerCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerCall {
    Init,
    Run { options: RunOptions },
    Dispose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub id: u64,
    pub outcome: CallOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallOutcome {
    Initialized,
    RunCompleted { result: RunResult },
    Disposed,
    /// The call reached the worker but the runner rejected it.
    Error { message: String },
}

pub fn encode_line<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line)
}
