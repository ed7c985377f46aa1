//! JSON line transport.
//!
//! One request is one JSON-encoded [`Command`]; one response is one
//! JSON-encoded [`Response`]:
//!
//! ```text
//! -> {"UpdatePattern":{"migration":"interactive","pattern":"src_first"}}
//! <- {"ok":{"Pattern":"src_first"}}
//! -> {"GetPattern":{"migration":"nope"}}
//! <- {"error":{"MigrationNotFound":{"migration":"nope"}}}
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Command, Error, Executor, Output, Result};

/// Envelope written back for every request line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    /// Command succeeded
    Ok(Output),
    /// Command (or request decoding) failed
    Error(Error),
}

impl From<Result<Output>> for Response {
    fn from(result: Result<Output>) -> Self {
        match result {
            Ok(output) => Response::Ok(output),
            Err(e) => Response::Error(e),
        }
    }
}

impl Executor {
    /// Decode a JSON command, execute it, and encode the response.
    ///
    /// Never fails: malformed requests produce a `Serialization` error
    /// response.
    pub fn execute_json(&self, line: &str) -> String {
        let response: Response = match serde_json::from_str::<Command>(line.trim()) {
            Ok(cmd) => self.execute(cmd).into(),
            Err(e) => {
                warn!(error = %e, "rejected malformed command");
                Response::Error(e.into())
            }
        };
        encode(&response)
    }
}

fn encode(response: &Response) -> String {
    match serde_json::to_string(response) {
        Ok(json) => json,
        Err(e) => format!(
            r#"{{"error":{{"Serialization":{{"reason":{:?}}}}}}}"#,
            e.to_string()
        ),
    }
}
