//! Callback acknowledgment returned to the inbound transport.

use serde::{Deserialize, Serialize};

/// Transport status code for a handled event. Anything else makes the transport redeliver.
pub const STATUS_OK: u16 = 200;

/// Wire ack: `{ "code": 200, "message": "OK" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub code: u16,
    pub message: String,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            code: STATUS_OK,
            message: "OK".to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == STATUS_OK
    }
}
