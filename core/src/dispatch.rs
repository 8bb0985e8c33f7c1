use serde::{Deserialize, Serialize};

/// Requests accepted by the manager's dispatch front end.
#[derive(Serialize, Deserialize, Debug)]
pub enum DispatchRequest {
    /// Broadcast `configuration` to every currently connected worker and
    /// block until `count` results have been collected.
    Launch {
        configuration: Vec<u8>,
        count: usize,
    },
}

/// Responses returned by the dispatch front end.
#[derive(Serialize, Deserialize, Debug)]
pub enum DispatchResponse {
    /// Collected results in arrival order.
    Results(Vec<Vec<u8>>),
    Error(String),
}
