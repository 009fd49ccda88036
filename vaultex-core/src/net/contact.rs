use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use vaultex_model::Pmid;

/// A peer as seen by the overlay: its permanent id plus, when known, a
/// reachable endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub pmid: Pmid,
    pub endpoint: Option<SocketAddr>,
}

impl Contact {
    pub fn new(pmid: Pmid) -> Self {
        Self {
            pmid,
            endpoint: None,
        }
    }

    pub fn with_endpoint(pmid: Pmid, endpoint: SocketAddr) -> Self {
        Self {
            pmid,
            endpoint: Some(endpoint),
        }
    }
}
