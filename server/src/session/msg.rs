use std::sync::Arc;

use common::config::IdentityCredential;

use crate::service::{CoreMsg, Responder};

use super::session::UpstreamSession;

#[derive(Debug)]
pub enum SessionMsg {
    GetOrOpen {
        resp: Responder<Arc<UpstreamSession>>,
        credential: IdentityCredential,
        data_center_id: u32,
    },
    Invalidate {
        resp: Responder<()>,
        identity_id: String,
        data_center_id: u32,
    },
}

impl From<SessionMsg> for CoreMsg {
    fn from(value: SessionMsg) -> Self {
        CoreMsg::Session(value)
    }
}
