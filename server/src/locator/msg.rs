use common::config::IdentityCredential;

use crate::service::{CoreMsg, Responder};

use super::FileLocator;

#[derive(Debug)]
pub enum LocatorMsg {
    Lookup {
        resp: Responder<FileLocator>,
        credential: IdentityCredential,
        message_id: u64,
    },
}

impl From<LocatorMsg> for CoreMsg {
    fn from(value: LocatorMsg) -> Self {
        CoreMsg::Locator(value)
    }
}
