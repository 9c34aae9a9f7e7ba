use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;

// these are the services that make up the streaming-core backend that run as
// independent message loops, as opposed to the plain shared-state components
// (dispatcher, stream registry) that must stay non-suspending and therefore
// cannot be modeled as actors waiting on a channel.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ServiceType {
    SessionPool,
    Locator,
    Ledger,
}

// core service messages
//
// without higher-kinded types, we use the normal enum-of-enums to enable
// general safe message passing between services.
pub type MsgSender = tokio::sync::mpsc::Sender<CoreMsg>;
pub type MsgReceiver = tokio::sync::mpsc::Receiver<CoreMsg>;

// message responses are carried back via oneshot channels; this type
// eliminates the boilerplate in the responder logic.
pub type Responder<T> = tokio::sync::oneshot::Sender<Result<T>>;

#[derive(Debug)]
pub enum CoreMsg {
    Session(crate::session::msg::SessionMsg),
    Locator(crate::locator::msg::LocatorMsg),
    Ledger(crate::ledger::msg::LedgerMsg),
}

// service registry
//
// we assume each service is instantiated once, with one message namespace.
// this simplifies generic service traits via get(), at the cost of a hash
// table lookup that most services avoid by cloning the sender once at
// startup and holding onto it directly.
#[derive(Clone, Debug)]
pub struct ServiceRegistry(Arc<DashMap<ServiceType, MsgSender>>);

impl ServiceRegistry {
    pub fn new() -> Self {
        ServiceRegistry(Arc::new(DashMap::new()))
    }

    pub fn insert(&self, k: ServiceType, v: MsgSender) -> Result<()> {
        match self.0.insert(k.clone(), v) {
            None => Ok(()),
            Some(w) => {
                self.0.insert(k, w);
                Err(anyhow::Error::msg(
                    "internal error: a sender was added twice to the registry",
                ))
            }
        }
    }

    pub fn get(&self, k: &ServiceType) -> Result<MsgSender> {
        Ok(self
            .0
            .get(k)
            .ok_or_else(|| {
                anyhow::Error::msg(format!(
                    "internal error: a service was started without a necessary dependency ({:?})",
                    k
                ))
            })?
            .clone())
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
