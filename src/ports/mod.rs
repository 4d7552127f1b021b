//! Collaborator ports used by match lifecycles

pub mod notification;
pub mod payment;
pub mod scheduling;

pub use notification::{ConnectionRegistry, EventType, NotificationPort, OutboundMessage};
pub use payment::{PaymentPort, SubmittedHashVerifier};
pub use scheduling::{LocalScheduler, SchedulingPort};

use std::sync::Arc;

/// The external collaborators a lifecycle needs
#[derive(Clone)]
pub struct MatchPorts {
    pub notifier: Arc<dyn NotificationPort>,
    pub scheduler: Arc<dyn SchedulingPort>,
    pub payments: Arc<dyn PaymentPort>,
}

impl MatchPorts {
    pub fn new(
        notifier: Arc<dyn NotificationPort>,
        scheduler: Arc<dyn SchedulingPort>,
        payments: Arc<dyn PaymentPort>,
    ) -> Self {
        Self {
            notifier,
            scheduler,
            payments,
        }
    }
}
