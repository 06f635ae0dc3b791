use crate::error::Error;
use crate::medium::PubSubMedium;
use events::{Event, UserId};
use log::*;
use std::sync::Arc;

/// Pushes events onto a user's channel for whichever processes hold that
/// user's connections. Delivery is not acknowledged.
#[derive(Clone)]
pub struct Publisher {
    medium: Arc<dyn PubSubMedium>,
}

impl Publisher {
    pub fn new(medium: Arc<dyn PubSubMedium>) -> Self {
        Self { medium }
    }

    /// Serialize `event` and publish it on the channel of `user_id`.
    ///
    /// A medium failure is returned as a `Publish` error: the event will
    /// not be delivered anywhere and the caller decides whether to retry.
    pub async fn publish(&self, user_id: &UserId, event: &Event) -> Result<(), Error> {
        let text = event.to_wire()?;

        self.medium
            .publish(user_id, &text)
            .await
            .map_err(Error::publish)?;

        debug!("Published event {} to user {user_id}", event.name());
        Ok(())
    }
}
