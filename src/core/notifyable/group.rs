// src/core/notifyable/group.rs

//! A Group: holds nodes and nested groups, and is the usual scope for
//! leader election.

use crate::core::errors::{ErrorKind, Result};
use crate::core::notifyable::{
    Handle, HasDataDistributions, HasGroups, HasNodes, HasPropertyLists, HasQueues, Notifyable,
};

#[derive(Clone)]
pub struct Group {
    pub(crate) h: Handle,
}

impl Notifyable for Group {
    fn handle(&self) -> &Handle {
        &self.h
    }
}

impl HasGroups for Group {}
impl HasNodes for Group {}
impl HasDataDistributions for Group {}
impl HasPropertyLists for Group {}
impl HasQueues for Group {}

impl Group {
    /// Bids for leadership of this group.  Returns true once leadership is
    /// held; false if the wait expired while another client led.  The bid
    /// stays queued only while the call is waiting.
    pub async fn try_to_become_leader(&self, msec_timeout: i64) -> Result<bool> {
        match self.acquire_ownership(msec_timeout).await {
            Ok(()) => Ok(true),
            Err(e) if matches!(e.kind(), ErrorKind::LockTimeout(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Does this client currently lead the group?
    pub fn am_i_the_leader(&self) -> bool {
        self.has_ownership()
    }

    /// Client id of the current leader, if the group has one.
    pub async fn get_leader_id(&self) -> Result<Option<String>> {
        self.get_owner().await
    }

    /// Steps down from leadership.
    pub async fn abdicate(&self) -> Result<()> {
        self.release_ownership().await
    }
}
