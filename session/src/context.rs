//! Per-session context handed to the role components

use shared::{PeerId, SessionId, SessionInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Owner,
    Member,
}

/// Who we are in the current session and who owns it.
///
/// Built when a create or join completes and dropped on leave. `owner` is the
/// owner reported when the session was entered and is never updated
/// afterwards, even if the relay later promotes somebody else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub session: SessionId,
    pub local: PeerId,
    pub owner: PeerId,
    pub authority: Authority,
    pub generation: u64,
}

impl SessionContext {
    pub fn from_info(info: &SessionInfo, local: PeerId, generation: u64) -> Self {
        let authority = if info.owner == local {
            Authority::Owner
        } else {
            Authority::Member
        };
        Self {
            session: info.id,
            local,
            owner: info.owner,
            authority,
            generation,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.authority == Authority::Owner
    }
}
