//! Decides who may join and who may control a room.

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::{
    CoordinatorContext, CoordinatorError, Grants, Identity, InvitationData, RoomData, RoomId,
};

/// The outcome of authorizing an identity for a room
#[derive(Debug, Clone, PartialEq)]
pub enum Authorization {
    Creator,
    /// The identity holds an unexpired invitation. It may or may not be used already.
    InvitedValid(InvitationData),
    Denied,
}

/// Authorizes an identity against the invitations it holds for a room.
///
/// The creator always passes without an invitation. Otherwise any unexpired invitation
/// passes, preferring one that was not used yet. Expired invitations never pass.
pub fn authorize_with(
    identity: &Identity,
    room: &RoomData,
    invitations: &[InvitationData],
    now: DateTime<Utc>,
) -> Authorization {
    if room.creator_id == identity.user_id {
        return Authorization::Creator;
    }

    invitations
        .iter()
        .filter(|i| i.room_id == room.id && i.invitee_id == identity.user_id)
        .filter(|i| !i.is_expired(now))
        .min_by_key(|i| i.used)
        .cloned()
        .map(Authorization::InvitedValid)
        .unwrap_or(Authorization::Denied)
}

pub struct Access {
    context: CoordinatorContext,
}

impl Access {
    pub fn new(context: &CoordinatorContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    pub async fn authorize(
        &self,
        identity: &Identity,
        room: &RoomData,
    ) -> Result<Authorization, CoordinatorError> {
        if room.creator_id == identity.user_id {
            return Ok(Authorization::Creator);
        }

        let invitations = self
            .context
            .store
            .invitations_for(room.id, identity.user_id)
            .await?;

        Ok(authorize_with(identity, room, &invitations, Utc::now()))
    }

    /// Marks an invitation as used. Returns false if it already was.
    pub async fn consume(&self, invitation: &InvitationData) -> Result<bool, CoordinatorError> {
        if invitation.used {
            return Ok(false);
        }

        let consumed = self
            .context
            .store
            .mark_invitation_used(invitation.id)
            .await?;

        Ok(consumed)
    }

    /// Redeems an invitation token. A token can only be redeemed once.
    pub async fn redeem(
        &self,
        identity: &Identity,
        token: &str,
    ) -> Result<InvitationData, CoordinatorError> {
        let mut invitation = self.context.store.invitation_by_token(token).await?;

        if invitation.is_expired(Utc::now()) {
            warn!(
                "User {} tried to redeem an expired invitation for room {}",
                identity.user_id, invitation.room_id
            );
            return Err(CoordinatorError::AccessDenied);
        }

        if invitation.invitee_id != identity.user_id {
            warn!(
                "User {} tried to redeem an invitation of user {}",
                identity.user_id, invitation.invitee_id
            );
            return Err(CoordinatorError::AccessDenied);
        }

        if !self.consume(&invitation).await? {
            return Err(CoordinatorError::InvitationConsumed);
        }

        info!(
            "User {} redeemed invitation {} for room {}",
            identity.user_id, invitation.id, invitation.room_id
        );

        invitation.used = true;
        Ok(invitation)
    }

    /// Ensures the identity may start and stop playback, and admit others.
    pub fn ensure_control(
        &self,
        identity: &Identity,
        room: &RoomData,
    ) -> Result<(), CoordinatorError> {
        if room.creator_id == identity.user_id {
            Ok(())
        } else {
            Err(CoordinatorError::AccessDenied)
        }
    }

    /// Issues a transport access token for an authorized identity.
    pub async fn access_token(
        &self,
        identity: &Identity,
        room_id: RoomId,
    ) -> Result<String, CoordinatorError> {
        let room = self.context.store.room(room_id).await?;

        if self.authorize(identity, &room).await? == Authorization::Denied {
            return Err(CoordinatorError::AccessDenied);
        }

        self.participant_token(identity, &room)
    }

    pub(crate) fn participant_token(
        &self,
        identity: &Identity,
        room: &RoomData,
    ) -> Result<String, CoordinatorError> {
        let name = identity.display_name(self.context.config.display_identity);
        let token =
            self.context
                .transport
                .issue_access_token(name, &room.transport_room, Grants::participant())?;

        Ok(token)
    }
}
