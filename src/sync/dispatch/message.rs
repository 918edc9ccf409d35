//! PRIVMSG and NOTICE.

use super::{Outbound, is_channel_name, malformed};
use crate::error::LinkError;
use crate::state::MessageKind;
use crate::sync::link::ConnId;
use crate::sync::manager::SyncManager;
use slirc_link_proto::Line;
use tracing::debug;

impl SyncManager {
    /// `PRIVMSG|NOTICE <id> <origin> <from-uid> <target> :<text>`
    ///
    /// Channel messages reach local members and travel on to every other
    /// user-sync link. User messages go to the owning server only.
    pub(super) fn handle_message(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(kind), Some(from), Some(target)) = (
            MessageKind::from_command(&line.command),
            line.arg(2),
            line.arg(3),
        ) else {
            return Ok(malformed(line));
        };
        let text = line.text(4).unwrap_or_default();
        let Some(sender) = self.matrix.user(from) else {
            debug!(%conn, uid = %from, "Message from unknown user");
            return Ok(Vec::new());
        };

        if is_channel_name(target) {
            let recipients: Vec<_> = self
                .matrix
                .local_members(target)
                .into_iter()
                .filter(|uid| uid != from)
                .collect();
            if !recipients.is_empty() {
                self.observer.deliver(kind, &sender, target, text, &recipients);
            }
            return Ok(vec![Outbound::relay(line, conn)]);
        }

        let recipient = match self.matrix.user(target) {
            Some(user) => Some(user),
            None => self.matrix.uid_for_nick(target).and_then(|uid| self.matrix.user(&uid)),
        };
        let Some(recipient) = recipient else {
            debug!(%conn, target = %target, "Message for unknown target");
            return Ok(Vec::new());
        };
        match &recipient.remote_sid {
            Some(owner) => Ok(self.forward_directed(conn, line, owner)),
            None => {
                self.observer
                    .deliver(kind, &sender, &recipient.nick, text, std::slice::from_ref(&recipient.uid));
                Ok(Vec::new())
            }
        }
    }
}
