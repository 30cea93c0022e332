use std::{str::FromStr, sync::Arc};

use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    ChatError, ClientEvent, ConnectionHandle, Message, MessageError, MessageStore, PresenceRegistry,
    PrivateMessage, ServerEvent, UserId,
};

/// Where the sender of a `private_message` comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderPolicy {
    /// The identity the connection announced; a conflicting payload
    /// `sender_id` is rejected.
    #[default]
    Bound,
    /// Whatever `sender_id` the payload carries.
    Payload,
}

impl FromStr for SenderPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bound" => Ok(SenderPolicy::Bound),
            "payload" => Ok(SenderPolicy::Payload),
            other => Err(format!("unknown sender policy {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GatewayOptions {
    pub sender_policy: SenderPolicy,
    pub max_message_len: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        GatewayOptions {
            sender_policy: SenderPolicy::Bound,
            max_message_len: 4000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Bound(UserId),
    Closed,
}

/// One live connection as the gateway sees it.
#[derive(Debug)]
pub struct Session {
    handle: ConnectionHandle,
    state: SessionState,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }
}

/// Binds connections to users, stores their messages and fans them out.
#[derive(Debug, Clone)]
pub struct Gateway {
    store: MessageStore,
    presence: Arc<PresenceRegistry>,
    options: GatewayOptions,
}

impl Gateway {
    pub fn new(store: MessageStore, presence: Arc<PresenceRegistry>, options: GatewayOptions) -> Self {
        Gateway { store, presence, options }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Opens an anonymous session. Events for it arrive on the receiver.
    pub fn connect(&self) -> (Session, mpsc::UnboundedReceiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::new();
        tracing::info!(connection_id = %handle.id(), "connection opened");
        (
            Session {
                handle,
                state: SessionState::Anonymous,
            },
            rx,
        )
    }

    pub fn announce(&self, session: &mut Session, user_id: UserId) -> Result<(), ChatError> {
        if session.state == SessionState::Closed {
            return Err(ChatError::Closed);
        }

        if let Some(previous) = self.presence.set_online(user_id, session.handle.clone()) {
            tracing::debug!(user_id, superseded = %previous.id(), "presence taken over");
        }
        session.state = SessionState::Bound(user_id);
        tracing::info!(user_id, connection_id = %session.id(), "user online");
        Ok(())
    }

    /// Stores the message, then pushes it to the receiver and the sender if
    /// they are online. A failed store drops the message; nothing is pushed
    /// and nothing is retried.
    pub async fn send_private_message(&self, session: &Session, request: PrivateMessage) -> Result<Message, ChatError> {
        let bound_user = match session.state {
            SessionState::Bound(user_id) => user_id,
            SessionState::Anonymous => return Err(ChatError::NotAnnounced),
            SessionState::Closed => return Err(ChatError::Closed),
        };
        let sender_id = self.resolve_sender(bound_user, request.sender_id)?;
        let receiver_id = request
            .receiver_id
            .ok_or_else(|| ChatError::Validation("receiver_id is required".into()))?;
        let content = request.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ChatError::Validation("content is required".into()));
        }
        if content.chars().count() > self.options.max_message_len {
            return Err(ChatError::Validation(format!(
                "content exceeds {} characters",
                self.options.max_message_len
            )));
        }

        let message = self
            .store
            .append(sender_id, receiver_id, &content)
            .await
            .inspect_err(|err| tracing::error!(sender_id, receiver_id, error = %err, "failed to save message"))?;

        self.deliver(&message);
        Ok(message)
    }

    fn resolve_sender(&self, bound_user: UserId, claimed: Option<UserId>) -> Result<UserId, ChatError> {
        match (self.options.sender_policy, claimed) {
            (SenderPolicy::Bound, None) => Ok(bound_user),
            (SenderPolicy::Bound, Some(claimed)) if claimed == bound_user => Ok(bound_user),
            (SenderPolicy::Bound, Some(claimed)) => Err(ChatError::Validation(format!(
                "sender_id {claimed} does not match the announced user {bound_user}"
            ))),
            (SenderPolicy::Payload, Some(claimed)) => Ok(claimed),
            (SenderPolicy::Payload, None) => Err(ChatError::Validation("sender_id is required".into())),
        }
    }

    fn deliver(&self, message: &Message) {
        let receiver = self.presence.lookup(message.receiver_id);
        let sender = self.presence.lookup(message.sender_id);

        let mut delivered = 0;
        if let Some(receiver) = &receiver {
            delivered += receiver.push(ServerEvent::ReceiveMessage(message.clone())) as usize;
        }
        // a message to oneself reaches that connection once
        if let Some(sender) = sender.filter(|sender| receiver.as_ref() != Some(sender)) {
            delivered += sender.push(ServerEvent::ReceiveMessage(message.clone())) as usize;
        }

        tracing::debug!(message_id = message.id, delivered, "message fanned out");
    }

    /// Runs one decoded client event. Failures are reported back to the
    /// originating connection only.
    pub async fn handle_event(&self, session: &mut Session, event: ClientEvent) {
        let result = match event {
            ClientEvent::UserOnline(user_id) => self.announce(session, user_id),
            ClientEvent::PrivateMessage(request) => self.send_private_message(session, request).await.map(|_| ()),
        };

        if let Err(err) = result {
            tracing::debug!(connection_id = %session.id(), kind = err.kind(), error = %err, "event rejected");
            session.handle.push(ServerEvent::MessageError(MessageError::from(&err)));
        }
    }

    pub fn disconnect(&self, session: &mut Session) {
        if session.state == SessionState::Closed {
            return;
        }

        let offline = self.presence.remove_by_handle(session.id());
        session.state = SessionState::Closed;
        tracing::info!(connection_id = %session.id(), ?offline, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::db;

    async fn gateway(options: GatewayOptions) -> Gateway {
        let db_pool = db::connect_in_memory().await.unwrap();
        db::migrate(&db_pool).await.unwrap();
        Gateway::new(MessageStore::new(db_pool), Arc::new(PresenceRegistry::new()), options)
    }

    fn message(sender_id: Option<UserId>, receiver_id: UserId, content: &str) -> PrivateMessage {
        PrivateMessage {
            sender_id,
            receiver_id: Some(receiver_id),
            content: Some(content.into()),
        }
    }

    fn received(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Message {
        match rx.try_recv() {
            Ok(ServerEvent::ReceiveMessage(message)) => message,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn message_reaches_both_parties_and_history() {
        let gateway = gateway(GatewayOptions::default()).await;
        let (mut one, mut rx1) = gateway.connect();
        let (mut two, mut rx2) = gateway.connect();
        gateway.announce(&mut one, 1).unwrap();
        gateway.announce(&mut two, 2).unwrap();

        let sent = gateway.send_private_message(&one, message(Some(1), 2, "hi")).await.unwrap();

        assert_eq!((sent.sender_id, sent.receiver_id, sent.content.as_str()), (1, 2, "hi"));
        assert_eq!(received(&mut rx1), sent);
        assert_eq!(received(&mut rx2), sent);
        assert_eq!(gateway.store().history(1, 2).await.unwrap(), vec![sent]);
    }

    #[tokio::test]
    async fn offline_receiver_finds_message_in_history() {
        let gateway = gateway(GatewayOptions::default()).await;
        let (mut one, mut rx1) = gateway.connect();
        let (mut two, mut rx2) = gateway.connect();
        gateway.announce(&mut one, 1).unwrap();
        gateway.announce(&mut two, 2).unwrap();
        gateway.disconnect(&mut two);
        assert!(!gateway.presence().is_online(2));

        let sent = gateway.send_private_message(&one, message(None, 2, "you there?")).await.unwrap();
        assert_eq!(received(&mut rx1), sent);
        assert!(matches!(rx2.try_recv(), Err(TryRecvError::Empty | TryRecvError::Disconnected)));

        let (mut again, _rx) = gateway.connect();
        gateway.announce(&mut again, 2).unwrap();
        assert_eq!(gateway.store().history(2, 1).await.unwrap(), vec![sent]);
    }

    #[tokio::test]
    async fn succeeds_with_everyone_offline() {
        let gateway = gateway(GatewayOptions::default()).await;
        let (mut one, rx1) = gateway.connect();
        gateway.announce(&mut one, 1).unwrap();
        // the announcement is stale: the socket is gone but no disconnect fired yet
        drop(rx1);

        let sent = gateway.send_private_message(&one, message(None, 2, "into the void")).await.unwrap();
        assert_eq!(gateway.store().history(1, 2).await.unwrap(), vec![sent]);
    }

    #[tokio::test]
    async fn failed_append_pushes_nothing() {
        let db_pool = db::connect_in_memory().await.unwrap();
        db::migrate(&db_pool).await.unwrap();
        let gateway = Gateway::new(
            MessageStore::new(db_pool.clone()),
            Arc::new(PresenceRegistry::new()),
            GatewayOptions::default(),
        );
        let (mut one, mut rx1) = gateway.connect();
        let (mut two, mut rx2) = gateway.connect();
        gateway.announce(&mut one, 1).unwrap();
        gateway.announce(&mut two, 2).unwrap();

        db_pool.close().await;

        let err = gateway.send_private_message(&one, message(None, 2, "lost")).await.unwrap_err();
        assert!(matches!(err, ChatError::Storage(_)));
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn failures_are_acknowledged_to_the_sender_only() {
        let gateway = gateway(GatewayOptions::default()).await;
        let (mut one, mut rx1) = gateway.connect();
        let (mut two, mut rx2) = gateway.connect();
        gateway.handle_event(&mut one, ClientEvent::UserOnline(1)).await;
        gateway.handle_event(&mut two, ClientEvent::UserOnline(2)).await;

        let missing_receiver = PrivateMessage {
            content: Some("hello?".into()),
            ..Default::default()
        };
        gateway.handle_event(&mut one, ClientEvent::PrivateMessage(missing_receiver)).await;

        assert_eq!(
            rx1.try_recv().unwrap(),
            ServerEvent::MessageError(MessageError {
                kind: "validation".into(),
                message: "receiver_id is required".into(),
            })
        );
        assert!(rx2.try_recv().is_err());
        assert!(gateway.store().history(1, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn anonymous_and_closed_sessions_cannot_send() {
        let gateway = gateway(GatewayOptions::default()).await;
        let (mut session, _rx) = gateway.connect();
        assert_eq!(session.state(), SessionState::Anonymous);

        let err = gateway.send_private_message(&session, message(Some(1), 2, "hi")).await.unwrap_err();
        assert!(matches!(err, ChatError::NotAnnounced));

        gateway.announce(&mut session, 1).unwrap();
        assert_eq!(session.state(), SessionState::Bound(1));
        gateway.disconnect(&mut session);
        assert_eq!(session.state(), SessionState::Closed);

        let err = gateway.send_private_message(&session, message(Some(1), 2, "hi")).await.unwrap_err();
        assert!(matches!(err, ChatError::Closed));
        assert!(matches!(gateway.announce(&mut session, 1), Err(ChatError::Closed)));
        assert_eq!(gateway.presence().online_count(), 0);
    }

    #[tokio::test]
    async fn bound_policy_rejects_spoofed_sender() {
        let gateway = gateway(GatewayOptions::default()).await;
        let (mut one, _rx) = gateway.connect();
        gateway.announce(&mut one, 1).unwrap();

        let err = gateway.send_private_message(&one, message(Some(3), 2, "spoof")).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(gateway.store().history(3, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn payload_policy_trusts_sender_id() {
        let gateway = gateway(GatewayOptions {
            sender_policy: SenderPolicy::Payload,
            ..Default::default()
        })
        .await;
        let (mut one, _rx1) = gateway.connect();
        let (mut three, mut rx3) = gateway.connect();
        gateway.announce(&mut one, 1).unwrap();
        gateway.announce(&mut three, 3).unwrap();

        let sent = gateway.send_private_message(&one, message(Some(3), 2, "as three")).await.unwrap();
        assert_eq!(sent.sender_id, 3);
        // the echo follows the claimed sender
        assert_eq!(received(&mut rx3), sent);

        let err = gateway.send_private_message(&one, message(None, 2, "who?")).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn content_is_validated() {
        let gateway = gateway(GatewayOptions {
            max_message_len: 5,
            ..Default::default()
        })
        .await;
        let (mut one, _rx) = gateway.connect();
        gateway.announce(&mut one, 1).unwrap();

        for content in ["   ", "too long"] {
            let err = gateway.send_private_message(&one, message(None, 2, content)).await.unwrap_err();
            assert!(matches!(err, ChatError::Validation(_)), "{content:?}");
        }
        assert!(gateway.send_private_message(&one, message(None, 2, "héllo")).await.is_ok());
    }

    #[tokio::test]
    async fn message_to_self_is_pushed_once() {
        let gateway = gateway(GatewayOptions::default()).await;
        let (mut one, mut rx1) = gateway.connect();
        gateway.announce(&mut one, 1).unwrap();

        let sent = gateway.send_private_message(&one, message(None, 1, "note to self")).await.unwrap();
        assert_eq!(received(&mut rx1), sent);
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn sender_policy_parses() {
        assert_eq!("bound".parse(), Ok(SenderPolicy::Bound));
        assert_eq!("payload".parse(), Ok(SenderPolicy::Payload));
        assert!("trusted".parse::<SenderPolicy>().is_err());
    }
}
