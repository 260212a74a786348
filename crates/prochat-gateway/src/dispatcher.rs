use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use prochat_db::MessageStore;
use prochat_types::events::{
    ClientEvent, PresenceStatus, SendMessagePayload, ServerEvent, TypingPayload,
};
use prochat_types::models::MessageView;

use crate::registry::{ConnId, Registry};

pub const MISSING_FIELDS: &str = "Missing required fields";
pub const SEND_FAILED: &str = "Failed to send message";

/// The realtime delivery engine: owns the connection registry and runs
/// every client event against it.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    store: Arc<dyn MessageStore>,

    /// Connections and rooms. Never held across a store call.
    registry: RwLock<Registry>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                store,
                registry: RwLock::new(Registry::default()),
            }),
        }
    }

    /// Register a new live connection. The receiver yields every event
    /// addressed to it.
    pub async fn connect(&self) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.registry.write().await.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Connection closed: drop it from every room it joined.
    pub async fn disconnect(&self, conn_id: ConnId) {
        let rooms = self.inner.registry.write().await.remove(conn_id);
        debug!("connection {} left {} room(s)", conn_id, rooms.len());
    }

    /// Decode one text frame and route it. Frames that do not decode are
    /// dropped, except a `sendMessage`, which is answered with `messageError`.
    pub async fn handle_frame(&self, conn_id: ConnId, frame: &str) {
        match serde_json::from_str::<ClientEvent>(frame) {
            Ok(event) => self.handle_event(conn_id, event).await,
            Err(e) => {
                warn!(
                    "connection {} bad event: {} -- raw: {}",
                    conn_id,
                    e,
                    frame.chars().take(200).collect::<String>()
                );
                if ClientEvent::tag_of(frame).as_deref() == Some("sendMessage") {
                    self.send_message(conn_id, SendMessagePayload::default()).await;
                }
            }
        }
    }

    /// Route one decoded client event.
    pub async fn handle_event(&self, conn_id: ConnId, event: ClientEvent) {
        match event {
            ClientEvent::Join(user_id) => self.join(conn_id, user_id).await,
            ClientEvent::SendMessage(payload) => self.send_message(conn_id, payload).await,
            ClientEvent::Typing(payload) => self.typing(conn_id, payload).await,
            ClientEvent::UserOnline(user_id) => {
                self.user_status(conn_id, user_id, PresenceStatus::Online).await
            }
            ClientEvent::UserOffline(user_id) => {
                self.user_status(conn_id, user_id, PresenceStatus::Offline).await
            }
        }
    }

    /// Put the connection in the room named after `user_id`.
    ///
    /// The id is taken on trust; nothing ties it to an authenticated session.
    pub async fn join(&self, conn_id: ConnId, user_id: Uuid) {
        if self.inner.registry.write().await.join(conn_id, user_id) {
            info!("connection {} joined room {}", conn_id, user_id);
        }
    }

    /// Persist a message, then deliver it to the sender's connection and to
    /// every other connection in the recipient's room.
    pub async fn send_message(&self, conn_id: ConnId, payload: SendMessagePayload) {
        let Some((sender, recipient, text)) = payload.validate() else {
            warn!("connection {} sent an incomplete message", conn_id);
            self.send_to(conn_id, ServerEvent::message_error(MISSING_FIELDS)).await;
            return;
        };

        let view = match self.persist(sender, recipient, text).await {
            Ok(view) => view,
            Err(e) => {
                error!("failed to store message from {} to {}: {:#}", sender, recipient, e);
                self.send_to(conn_id, ServerEvent::message_error(SEND_FAILED)).await;
                return;
            }
        };

        let event = ServerEvent::NewMessage(view);
        let registry = self.inner.registry.read().await;
        registry.send_to(conn_id, event.clone());
        // The sender already has its copy; skip it if it also sits in the
        // recipient's room.
        registry.send_to_room(recipient, Some(conn_id), &event);
    }

    /// Deliver an already stored message to the recipient's room. Used by the
    /// REST send path, which has no originating socket.
    pub async fn deliver(&self, view: MessageView) {
        let recipient = view.recipient.id;
        let delivered = self
            .inner
            .registry
            .read()
            .await
            .send_to_room(recipient, None, &ServerEvent::NewMessage(view));
        debug!("message delivered to {} connection(s) of {}", delivered, recipient);
    }

    /// Relay a typing indicator to the recipient's room, never back to the
    /// connection it came from.
    pub async fn typing(&self, conn_id: ConnId, payload: TypingPayload) {
        let (Some(user_id), Some(recipient)) = (payload.user_id, payload.recipient_id) else {
            return;
        };
        let event = ServerEvent::UserTyping {
            user_id,
            is_typing: payload.is_typing,
        };
        self.inner
            .registry
            .read()
            .await
            .send_to_room(recipient, Some(conn_id), &event);
    }

    /// Announce a presence change to every other connected client.
    pub async fn user_status(&self, conn_id: ConnId, user_id: Uuid, status: PresenceStatus) {
        info!("{} is {:?}", user_id, status);
        self.inner
            .registry
            .read()
            .await
            .send_to_all(Some(conn_id), &ServerEvent::UserStatus { user_id, status });
    }

    async fn send_to(&self, conn_id: ConnId, event: ServerEvent) {
        self.inner.registry.read().await.send_to(conn_id, event);
    }

    async fn persist(&self, sender: Uuid, recipient: Uuid, text: String) -> anyhow::Result<MessageView> {
        let store = self.inner.store.clone();
        tokio::task::spawn_blocking(move || {
            let message = store.create_message(sender, recipient, &text)?;
            store.expand_message(&message)
        })
        .await?
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.read().await.connection_count()
    }

    pub async fn room_size(&self, room: Uuid) -> usize {
        self.inner.registry.read().await.room_size(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use anyhow::anyhow;
    use prochat_db::{Database, NewUser};
    use prochat_types::models::Message;

    fn add_user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let handle = name.to_lowercase();
        let email = format!("{handle}@example.com");
        db.create_user(&NewUser {
            id,
            name,
            email: &email,
            password_hash: "hash",
            handle: &handle,
        })
        .unwrap();
        id
    }

    fn setup() -> (Dispatcher, Arc<Database>, Uuid, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let a = add_user(&db, "Ada");
        let b = add_user(&db, "Bob");
        (Dispatcher::new(db.clone()), db, a, b)
    }

    fn payload(sender: Uuid, recipient: Uuid, text: &str) -> SendMessagePayload {
        SendMessagePayload {
            sender_id: Some(sender),
            recipient_id: Some(recipient),
            text: Some(text.into()),
        }
    }

    struct FailingStore;

    impl MessageStore for FailingStore {
        fn create_message(&self, _: Uuid, _: Uuid, _: &str) -> anyhow::Result<Message> {
            Err(anyhow!("disk on fire"))
        }

        fn expand_message(&self, _: &Message) -> anyhow::Result<MessageView> {
            unreachable!()
        }

        fn conversation(&self, _: Uuid, _: Uuid) -> anyhow::Result<Vec<Message>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn message_reaches_sender_and_recipient_room() {
        let (dispatcher, db, a, b) = setup();
        let (c1, mut rx1) = dispatcher.connect().await;
        let (c2, mut rx2) = dispatcher.connect().await;
        dispatcher.handle_event(c1, ClientEvent::Join(a)).await;
        dispatcher.handle_event(c2, ClientEvent::Join(b)).await;

        dispatcher
            .handle_event(c1, ClientEvent::SendMessage(payload(a, b, "hello")))
            .await;

        let ServerEvent::NewMessage(to_sender) = rx1.try_recv().unwrap() else {
            panic!("sender did not get newMessage");
        };
        let ServerEvent::NewMessage(to_recipient) = rx2.try_recv().unwrap() else {
            panic!("recipient did not get newMessage");
        };
        assert_eq!(to_sender.text, "hello");
        assert_eq!(to_sender, to_recipient);
        assert_eq!(to_sender.sender.name, "Ada");
        assert_eq!(to_sender.recipient.id, b);

        let stored = db.conversation(a, b).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!((stored[0].sender, stored[0].recipient), (a, b));
        assert_eq!(stored[0].text, "hello");
    }

    #[tokio::test]
    async fn every_recipient_connection_gets_one_copy() {
        let (dispatcher, _db, a, b) = setup();
        let (sender, mut sender_rx) = dispatcher.connect().await;
        let (phone, mut phone_rx) = dispatcher.connect().await;
        let (laptop, mut laptop_rx) = dispatcher.connect().await;
        dispatcher.join(phone, b).await;
        dispatcher.join(laptop, b).await;
        dispatcher.join(laptop, b).await;

        dispatcher.send_message(sender, payload(a, b, "hi")).await;

        for rx in [&mut sender_rx, &mut phone_rx, &mut laptop_rx] {
            assert!(matches!(rx.try_recv(), Ok(ServerEvent::NewMessage(_))));
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn message_to_self_is_delivered_once_per_socket() {
        let (dispatcher, _db, a, _b) = setup();
        let (c1, mut rx1) = dispatcher.connect().await;
        dispatcher.join(c1, a).await;

        dispatcher.send_message(c1, payload(a, a, "note to self")).await;

        assert!(matches!(rx1.try_recv(), Ok(ServerEvent::NewMessage(_))));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn blank_text_is_rejected_without_storing() {
        let (dispatcher, db, a, b) = setup();
        let (c1, mut rx1) = dispatcher.connect().await;
        let (c2, mut rx2) = dispatcher.connect().await;
        dispatcher.join(c2, b).await;

        dispatcher.send_message(c1, payload(a, b, "   ")).await;

        assert_eq!(rx1.try_recv().unwrap(), ServerEvent::message_error(MISSING_FIELDS));
        assert!(rx2.try_recv().is_err());
        assert!(db.conversation(a, b).unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_recipient_is_rejected() {
        let (dispatcher, _db, a, _b) = setup();
        let (c1, mut rx1) = dispatcher.connect().await;

        let incomplete = SendMessagePayload {
            sender_id: Some(a),
            recipient_id: None,
            text: Some("hi".into()),
        };
        dispatcher.send_message(c1, incomplete).await;

        assert_eq!(rx1.try_recv().unwrap(), ServerEvent::message_error(MISSING_FIELDS));
    }

    #[tokio::test]
    async fn malformed_send_frames_get_a_message_error() {
        let (dispatcher, db, a, b) = setup();
        let (c1, mut rx1) = dispatcher.connect().await;

        let frames = [
            format!(r#"{{"event":"sendMessage","data":{{"senderId":"","recipientId":"{b}","text":"hi"}}}}"#),
            format!(r#"{{"event":"sendMessage","data":{{"senderId":"{a}","recipientId":"{b}","text":42}}}}"#),
            r#"{"event":"sendMessage","data":"hi"}"#.to_string(),
            r#"{"event":"sendMessage"}"#.to_string(),
        ];
        for frame in &frames {
            dispatcher.handle_frame(c1, frame).await;
            assert_eq!(
                rx1.try_recv().unwrap(),
                ServerEvent::message_error(MISSING_FIELDS),
                "{frame}"
            );
        }
        assert!(db.conversation(a, b).unwrap().is_empty());

        // other undecodable frames are dropped silently
        dispatcher.handle_frame(c1, r#"{"event":"join","data":"nope"}"#).await;
        dispatcher.handle_frame(c1, "garbage").await;
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn store_failure_reports_to_sender_only_and_connection_survives() {
        let dispatcher = Dispatcher::new(Arc::new(FailingStore));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (c1, mut rx1) = dispatcher.connect().await;
        let (c2, mut rx2) = dispatcher.connect().await;
        dispatcher.join(c2, b).await;

        dispatcher.send_message(c1, payload(a, b, "hello")).await;
        assert_eq!(rx1.try_recv().unwrap(), ServerEvent::message_error(SEND_FAILED));
        assert!(rx2.try_recv().is_err());

        // still usable
        dispatcher
            .typing(
                c1,
                TypingPayload {
                    user_id: Some(a),
                    recipient_id: Some(b),
                    is_typing: true,
                },
            )
            .await;
        assert!(matches!(rx2.try_recv(), Ok(ServerEvent::UserTyping { .. })));
    }

    #[tokio::test]
    async fn unknown_recipient_fails_to_persist() {
        let (dispatcher, _db, a, _b) = setup();
        let (c1, mut rx1) = dispatcher.connect().await;

        dispatcher.send_message(c1, payload(a, Uuid::new_v4(), "hi")).await;

        assert_eq!(rx1.try_recv().unwrap(), ServerEvent::message_error(SEND_FAILED));
    }

    #[tokio::test]
    async fn typing_is_not_echoed_to_origin() {
        let (dispatcher, _db, a, b) = setup();
        let (c1, mut rx1) = dispatcher.connect().await;
        let (c2, mut rx2) = dispatcher.connect().await;
        dispatcher.join(c1, a).await;
        dispatcher.join(c2, b).await;
        // the origin also sits in the recipient room
        dispatcher.join(c1, b).await;

        dispatcher
            .handle_event(
                c1,
                ClientEvent::Typing(TypingPayload {
                    user_id: Some(a),
                    recipient_id: Some(b),
                    is_typing: true,
                }),
            )
            .await;

        assert_eq!(
            rx2.try_recv().unwrap(),
            ServerEvent::UserTyping {
                user_id: a,
                is_typing: true
            }
        );
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_without_recipient_is_a_no_op() {
        let (dispatcher, _db, a, _b) = setup();
        let (c1, _rx1) = dispatcher.connect().await;
        let (_c2, mut rx2) = dispatcher.connect().await;

        dispatcher
            .typing(
                c1,
                TypingPayload {
                    user_id: Some(a),
                    recipient_id: None,
                    is_typing: true,
                },
            )
            .await;

        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn presence_goes_to_everyone_else() {
        let (dispatcher, _db, a, _b) = setup();
        let (c1, mut rx1) = dispatcher.connect().await;
        let (_c2, mut rx2) = dispatcher.connect().await;
        let (_c3, mut rx3) = dispatcher.connect().await;

        dispatcher.handle_event(c1, ClientEvent::UserOnline(a)).await;
        dispatcher.handle_event(c1, ClientEvent::UserOffline(a)).await;

        assert!(rx1.try_recv().is_err());
        for rx in [&mut rx2, &mut rx3] {
            assert_eq!(
                rx.try_recv().unwrap(),
                ServerEvent::UserStatus {
                    user_id: a,
                    status: PresenceStatus::Online
                }
            );
            assert_eq!(
                rx.try_recv().unwrap(),
                ServerEvent::UserStatus {
                    user_id: a,
                    status: PresenceStatus::Offline
                }
            );
        }
    }

    #[tokio::test]
    async fn disconnect_leaves_rooms() {
        let (dispatcher, _db, a, b) = setup();
        let (c1, _rx1) = dispatcher.connect().await;
        let (c2, mut rx2) = dispatcher.connect().await;
        dispatcher.join(c2, b).await;
        assert_eq!(dispatcher.room_size(b).await, 1);

        dispatcher.disconnect(c2).await;
        assert_eq!(dispatcher.room_size(b).await, 0);
        assert_eq!(dispatcher.connection_count().await, 1);

        dispatcher.send_message(c1, payload(a, b, "anyone?")).await;
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn rest_delivery_reaches_recipient_room() {
        let (dispatcher, db, a, b) = setup();
        let (c2, mut rx2) = dispatcher.connect().await;
        dispatcher.join(c2, b).await;

        let stored = db.create_message(a, b, "from rest").unwrap();
        dispatcher.deliver(db.expand_message(&stored).unwrap()).await;

        let ServerEvent::NewMessage(view) = rx2.try_recv().unwrap() else {
            panic!("expected newMessage");
        };
        assert_eq!(view.text, "from rest");
    }
}
