//! Cross-window sync - advisory state sharing between a main window and its
//! detached graph window.
//!
//! Two transports carry the same `SyncMessage`:
//! - a storage mailbox (sled tree `sync`), one slot per `ChannelKey`, read by
//!   every window through a prefix watch;
//! - a direct handle to the opened window (tokio mpsc), which disappears when
//!   the window closes.
//!
//! Neither guarantees delivery or ordering. Messages are hints; the backend
//! graph stays the source of truth.

use crate::error::Result;
use crate::models::{ChannelKey, SearchMirror, SyncAction, SyncMessage, WindowMessage};
use std::collections::{HashSet, VecDeque};
use tokio::sync::mpsc;

pub const SYNC_TREE: &str = "sync";

/// How many recent message identities a bridge remembers for de-duplication.
const SEEN_CAPACITY: usize = 64;

// ============================================================================
// Storage Mailbox
// ============================================================================

#[derive(Clone)]
pub struct StorageChannel {
    tree: sled::Tree,
}

/// A change observed on the mailbox.
#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub key: ChannelKey,
    pub raw: Vec<u8>,
}

impl StorageChannel {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree(SYNC_TREE)?,
        })
    }

    /// Overwrites the slot; last writer wins.
    pub fn write(&self, key: ChannelKey, msg: &SyncMessage) -> Result<()> {
        let json = serde_json::to_vec(msg)?;
        self.tree.insert(key.as_str().as_bytes(), json)?;
        Ok(())
    }

    /// Current content of a slot. Unreadable content counts as empty.
    pub fn read(&self, key: ChannelKey) -> Option<SyncMessage> {
        let raw = self.tree.get(key.as_str().as_bytes()).ok().flatten()?;
        parse_message(key, &raw)
    }

    pub fn write_search(&self, mirror: &SearchMirror) -> Result<()> {
        let json = serde_json::to_vec(mirror)?;
        self.tree
            .insert(ChannelKey::StandaloneGraphState.as_str().as_bytes(), json)?;
        Ok(())
    }

    pub fn read_search(&self) -> Option<SearchMirror> {
        let key = ChannelKey::StandaloneGraphState;
        let raw = self.tree.get(key.as_str().as_bytes()).ok().flatten()?;
        match serde_json::from_slice(&raw) {
            Ok(mirror) => Some(mirror),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "dropping unparseable search mirror");
                None
            }
        }
    }

    pub fn remove(&self, key: ChannelKey) -> Result<()> {
        self.tree.remove(key.as_str().as_bytes())?;
        Ok(())
    }

    pub fn subscribe(&self) -> StorageSubscription {
        StorageSubscription {
            inner: self.tree.watch_prefix(Vec::new()),
        }
    }
}

pub struct StorageSubscription {
    inner: sled::Subscriber,
}

impl StorageSubscription {
    /// Next insert on a known mailbox key. Removals and foreign keys are
    /// skipped. Returns `None` once the tree is dropped.
    pub async fn next(&mut self) -> Option<StorageEvent> {
        loop {
            let event = (&mut self.inner).await?;
            if let sled::Event::Insert { key, value } = event {
                let name = String::from_utf8_lossy(&key);
                match ChannelKey::parse(&name) {
                    Some(key) => {
                        return Some(StorageEvent {
                            key,
                            raw: value.to_vec(),
                        })
                    }
                    None => tracing::debug!(key = %name, "ignoring unknown mailbox key"),
                }
            }
        }
    }
}

fn parse_message(key: ChannelKey, raw: &[u8]) -> Option<SyncMessage> {
    match serde_json::from_slice(raw) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "dropping unparseable sync message");
            None
        }
    }
}

// ============================================================================
// Window Handle
// ============================================================================

/// Sending side of an opened window. Cheap to clone.
#[derive(Clone, Debug)]
pub struct WindowHandle {
    tx: mpsc::UnboundedSender<String>,
}

/// Receiving side, owned by the opened window.
#[derive(Debug)]
pub struct WindowInbox {
    rx: mpsc::UnboundedReceiver<String>,
}

/// Opens a window and returns both ends of its message port.
pub fn open_window() -> (WindowHandle, WindowInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WindowHandle { tx }, WindowInbox { rx })
}

impl WindowHandle {
    pub fn post(&self, msg: &WindowMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.post_raw(json);
        Ok(())
    }

    /// Posts an already-serialized message; the receiver validates it.
    /// Posting to a closed window does nothing.
    pub fn post_raw(&self, raw: String) {
        if self.tx.send(raw).is_err() {
            tracing::debug!("window closed; message dropped");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl WindowInbox {
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// What a window should act on after filtering.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Sync(SyncMessage),
    ReferencedNodes(Vec<String>),
}

type MessageIdentity = (SyncAction, i64, Option<String>);

pub struct SyncBridge {
    brain_id: String,
    origin: String,
    storage: StorageChannel,
    window: Option<WindowHandle>,
    seen: VecDeque<MessageIdentity>,
    seen_lookup: HashSet<MessageIdentity>,
}

impl SyncBridge {
    pub fn new(brain_id: &str, origin: &str, storage: StorageChannel) -> Self {
        Self {
            brain_id: brain_id.to_string(),
            origin: origin.to_string(),
            storage,
            window: None,
            seen: VecDeque::new(),
            seen_lookup: HashSet::new(),
        }
    }

    pub fn brain_id(&self) -> &str {
        &self.brain_id
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn storage(&self) -> &StorageChannel {
        &self.storage
    }

    /// Remember a window opened from this one.
    pub fn attach_window(&mut self, handle: WindowHandle) {
        self.window = Some(handle);
    }

    /// Build a message for this bridge's brain.
    pub fn message(&self, action: SyncAction) -> SyncMessage {
        SyncMessage::new(&self.brain_id, action)
    }

    /// Publish on the mailbox and, if a window is attached, directly to it.
    /// A closed window is forgotten without failing the publish.
    pub fn publish(&mut self, mut msg: SyncMessage) -> Result<()> {
        msg.origin = Some(self.origin.clone());
        self.storage.write(ChannelKey::for_action(msg.action), &msg)?;

        if let Some(window) = &self.window {
            window.post(&WindowMessage::GraphStateSync {
                message: msg.clone(),
            })?;
        }
        self.detach_if_closed();
        tracing::debug!(action = ?msg.action, brain_id = %self.brain_id, "sync message published");
        Ok(())
    }

    /// Push a referenced-node list straight to the attached window, if any.
    pub fn post_referenced(&mut self, nodes: Vec<String>) -> Result<()> {
        if let Some(window) = &self.window {
            window.post(&WindowMessage::UpdateReferencedNodes { nodes })?;
        }
        self.detach_if_closed();
        Ok(())
    }

    fn detach_if_closed(&mut self) {
        if self.window.as_ref().is_some_and(WindowHandle::is_closed) {
            tracing::debug!(brain_id = %self.brain_id, "attached window closed; detaching");
            self.window = None;
        }
    }

    pub fn has_window(&self) -> bool {
        self.window.is_some()
    }

    fn admit(&mut self, msg: SyncMessage) -> Option<InboundEvent> {
        if msg.brain_id != self.brain_id {
            tracing::debug!(
                expected = %self.brain_id,
                got = %msg.brain_id,
                "ignoring sync message for another brain"
            );
            return None;
        }
        if msg.origin.as_deref() == Some(self.origin.as_str()) {
            return None;
        }

        let identity = (msg.action, msg.timestamp, msg.origin.clone());
        if !self.seen_lookup.insert(identity.clone()) {
            return None;
        }
        self.seen.push_back(identity);
        if self.seen.len() > SEEN_CAPACITY {
            if let Some(old) = self.seen.pop_front() {
                self.seen_lookup.remove(&old);
            }
        }
        Some(InboundEvent::Sync(msg))
    }

    pub fn accept_storage(&mut self, event: &StorageEvent) -> Option<InboundEvent> {
        // The search mirror slot is read on demand, not acted on.
        if event.key == ChannelKey::StandaloneGraphState {
            return None;
        }
        let msg = parse_message(event.key, &event.raw)?;
        self.admit(msg)
    }

    pub fn accept_window(&mut self, raw: &str) -> Option<InboundEvent> {
        let msg: WindowMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable window message");
                return None;
            }
        };
        match msg {
            WindowMessage::UpdateReferencedNodes { nodes } => {
                Some(InboundEvent::ReferencedNodes(nodes))
            }
            WindowMessage::GraphStateSync { message } => self.admit(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn temp_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn msg(brain: &str, action: SyncAction, ts: i64, origin: &str) -> SyncMessage {
        SyncMessage {
            timestamp: ts,
            origin: Some(origin.to_string()),
            ..SyncMessage::new(brain, action)
        }
    }

    #[test]
    fn test_mailbox_write_read() {
        let db = temp_db();
        let storage = StorageChannel::open(&db).unwrap();
        assert!(storage.read(ChannelKey::GraphStateSync).is_none());

        let m = msg("42", SyncAction::ClearHighlights, 1, "main");
        storage.write(ChannelKey::GraphStateSync, &m).unwrap();
        assert_eq!(storage.read(ChannelKey::GraphStateSync), Some(m));

        storage.remove(ChannelKey::GraphStateSync).unwrap();
        assert!(storage.read(ChannelKey::GraphStateSync).is_none());
    }

    #[test]
    fn test_mailbox_garbage_reads_as_empty() {
        let db = temp_db();
        let storage = StorageChannel::open(&db).unwrap();
        db.open_tree(SYNC_TREE)
            .unwrap()
            .insert("graphRefresh", b"not json".to_vec())
            .unwrap();
        assert!(storage.read(ChannelKey::GraphRefresh).is_none());
    }

    #[tokio::test]
    async fn test_publish_reaches_other_window_via_mailbox() {
        let db = temp_db();
        let storage = StorageChannel::open(&db).unwrap();
        let mut main = SyncBridge::new("42", "main", storage.clone());
        let mut standalone = SyncBridge::new("42", "standalone", storage.clone());
        let mut sub = storage.subscribe();

        main.publish(main.message(SyncAction::Refresh)).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key, ChannelKey::GraphRefresh);

        // The writer ignores its own message; the other window accepts it once.
        assert!(main.accept_storage(&event).is_none());
        match standalone.accept_storage(&event) {
            Some(InboundEvent::Sync(m)) => assert_eq!(m.action, SyncAction::Refresh),
            other => panic!("unexpected {:?}", other),
        }
        assert!(standalone.accept_storage(&event).is_none());
    }

    #[test]
    fn test_foreign_brain_and_garbage_are_dropped() {
        let db = temp_db();
        let storage = StorageChannel::open(&db).unwrap();
        let mut bridge = SyncBridge::new("42", "standalone", storage);

        let foreign = StorageEvent {
            key: ChannelKey::GraphStateSync,
            raw: serde_json::to_vec(&msg("7", SyncAction::ClearHighlights, 5, "main")).unwrap(),
        };
        assert!(bridge.accept_storage(&foreign).is_none());

        let garbage = StorageEvent {
            key: ChannelKey::GraphStateSync,
            raw: b"{oops".to_vec(),
        };
        assert!(bridge.accept_storage(&garbage).is_none());
        assert!(bridge.accept_window("[1,2,3]").is_none());
    }

    #[test]
    fn test_same_message_via_both_paths_applies_once() {
        let db = temp_db();
        let storage = StorageChannel::open(&db).unwrap();
        let (handle, mut inbox) = open_window();
        let mut main = SyncBridge::new("42", "main", storage.clone());
        main.attach_window(handle);
        let mut standalone = SyncBridge::new("42", "standalone", storage.clone());

        main.publish(msg("42", SyncAction::ClearHighlights, 10, "ignored"))
            .unwrap();

        let raw = inbox.try_recv().unwrap();
        assert!(matches!(
            standalone.accept_window(&raw),
            Some(InboundEvent::Sync(_))
        ));
        let stored = StorageEvent {
            key: ChannelKey::GraphStateSync,
            raw: serde_json::to_vec(&storage.read(ChannelKey::GraphStateSync).unwrap()).unwrap(),
        };
        assert!(standalone.accept_storage(&stored).is_none());
    }

    #[test]
    fn test_referenced_nodes_post_and_closed_window() {
        let db = temp_db();
        let storage = StorageChannel::open(&db).unwrap();
        let (handle, mut inbox) = open_window();
        let mut main = SyncBridge::new("42", "main", storage.clone());
        main.attach_window(handle.clone());

        main.post_referenced(vec!["x".to_string()]).unwrap();
        let raw = inbox.try_recv().unwrap();
        let mut standalone = SyncBridge::new("42", "standalone", storage);
        assert_eq!(
            standalone.accept_window(&raw),
            Some(InboundEvent::ReferencedNodes(vec!["x".to_string()]))
        );

        inbox.close();
        assert!(handle.is_closed());
        handle
            .post(&WindowMessage::UpdateReferencedNodes { nodes: vec![] })
            .unwrap();
        assert!(inbox.try_recv().is_none());

        // The bridge forgets the closed window; publishing still reaches the mailbox.
        main.post_referenced(vec!["y".to_string()]).unwrap();
        assert!(!main.has_window());
        main.publish(main.message(SyncAction::MemoUpdate)).unwrap();
        assert_eq!(
            storage_action(&main, ChannelKey::GraphStateSync),
            Some(SyncAction::MemoUpdate)
        );
    }

    fn storage_action(bridge: &SyncBridge, key: ChannelKey) -> Option<SyncAction> {
        bridge.storage().read(key).map(|m| m.action)
    }

    #[test]
    fn test_legacy_action_spelling_is_accepted() {
        let db = temp_db();
        let storage = StorageChannel::open(&db).unwrap();
        let mut bridge = SyncBridge::new("42", "main", storage);
        let event = StorageEvent {
            key: ChannelKey::GraphStateSync,
            raw: br#"{"brainId":"42","action":"refresh_from_fullscreen","timestamp":99}"#.to_vec(),
        };
        match bridge.accept_storage(&event) {
            Some(InboundEvent::Sync(m)) => {
                assert_eq!(m.action, SyncAction::Refresh);
                assert!(m.origin.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
