//! Session fan-out: local consumers attached to one module's verified content.
//!
//! Every session sees the same foreground snapshot. A commit replaces the
//! snapshot as a whole and then signals every session once; a session that
//! misses a signal only ever observes the newest content.

use bytes::Bytes;
use remrom_core::ModuleName;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use tokio::sync::Notify;

// ── Signals ──────────────────────────────────────────────────────────────────

/// Notification capability registered by a session.
pub trait Signal {
    fn submit(&self);
}

/// Wakes one waiter, or stores a permit if nobody waits. Repeated
/// submissions before the wake-up coalesce into one.
impl Signal for Notify {
    fn submit(&self) {
        self.notify_one();
    }
}

/// Counts submissions.
#[derive(Debug, Default)]
pub struct SignalCounter {
    count: Cell<u64>,
}

impl SignalCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.get()
    }
}

impl Signal for SignalCounter {
    fn submit(&self) {
        self.count.set(self.count.get() + 1);
    }
}

// ── Root ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no module {requested:?} here (serving {served:?})")]
    UnknownModule { requested: String, served: String },
}

type SessionId = u64;

struct RootInner {
    name: ModuleName,
    default: Bytes,
    foreground: RefCell<Option<Bytes>>,
    sessions: RefCell<BTreeMap<SessionId, Option<Rc<dyn Signal>>>>,
    next_id: Cell<SessionId>,
}

/// Session registry and visible content of one module. Clones share state.
#[derive(Clone)]
pub struct SessionRoot {
    inner: Rc<RootInner>,
}

impl SessionRoot {
    /// `default` is visible until the first commit.
    pub fn new(name: ModuleName, default: Option<Bytes>) -> Self {
        Self {
            inner: Rc::new(RootInner {
                name,
                default: default.unwrap_or_default(),
                foreground: RefCell::new(None),
                sessions: RefCell::new(BTreeMap::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn module_name(&self) -> &ModuleName {
        &self.inner.name
    }

    /// Attach a session. `label` is either the module name or a session
    /// label ending in `-> <module name>`.
    pub fn create_session(&self, label: &str) -> Result<RomSession, SessionError> {
        let requested = label.rsplit("->").next().unwrap_or(label).trim();
        if requested != self.inner.name.as_str() {
            return Err(SessionError::UnknownModule {
                requested: requested.to_string(),
                served: self.inner.name.to_string(),
            });
        }
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.sessions.borrow_mut().insert(id, None);
        tracing::debug!(module = %self.inner.name, session = id, "session attached");
        Ok(RomSession {
            root: self.clone(),
            id,
        })
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.borrow().len()
    }

    /// Current visible content: last commit, else the default payload.
    pub fn dataspace(&self) -> Bytes {
        self.inner
            .foreground
            .borrow()
            .clone()
            .unwrap_or_else(|| self.inner.default.clone())
    }

    /// Whether any content has been committed yet.
    pub fn has_content(&self) -> bool {
        self.inner.foreground.borrow().is_some()
    }

    /// Replace the visible content. Does not notify.
    pub fn publish(&self, content: Bytes) {
        *self.inner.foreground.borrow_mut() = Some(content);
    }

    /// Signal every session that registered a capability. Returns how many
    /// were signalled.
    pub fn notify_clients(&self) -> usize {
        // Collect first: a signal handler may attach or detach sessions.
        let signals: Vec<Rc<dyn Signal>> = self
            .inner
            .sessions
            .borrow()
            .values()
            .flatten()
            .cloned()
            .collect();
        for signal in &signals {
            signal.submit();
        }
        tracing::debug!(module = %self.inner.name, sessions = signals.len(), "clients notified");
        signals.len()
    }

    fn set_sigh(&self, id: SessionId, signal: Rc<dyn Signal>) {
        if let Some(slot) = self.inner.sessions.borrow_mut().get_mut(&id) {
            *slot = Some(signal);
        }
    }

    fn detach(&self, id: SessionId) {
        self.inner.sessions.borrow_mut().remove(&id);
        tracing::debug!(module = %self.inner.name, session = id, "session detached");
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

/// One local consumer of a module. Detaches on drop.
pub struct RomSession {
    root: SessionRoot,
    id: SessionId,
}

impl RomSession {
    /// Register the capability signalled after each commit. Replaces any
    /// previously registered one.
    pub fn sigh(&self, signal: Rc<dyn Signal>) {
        self.root.set_sigh(self.id, signal);
    }

    /// Current content snapshot. Never a partial transfer.
    pub fn dataspace(&self) -> Bytes {
        self.root.dataspace()
    }

    pub fn module_name(&self) -> &ModuleName {
        self.root.module_name()
    }
}

impl Drop for RomSession {
    fn drop(&mut self) {
        self.root.detach(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> SessionRoot {
        SessionRoot::new(ModuleName::new("config").unwrap(), Some(Bytes::from_static(b"default")))
    }

    #[test]
    fn label_must_name_module() {
        let root = root();
        assert!(root.create_session("config").is_ok());
        assert!(root.create_session("init -> app -> config").is_ok());
        assert_eq!(
            root.create_session("state").err(),
            Some(SessionError::UnknownModule {
                requested: "state".into(),
                served: "config".into()
            })
        );
    }

    #[test]
    fn dataspace_shows_default_then_committed() {
        let root = root();
        let session = root.create_session("config").unwrap();
        assert_eq!(session.dataspace(), Bytes::from_static(b"default"));
        assert!(!root.has_content());
        root.publish(Bytes::from_static(b"CAFEBABE"));
        assert_eq!(session.dataspace(), Bytes::from_static(b"CAFEBABE"));
    }

    #[test]
    fn notify_reaches_registered_sessions_only() {
        let root = root();
        let a = root.create_session("config").unwrap();
        let b = root.create_session("config").unwrap();
        let _silent = root.create_session("config").unwrap();

        let sig_a = Rc::new(SignalCounter::new());
        let sig_b = Rc::new(SignalCounter::new());
        a.sigh(sig_a.clone());
        b.sigh(sig_b.clone());

        assert_eq!(root.notify_clients(), 2);
        assert_eq!(root.notify_clients(), 2);
        assert_eq!(sig_a.count(), 2);
        assert_eq!(sig_b.count(), 2);

        drop(b);
        assert_eq!(root.session_count(), 2);
        assert_eq!(root.notify_clients(), 1);
        assert_eq!(sig_a.count(), 3);
        assert_eq!(sig_b.count(), 2);
    }

    #[test]
    fn sigh_replaces_previous_capability() {
        let root = root();
        let s = root.create_session("config").unwrap();
        let first = Rc::new(SignalCounter::new());
        let second = Rc::new(SignalCounter::new());
        s.sigh(first.clone());
        s.sigh(second.clone());
        root.notify_clients();
        assert_eq!(first.count(), 0);
        assert_eq!(second.count(), 1);
    }

    #[test]
    fn notify_signal_stores_permit() {
        let notify = Rc::new(Notify::new());
        let root = root();
        let s = root.create_session("config").unwrap();
        s.sigh(notify.clone());
        root.notify_clients();
        root.notify_clients();

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            // Coalesced into one stored permit.
            notify.notified().await;
        });
    }
}
