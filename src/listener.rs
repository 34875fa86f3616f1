//! Listener list: append-at-tail, unlink-in-place, phase-closure.
//!
//! A truly pointer-chasing lock-free list needs hazard pointers or epoch
//! reclamation to stay memory-safe without a garbage collector. This
//! trades that for per-operation mutex/CAS loops at the cost of some
//! contention: the list body is a short-critical-section
//! `Mutex<Vec<Arc<ListenerNode>>>` (append, close, and compaction all hold
//! it only for O(list length) pointer work, never while invoking a
//! listener), while the phase-closure bits are a genuinely lock-free
//! `AtomicU8` and a single node's disposal is a lock-free store on that
//! node. Traversal for *invocation* never holds the lock: callers take a
//! cloned snapshot first (see [`ListenerList::snapshot`]), so removal
//! during a concurrent traversal is safe without holding a lock across user
//! callbacks.

use crate::error::JobError;
use crate::job::Job;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Phase-closure bits.
pub mod phase {
    /// Set when completion handlers are about to be notified.
    pub const COMPLETION: u8 = 0b001;
    /// Set when children acceptance is sealed.
    pub const CHILDREN: u8 = 0b010;
    /// Set when cancellation handlers are about to be notified.
    pub const CANCELLATION: u8 = 0b100;
}

pub(crate) type Callback = Box<dyn FnOnce(Option<&JobError>) + Send>;

/// A single registered listener (or, if `child` is `Some`, a child handle).
pub struct ListenerNode {
    pub(crate) on_cancelling: bool,
    pub(crate) is_child: bool,
    pub(crate) child: Option<Arc<Job>>,
    disposed: AtomicBool,
    callback: Mutex<Option<Callback>>,
}

impl ListenerNode {
    pub(crate) fn new_handler(on_cancelling: bool, callback: Callback) -> Arc<Self> {
        Arc::new(Self {
            on_cancelling,
            is_child: false,
            child: None,
            disposed: AtomicBool::new(false),
            callback: Mutex::new(Some(callback)),
        })
    }

    pub(crate) fn new_child(child: Arc<Job>) -> Arc<Self> {
        Arc::new(Self {
            on_cancelling: true,
            is_child: true,
            child: Some(child),
            disposed: AtomicBool::new(false),
            callback: Mutex::new(None),
        })
    }

    /// Attach the callback a child-handle node invokes on cancellation.
    /// Children are invoked by the parent calling
    /// [`crate::job::Job::child_cancelled`] directly on `self.child`, so
    /// this is only used by plain handler nodes.
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Unlink the node. Idempotent; invoking after disposal is a no-op, and
    /// disposing an already-invoked node is a no-op too (the callback slot
    /// is already empty).
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        if let Ok(mut guard) = self.callback.lock() {
            *guard = None;
        }
    }

    /// Pull the callback back out of a freshly-built node that lost the
    /// race to be published anywhere (CAS or list-append failure). Only
    /// ever called while the node is still solely owned by the retry loop
    /// that built it.
    pub(crate) fn take_callback(&self) -> Callback {
        self.callback
            .lock()
            .expect("listener node mutex poisoned")
            .take()
            .expect("callback already taken on a node that was never published")
    }

    /// Invoke the listener's callback at most once. Returns `true` if
    /// this call actually performed the invocation.
    pub(crate) fn invoke(&self, cause: Option<&JobError>) -> bool {
        if self.is_child {
            // Children are notified through `Job::child_cancelled`, not a
            // stored closure; this path fires only for plain handlers.
            return false;
        }
        let cb = match self.callback.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        match cb {
            Some(f) => {
                f(cause);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ListenerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerNode")
            .field("on_cancelling", &self.on_cancelling)
            .field("is_child", &self.is_child)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A disposable handle returned to callers of `invoke_on_completion` /
/// `attach_child`.
pub struct Disposable {
    node: Option<Arc<ListenerNode>>,
}

impl Disposable {
    pub(crate) fn from_node(node: Arc<ListenerNode>) -> Self {
        Self { node: Some(node) }
    }

    /// The non-disposable sentinel returned when a listener fired
    /// immediately (already-terminal job) rather than being registered.
    pub(crate) fn sentinel() -> Self {
        Self { node: None }
    }

    pub fn dispose(&self) {
        if let Some(node) = &self.node {
            node.dispose();
        }
    }
}

/// The listener list proper.
pub struct ListenerList {
    bits: AtomicU8,
    nodes: Mutex<Vec<Arc<ListenerNode>>>,
}

impl ListenerList {
    pub fn new_empty() -> Arc<Self> {
        Arc::new(Self {
            bits: AtomicU8::new(0),
            nodes: Mutex::new(Vec::new()),
        })
    }

    /// Promote a lone `SingleListener` node into a list. The node itself is
    /// never cloned or re-created, only moved into a freshly allocated
    /// list, so its identity (and any outstanding `Disposable` for it)
    /// stays valid across the promotion.
    pub fn promote_single(node: Arc<ListenerNode>) -> Arc<Self> {
        Arc::new(Self {
            bits: AtomicU8::new(0),
            nodes: Mutex::new(vec![node]),
        })
    }

    pub fn bits(&self) -> u8 {
        self.bits.load(Ordering::Acquire)
    }

    /// Set a phase-closure bit. Serialized against `append` so that no
    /// append can sneak past the exact instant the bit is set.
    pub fn close(&self, bit: u8) {
        let _guard = self.nodes.lock().expect("listener list mutex poisoned");
        self.bits.fetch_or(bit, Ordering::AcqRel);
    }

    /// Append `node` if none of `required_clear` bits are currently set.
    /// Returns `false` (without appending) if the list has already closed
    /// for one of those phases.
    pub fn append(&self, node: Arc<ListenerNode>, required_clear: u8) -> bool {
        let mut guard = self.nodes.lock().expect("listener list mutex poisoned");
        if self.bits.load(Ordering::Acquire) & required_clear != 0 {
            return false;
        }
        compact(&mut guard);
        guard.push(node);
        true
    }

    /// A point-in-time, order-preserving snapshot of live (non-disposed)
    /// nodes. Safe to iterate and invoke without holding the list lock.
    pub fn snapshot(&self) -> Vec<Arc<ListenerNode>> {
        let guard = self.nodes.lock().expect("listener list mutex poisoned");
        guard.iter().filter(|n| !n.is_disposed()).cloned().collect()
    }

    /// Live child nodes only, in registration order.
    pub fn child_nodes(&self) -> Vec<Arc<ListenerNode>> {
        let guard = self.nodes.lock().expect("listener list mutex poisoned");
        guard
            .iter()
            .filter(|n| n.is_child && !n.is_disposed())
            .cloned()
            .collect()
    }

    pub fn is_empty_of_live_nodes(&self) -> bool {
        let guard = self.nodes.lock().expect("listener list mutex poisoned");
        guard.iter().all(|n| n.is_disposed())
    }
}

/// Drop disposed tombstones from the tail end inward. Called opportunistically
/// from `append` under the lock so the vector doesn't grow unboundedly across
/// a long-lived job with many short-lived listeners.
fn compact(nodes: &mut Vec<Arc<ListenerNode>>) {
    nodes.retain(|n| !n.is_disposed());
}
