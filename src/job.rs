//! The job state machine: one atomic cell (`ArcSwap<State>`) per job, a
//! parent handle, and a vtable of hooks.
//!
//! All mutation goes through `ArcSwap::compare_and_swap` on `state` — never
//! a write lock, never in place. Each operation loads the current `Arc<State>`,
//! decides the next one, and races a CAS against any other thread doing the
//! same; on loss, it reloads and retries. The mutable bits that *can't* fit
//! in a single pointer swap (the set of accumulated exceptions while
//! cancelling, the completing/finalizing claims) live in
//! [`crate::finishing::FinishingRecord`], reached only through the
//! `Finishing` variant, so the state cell itself never holds more than one
//! pointer's worth of mutable data.

use crate::config::JobConfig;
use crate::error::{JobError, JobErrorKind};
use crate::finishing::FinishingRecord;
use crate::hooks::{JobHooks, PlainHooks};
use crate::id::JobId;
use crate::listener::{phase, Callback, Disposable, ListenerList, ListenerNode};
use crate::supervisor::SupervisorHooks;

use arc_swap::ArcSwap;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::config::ListenerPanicPolicy;

/// The one value the state cell ever holds.
enum State {
    EmptyNew,
    EmptyActive,
    SingleListener(Arc<ListenerNode>),
    ListActive(Arc<ListenerList>),
    ListInactive(Arc<ListenerList>),
    Finishing(Arc<FinishingRecord>),
    CompletedNormally,
    CompletedExceptionally { cause: JobError, handled: bool },
}

impl State {
    fn is_active(&self) -> bool {
        matches!(
            self,
            State::EmptyActive | State::SingleListener(_) | State::ListActive(_)
        )
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::CompletedNormally | State::CompletedExceptionally { .. }
        )
    }
}

/// What a job keeps to detach itself from its parent's wait set.
struct ParentHandle {
    parent: Arc<Job>,
    node_in_parent: Arc<ListenerNode>,
}

/// A cancelable, observable unit of work in a parent/child tree.
///
/// `Job` carries no value of its own; [`crate::deferred::Deferred`] layers a
/// typed result on top for callers that need one.
pub struct Job {
    id: JobId,
    state: ArcSwap<State>,
    parent_handle: Mutex<Option<ParentHandle>>,
    hooks: Arc<dyn JobHooks>,
    config: JobConfig,
    self_weak: Weak<Job>,
    cancelling_hook_fired: AtomicBool,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("is_active", &self.is_active())
            .field("is_completed", &self.is_completed())
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Job {
    /// A root job with no parent and the default hooks.
    pub fn root() -> Arc<Job> {
        Self::with_config(None, Arc::new(PlainHooks), JobConfig::default())
    }

    /// A job attached under `parent`, inheriting none of its hooks.
    pub fn child_of(parent: &Arc<Job>) -> Arc<Job> {
        Self::with_config(Some(parent.clone()), Arc::new(PlainHooks), JobConfig::default())
    }

    /// A root job whose `child_cancelled` swallows child failures.
    pub fn supervisor() -> Arc<Job> {
        Self::with_config(None, Arc::new(SupervisorHooks), JobConfig::default())
    }

    /// A supervisor attached under `parent`.
    pub fn supervisor_child_of(parent: &Arc<Job>) -> Arc<Job> {
        Self::with_config(
            Some(parent.clone()),
            Arc::new(SupervisorHooks),
            JobConfig::default(),
        )
    }

    /// Build a job with a caller-supplied hook vtable (plain, supervisor,
    /// or a custom `JobHooks` implementation such as a deferred's).
    pub fn with_hooks(parent: Option<Arc<Job>>, hooks: Arc<dyn JobHooks>) -> Arc<Job> {
        Self::with_config(parent, hooks, JobConfig::default())
    }

    pub fn with_config(
        parent: Option<Arc<Job>>,
        hooks: Arc<dyn JobHooks>,
        config: JobConfig,
    ) -> Arc<Job> {
        let job = Arc::new_cyclic(|weak| Job {
            id: JobId::next(),
            state: ArcSwap::new(Arc::new(State::EmptyNew)),
            parent_handle: Mutex::new(None),
            hooks,
            config,
            self_weak: weak.clone(),
            cancelling_hook_fired: AtomicBool::new(false),
        });
        if let Some(parent) = parent {
            let node = parent.attach_child(job.clone());
            *job.parent_handle.lock().expect("parent handle mutex poisoned") =
                Some(ParentHandle {
                    parent,
                    node_in_parent: node,
                });
        }
        tracing::trace!(job = %job.id, "job created");
        job
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    fn arc_self(&self) -> Arc<Job> {
        self.self_weak
            .upgrade()
            .expect("job invoked its own arc_self after being dropped")
    }

    fn cas(&self, old: &Arc<State>, new: Arc<State>) -> bool {
        let prev = self.state.compare_and_swap(old, new);
        Arc::ptr_eq(&*prev, old)
    }

    fn backoff(&self, spins: &mut u32) {
        *spins += 1;
        if *spins > self.config.cas_spin_limit {
            std::thread::yield_now();
            *spins = 0;
        } else {
            std::hint::spin_loop();
        }
    }

    // ---- queries ---------------------------------------------------

    pub fn is_active(&self) -> bool {
        self.state.load().is_active()
    }

    pub fn is_completed(&self) -> bool {
        self.state.load().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        match &**self.state.load() {
            State::CompletedExceptionally { .. } => true,
            State::Finishing(rec) => rec.is_cancelling(),
            _ => false,
        }
    }

    /// The cause driving cancellation, whether the job is still cancelling
    /// or already terminal. `None` for an active or successfully-completed
    /// job.
    pub fn cancellation_cause(&self) -> Option<JobError> {
        match &**self.state.load() {
            State::CompletedExceptionally { cause, .. } => Some(cause.clone()),
            State::Finishing(rec) => rec.root_cause(),
            _ => None,
        }
    }

    /// The terminal cause, or `None` for a job that is either not terminal
    /// yet or completed normally.
    pub fn completion_cause(&self) -> Option<JobError> {
        match &**self.state.load() {
            State::CompletedExceptionally { cause, .. } => Some(cause.clone()),
            _ => None,
        }
    }

    /// `Ok(())` while active; otherwise the cancellation cause (synthesizing
    /// one if the job was never cancelled but also never started/completed).
    pub fn ensure_active(&self) -> Result<(), JobError> {
        if self.is_active() {
            return Ok(());
        }
        Err(self
            .cancellation_cause()
            .unwrap_or_else(|| JobError::cancelled("job is not active")))
    }

    /// Live (not-yet-terminal) children, in registration order.
    pub fn children(&self) -> Vec<Arc<Job>> {
        match &**self.state.load() {
            State::ListActive(list) | State::ListInactive(list) => list
                .child_nodes()
                .into_iter()
                .filter_map(|n| n.child.clone())
                .collect(),
            State::Finishing(rec) => rec
                .list
                .child_nodes()
                .into_iter()
                .filter_map(|n| n.child.clone())
                .collect(),
            State::SingleListener(node) if node.is_child => node.child.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    // ---- start -------------------------------------------------------

    /// Empty/inactive → active. Returns `false` without side effects if the
    /// job is already active, finishing, or terminal.
    pub fn start(&self) -> bool {
        let mut spins = 0u32;
        loop {
            let cur = self.state.load_full();
            let next = match &*cur {
                State::EmptyNew => State::EmptyActive,
                State::ListInactive(list) => State::ListActive(list.clone()),
                _ => return false,
            };
            if self.cas(&cur, Arc::new(next)) {
                self.hooks.on_start();
                tracing::trace!(job = %self.id, "job started");
                return true;
            }
            self.backoff(&mut spins);
        }
    }

    // ---- invoke_on_completion -----------------------------------------

    /// Register a completion or cancellation listener. `on_cancelling`
    /// selects the phase; `invoke_immediately` controls whether an
    /// already-decided job fires the handler synchronously rather than
    /// dropping it. Returns a disposable handle (disposing a handler that
    /// has already fired, or the non-disposable sentinel for an immediate
    /// firing, is a harmless no-op).
    pub fn invoke_on_completion<F>(
        &self,
        on_cancelling: bool,
        invoke_immediately: bool,
        handler: F,
    ) -> Disposable
    where
        F: FnOnce(Option<&JobError>) + Send + 'static,
    {
        self.invoke_on_completion_boxed(on_cancelling, invoke_immediately, Box::new(handler))
    }

    fn invoke_on_completion_boxed(
        &self,
        on_cancelling: bool,
        invoke_immediately: bool,
        callback: Callback,
    ) -> Disposable {
        let required = if on_cancelling {
            phase::CANCELLATION | phase::COMPLETION
        } else {
            phase::COMPLETION
        };
        let mut callback = Some(callback);
        let mut spins = 0u32;
        loop {
            let cur = self.state.load_full();
            match &*cur {
                State::EmptyNew => {
                    let list = ListenerList::new_empty();
                    self.cas(&cur, Arc::new(State::ListInactive(list)));
                    self.backoff(&mut spins);
                }
                State::ListInactive(list) => {
                    let node = ListenerNode::new_handler(on_cancelling, callback.take().unwrap());
                    if list.append(node.clone(), required) {
                        return Disposable::from_node(node);
                    }
                    callback = Some(node.take_callback());
                    self.backoff(&mut spins);
                }
                State::EmptyActive => {
                    let node = ListenerNode::new_handler(on_cancelling, callback.take().unwrap());
                    if self.cas(&cur, Arc::new(State::SingleListener(node.clone()))) {
                        return Disposable::from_node(node);
                    }
                    callback = Some(node.take_callback());
                    self.backoff(&mut spins);
                }
                State::SingleListener(existing) => {
                    let list = ListenerList::promote_single(existing.clone());
                    self.cas(&cur, Arc::new(State::ListActive(list)));
                    self.backoff(&mut spins);
                }
                State::ListActive(list) => {
                    let node = ListenerNode::new_handler(on_cancelling, callback.take().unwrap());
                    if list.append(node.clone(), required) {
                        return Disposable::from_node(node);
                    }
                    callback = Some(node.take_callback());
                    self.backoff(&mut spins);
                }
                State::Finishing(rec) => {
                    if on_cancelling {
                        if let Some(cause) = rec.root_cause() {
                            let cb = callback.take().unwrap();
                            if invoke_immediately {
                                cb(Some(&cause));
                            }
                            return Disposable::sentinel();
                        }
                    }
                    let node = ListenerNode::new_handler(on_cancelling, callback.take().unwrap());
                    if rec.list.append(node.clone(), required) {
                        return Disposable::from_node(node);
                    }
                    let cb = node.take_callback();
                    if invoke_immediately {
                        cb(rec.root_cause().as_ref());
                    }
                    return Disposable::sentinel();
                }
                State::CompletedNormally => {
                    let cb = callback.take().unwrap();
                    if invoke_immediately {
                        cb(None);
                    }
                    return Disposable::sentinel();
                }
                State::CompletedExceptionally { cause, .. } => {
                    let cb = callback.take().unwrap();
                    if invoke_immediately {
                        cb(Some(cause));
                    }
                    return Disposable::sentinel();
                }
            }
        }
    }

    // ---- attach_child --------------------------------------------------

    /// Register `child` in this job's wait set. If this job is already
    /// cancelling or terminal, the child is still wired in (so a normal
    /// completion still waits for it) or, failing that, notified
    /// immediately with the current cause — a child can never attach to a
    /// parent without learning its fate.
    fn attach_child(&self, child: Arc<Job>) -> Arc<ListenerNode> {
        let mut spins = 0u32;
        loop {
            let cur = self.state.load_full();
            match &*cur {
                State::EmptyNew => {
                    self.cas(&cur, Arc::new(State::ListInactive(ListenerList::new_empty())));
                }
                State::EmptyActive => {
                    self.cas(&cur, Arc::new(State::ListActive(ListenerList::new_empty())));
                }
                State::SingleListener(existing) => {
                    let list = ListenerList::promote_single(existing.clone());
                    self.cas(&cur, Arc::new(State::ListActive(list)));
                }
                State::ListActive(list) | State::ListInactive(list) => {
                    let node = ListenerNode::new_child(child.clone());
                    if list.append(node.clone(), phase::COMPLETION | phase::CHILDREN | phase::CANCELLATION) {
                        return node;
                    }
                    if list.append(node.clone(), phase::COMPLETION | phase::CHILDREN) {
                        if let Some(cause) = self.cancellation_cause() {
                            child.parent_cancelled(&cause);
                        }
                        return node;
                    }
                    let cause = self
                        .cancellation_cause()
                        .unwrap_or_else(|| JobError::cancelled(self.config.default_cancel_message.clone()));
                    child.parent_cancelled(&cause);
                    return node;
                }
                State::Finishing(rec) => {
                    let node = ListenerNode::new_child(child.clone());
                    if rec
                        .list
                        .append(node.clone(), phase::COMPLETION | phase::CHILDREN | phase::CANCELLATION)
                    {
                        return node;
                    }
                    if rec.list.append(node.clone(), phase::COMPLETION | phase::CHILDREN) {
                        if let Some(cause) = rec.root_cause() {
                            child.parent_cancelled(&cause);
                        }
                        return node;
                    }
                    let cause = rec
                        .root_cause()
                        .unwrap_or_else(|| JobError::cancelled(self.config.default_cancel_message.clone()));
                    child.parent_cancelled(&cause);
                    return node;
                }
                State::CompletedNormally => {
                    let node = ListenerNode::new_child(child.clone());
                    child.parent_cancelled(&JobError::cancelled("parent job is already complete"));
                    return node;
                }
                State::CompletedExceptionally { cause, .. } => {
                    let node = ListenerNode::new_child(child.clone());
                    child.parent_cancelled(cause);
                    return node;
                }
            }
            self.backoff(&mut spins);
        }
    }

    // ---- cancel ---------------------------------------------------------

    pub fn cancel(&self, cause: Option<JobError>) -> bool {
        let cause =
            cause.unwrap_or_else(|| JobError::cancelled(self.config.default_cancel_message.clone()));
        self.cancel_impl(cause)
    }

    fn cancel_impl(&self, cause: JobError) -> bool {
        let mut spins = 0u32;
        loop {
            let cur = self.state.load_full();
            match &*cur {
                State::CompletedNormally | State::CompletedExceptionally { .. } => return false,
                State::Finishing(rec) => {
                    return match rec.add_exception(cause.clone()) {
                        Err(()) => false,
                        Ok(became_cancelling) => {
                            if became_cancelling {
                                self.run_cancelling_notifications(rec.clone(), &cause);
                            }
                            true
                        }
                    };
                }
                State::EmptyNew | State::ListInactive(_) => {
                    self.fire_on_cancelling(Some(&cause));
                    let handled_by_parent = self.cancel_parent(&cause);
                    let handled = handled_by_parent || self.hooks.handle_job_exception(&cause);
                    if !handled && !cause.is_cancellation() {
                        tracing::warn!(job = %self.id, cause = %cause, "unhandled job exception");
                    }
                    self.hooks.on_completion_internal(Some(&cause));
                    let final_state = Arc::new(State::CompletedExceptionally {
                        cause: cause.clone(),
                        handled,
                    });
                    if !self.cas(&cur, final_state) {
                        self.backoff(&mut spins);
                        continue;
                    }
                    if let Some(ph) = self
                        .parent_handle
                        .lock()
                        .expect("parent handle mutex poisoned")
                        .take()
                    {
                        ph.node_in_parent.dispose();
                    }
                    let nodes = match &*cur {
                        State::ListInactive(list) => {
                            list.close(phase::CANCELLATION);
                            list.close(phase::COMPLETION);
                            list.snapshot()
                        }
                        _ => Vec::new(),
                    };
                    // This job never ran a cancelling phase (it was never
                    // started), so any attached children never learned
                    // their parent was cancelled. Tell them now, before the
                    // terminal-phase sweep, the same way
                    // `run_cancelling_notifications` would have.
                    for node in &nodes {
                        if node.is_child {
                            self.invoke_listener_node(node, Some(&cause));
                        }
                    }
                    self.notify_terminal_phase(nodes, Some(&cause));
                    return true;
                }
                State::EmptyActive | State::SingleListener(_) | State::ListActive(_) => {
                    if self.hooks.on_cancel_complete() {
                        return self.make_completing(Some(cause));
                    }
                    let list = match &*cur {
                        State::EmptyActive => ListenerList::new_empty(),
                        State::SingleListener(node) => ListenerList::promote_single(node.clone()),
                        State::ListActive(l) => l.clone(),
                        _ => unreachable!(),
                    };
                    let rec = Arc::new(FinishingRecord::new(list, Some(cause.clone())));
                    let new_state = Arc::new(State::Finishing(rec.clone()));
                    if !self.cas(&cur, new_state) {
                        self.backoff(&mut spins);
                        continue;
                    }
                    self.run_cancelling_notifications(rec, &cause);
                    return true;
                }
            }
        }
    }

    /// Called by a parent's cancelling-phase traversal to propagate
    /// cancellation downward into this child.
    fn parent_cancelled(&self, cause: &JobError) {
        self.cancel_impl(cause.clone());
    }

    /// Called by a child when it finishes with a non-cancellation cause, to
    /// ask this (parent) job to take responsibility for it.
    fn child_cancelled(&self, cause: &JobError) -> bool {
        if cause.is_cancellation() {
            return true;
        }
        if self.hooks.is_supervisor() {
            return false;
        }
        self.cancel_impl(cause.clone());
        self.cancel_parent(cause)
    }

    /// Offer `cause` up to this job's own parent. Returns whether it was
    /// accepted as "handled" — a plain cancellation always counts as
    /// accepted even with no parent.
    fn cancel_parent(&self, cause: &JobError) -> bool {
        if self.hooks.is_scoped_coroutine() {
            return true;
        }
        let guard = self
            .parent_handle
            .lock()
            .expect("parent handle mutex poisoned");
        match guard.as_ref() {
            None => cause.is_cancellation(),
            Some(ph) => {
                let handled_by_parent = ph.parent.child_cancelled(cause);
                handled_by_parent || cause.is_cancellation()
            }
        }
    }

    fn fire_on_cancelling(&self, cause: Option<&JobError>) {
        if self
            .cancelling_hook_fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.hooks.on_cancelling(cause);
        }
    }

    fn run_cancelling_notifications(&self, rec: Arc<FinishingRecord>, cause: &JobError) {
        self.fire_on_cancelling(Some(cause));
        rec.list.close(phase::CANCELLATION);
        for node in rec.list.snapshot() {
            if node.on_cancelling {
                self.invoke_listener_node(&node, Some(cause));
            }
        }
        self.cancel_parent(cause);
    }

    fn invoke_listener_node(&self, node: &Arc<ListenerNode>, cause: Option<&JobError>) {
        if node.is_child {
            if let Some(child) = &node.child {
                let c = cause
                    .cloned()
                    .unwrap_or_else(|| JobError::cancelled(self.config.default_cancel_message.clone()));
                child.parent_cancelled(&c);
            }
            return;
        }
        let result = catch_unwind(AssertUnwindSafe(|| {
            node.invoke(cause);
        }));
        if let Err(payload) = result {
            let message = panic_message(payload);
            let exception =
                crate::error::CompletionHandlerException::new(JobError::failure(message));
            match self.config.listener_panic_policy {
                ListenerPanicPolicy::Capture => {
                    tracing::warn!(job = %self.id, %exception, "listener panicked");
                    self.hooks.handle_on_completion_exception(&exception);
                }
                ListenerPanicPolicy::Propagate => resume_unwind(Box::new(exception)),
            }
        }
    }

    fn notify_terminal_phase(&self, nodes: Vec<Arc<ListenerNode>>, cause: Option<&JobError>) {
        for node in nodes {
            if node.is_child {
                continue;
            }
            self.invoke_listener_node(&node, cause);
        }
    }

    // ---- complete / completeExceptionally -------------------------------

    pub fn complete(&self) -> bool {
        self.make_completing(None)
    }

    pub fn complete_exceptionally(&self, cause: JobError) -> bool {
        self.make_completing(Some(cause))
    }

    fn make_completing(&self, proposed: Option<JobError>) -> bool {
        let mut spins = 0u32;
        loop {
            let cur = self.state.load_full();

            if proposed.is_none() {
                let fast_path = match &*cur {
                    State::EmptyActive => true,
                    State::SingleListener(node) => !node.is_child,
                    _ => false,
                };
                if fast_path {
                    if self.try_fast_path_complete(&cur) {
                        return true;
                    }
                    self.backoff(&mut spins);
                    continue;
                }
            }

            match &*cur {
                State::CompletedNormally | State::CompletedExceptionally { .. } => return false,
                State::Finishing(rec) => {
                    if !rec.try_start_completing() {
                        return false;
                    }
                    self.drive_completing(cur.clone(), rec.clone(), proposed);
                    return true;
                }
                State::EmptyNew | State::ListInactive(_) => {
                    let list = match &*cur {
                        State::ListInactive(l) => l.clone(),
                        _ => ListenerList::new_empty(),
                    };
                    let rec = Arc::new(FinishingRecord::new(list, None));
                    let new_state = Arc::new(State::Finishing(rec.clone()));
                    if !self.cas(&cur, new_state.clone()) {
                        self.backoff(&mut spins);
                        continue;
                    }
                    rec.try_start_completing();
                    self.drive_completing(new_state, rec, proposed);
                    return true;
                }
                State::EmptyActive | State::SingleListener(_) | State::ListActive(_) => {
                    let list = match &*cur {
                        State::EmptyActive => ListenerList::new_empty(),
                        State::SingleListener(node) => ListenerList::promote_single(node.clone()),
                        State::ListActive(l) => l.clone(),
                        _ => unreachable!(),
                    };
                    let rec = Arc::new(FinishingRecord::new(list, None));
                    let new_state = Arc::new(State::Finishing(rec.clone()));
                    if !self.cas(&cur, new_state.clone()) {
                        self.backoff(&mut spins);
                        continue;
                    }
                    rec.try_start_completing();
                    self.drive_completing(new_state, rec, proposed);
                    return true;
                }
            }
        }
    }

    fn try_fast_path_complete(&self, cur: &Arc<State>) -> bool {
        let final_state = Arc::new(State::CompletedNormally);
        if !self.cas(cur, final_state) {
            return false;
        }
        self.fire_on_cancelling(None);
        self.hooks.on_completion_internal(None);
        if let Some(ph) = self
            .parent_handle
            .lock()
            .expect("parent handle mutex poisoned")
            .take()
        {
            ph.node_in_parent.dispose();
        }
        let nodes = match &**cur {
            State::SingleListener(node) => vec![node.clone()],
            _ => Vec::new(),
        };
        self.notify_terminal_phase(nodes, None);
        true
    }

    fn drive_completing(
        &self,
        finishing_state: Arc<State>,
        rec: Arc<FinishingRecord>,
        proposed: Option<JobError>,
    ) {
        if let Some(p) = &proposed {
            if let Ok(became_cancelling) = rec.add_exception(p.clone()) {
                if became_cancelling {
                    self.run_cancelling_notifications(rec.clone(), p);
                }
            }
        }
        self.await_children_then_finalize(finishing_state, rec, proposed);
    }

    fn await_children_then_finalize(
        &self,
        finishing_state: Arc<State>,
        rec: Arc<FinishingRecord>,
        proposed: Option<JobError>,
    ) {
        let incomplete = self.incomplete_children(&rec);
        if !incomplete.is_empty() {
            self.register_child_continuations(&incomplete, finishing_state, rec, proposed);
            return;
        }

        rec.list.close(phase::CHILDREN);

        // A child can slip in between the scan above and closing CHILDREN;
        // this re-check acknowledges that non-linearizable window rather
        // than pretending it can't happen.
        let late = self.incomplete_children(&rec);
        if !late.is_empty() {
            self.register_child_continuations(&late, finishing_state, rec, proposed);
            return;
        }

        if !rec.try_start_finalizing() {
            return;
        }
        self.finalize_finishing_state(finishing_state, rec, proposed);
    }

    fn incomplete_children(&self, rec: &Arc<FinishingRecord>) -> Vec<Arc<Job>> {
        rec.list
            .child_nodes()
            .into_iter()
            .filter_map(|n| n.child.clone())
            .filter(|c| !c.is_completed())
            .collect()
    }

    fn register_child_continuations(
        &self,
        children: &[Arc<Job>],
        finishing_state: Arc<State>,
        rec: Arc<FinishingRecord>,
        proposed: Option<JobError>,
    ) {
        for child in children {
            let parent = self.arc_self();
            let finishing_state = finishing_state.clone();
            let rec = rec.clone();
            let proposed = proposed.clone();
            child.invoke_on_completion_boxed(
                false,
                false,
                Box::new(move |_cause| {
                    parent.await_children_then_finalize(finishing_state, rec, proposed);
                }),
            );
        }
    }

    fn finalize_finishing_state(
        &self,
        finishing_state: Arc<State>,
        rec: Arc<FinishingRecord>,
        proposed: Option<JobError>,
    ) {
        let exceptions = rec.seal(proposed.as_ref());
        let final_exception = compute_final_exception(
            &self.config.default_cancel_message,
            exceptions,
            rec.is_cancelling(),
        );

        let mut handled = false;
        if let Some(fe) = &final_exception {
            let handled_by_parent = self.cancel_parent(fe);
            handled = handled_by_parent || self.hooks.handle_job_exception(fe);
            if !handled && !fe.is_cancellation() {
                tracing::warn!(job = %self.id, cause = %fe, "unhandled job exception");
            }
        }

        self.fire_on_cancelling(final_exception.as_ref());

        let final_state = match &final_exception {
            None => Arc::new(State::CompletedNormally),
            Some(fe) => Arc::new(State::CompletedExceptionally {
                cause: fe.clone(),
                handled,
            }),
        };

        self.hooks.on_completion_internal(final_exception.as_ref());

        let succeeded = self.cas(&finishing_state, final_state);
        debug_assert!(succeeded, "try_start_finalizing guarantees exclusivity");

        if let Some(ph) = self
            .parent_handle
            .lock()
            .expect("parent handle mutex poisoned")
            .take()
        {
            ph.node_in_parent.dispose();
        }

        rec.list.close(phase::COMPLETION);
        let nodes = rec.list.snapshot();
        self.notify_terminal_phase(nodes, final_exception.as_ref());
        tracing::trace!(job = %self.id, cancelled = final_exception.is_some(), "job finalized");
    }
}

/// Pick the root cause to report, given the accumulated exceptions and
/// whether the record ever entered the cancelling phase.
fn compute_final_exception(
    default_cancel_message: &str,
    exceptions: Vec<JobError>,
    is_cancelling: bool,
) -> Option<JobError> {
    if exceptions.is_empty() {
        if is_cancelling {
            return Some(JobError::cancelled(default_cancel_message.to_string()));
        }
        return None;
    }
    if let Some(failure) = exceptions.iter().find(|e| !e.is_cancellation()) {
        return Some(failure.clone());
    }
    let first = &exceptions[0];
    if first.kind() == JobErrorKind::Timeout {
        if let Some(other) = exceptions
            .iter()
            .skip(1)
            .find(|e| e.kind() == JobErrorKind::Timeout && !e.is_same_as(first))
        {
            return Some(other.clone());
        }
    }
    Some(first.clone())
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked with a non-string payload".to_string()
    }
}
