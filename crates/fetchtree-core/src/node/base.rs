use std::mem;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{Context, Lifecycle, Node, Shared};
use crate::data::{Properties, Resource};
use crate::error::{FetchError, Result};
use crate::listener::{Listener, ListenerId};

pub(crate) enum SizeState {
    Unknown,
    Known(u64),
    Unavailable,
}

type Entry = (ListenerId, Arc<dyn Listener>);

pub(crate) struct State {
    pub(crate) started:   bool,
    /// Listeners are being asked to accept a result; the outcome is undecided.
    completing:           bool,
    /// A cancel that arrived while `completing`; applied if the result is vetoed.
    pending_cancel:       Option<FetchError>,
    pub(crate) outcome:   Option<Result<Resource>>,
    pub(crate) listeners: Vec<Entry>,
    next_id:              u64,
}

/// State every node carries regardless of kind.
pub(crate) struct NodeBase {
    pub(crate) ctx:        Arc<Context>,
    pub(crate) parent:     Mutex<Option<Weak<Shared>>>,
    pub(crate) properties: Mutex<Properties>,
    pub(crate) size:       tokio::sync::Mutex<SizeState>,
    cancelled:             AtomicBool,
    pub(crate) state:      Mutex<State>,
}

impl NodeBase {
    pub(crate) fn new(ctx: Arc<Context>, properties: Properties) -> Self {
        Self {
            ctx,
            parent: Mutex::new(None),
            properties: Mutex::new(properties),
            size: tokio::sync::Mutex::new(SizeState::Unknown),
            cancelled: AtomicBool::new(false),
            state: Mutex::new(State {
                started:        false,
                completing:     false,
                pending_cancel: None,
                outcome:        None,
                listeners:      Vec::new(),
                next_id:        0,
            }),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::SeqCst) }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        let state = self.state.lock();
        match (state.started, state.outcome.is_some()) {
            (_, true) => Lifecycle::Terminal,
            (true, false) => Lifecycle::Active,
            (false, false) => Lifecycle::Unstarted,
        }
    }

    /// Flips the node to started. Returns `false` when there is nothing to run
    /// because the node was cancelled beforehand.
    pub(crate) fn mark_started(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if state.started {
            return Err(FetchError::AlreadyStarted);
        }
        state.started = true;
        Ok(state.outcome.is_none())
    }
}

fn guarded<T>(node: &Node, callback: &str, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            error!(node = %node.name(), callback, "Listener panicked");
            None
        }
    }
}

impl Node {
    /// Offers `resource` to every listener. Returns whether it was accepted.
    ///
    /// Acceptance makes the node terminal. On a veto the node stays open:
    /// listeners that already accepted are dropped (they have had their one
    /// terminal call) and the caller decides what failure to report.
    pub(crate) fn inform_complete(&self, resource: Resource) -> bool {
        let snapshot = {
            let mut state = self.base().state.lock();
            if state.outcome.is_some() || state.completing {
                return false;
            }
            state.completing = true;
            state.listeners.clone()
        };

        let mut accepted: Vec<ListenerId> = Vec::with_capacity(snapshot.len());
        for (id, listener) in &snapshot {
            let ok = guarded(self, "completed", || listener.completed(self, &resource))
                .unwrap_or(true);
            if !ok {
                warn!(node = %self.name(), depth = self.depth(), "Result rejected by listener");
                let pending = {
                    let mut state = self.base().state.lock();
                    state.completing = false;
                    state.listeners.retain(|(l, _)| !accepted.contains(l));
                    state.pending_cancel.take()
                };
                if let Some(error) = pending {
                    self.cancel_with(error);
                }
                return false;
            }
            accepted.push(*id);
        }

        let late: Vec<Entry> = {
            let mut state = self.base().state.lock();
            state.completing = false;
            state.pending_cancel = None;
            state.outcome = Some(Ok(resource.clone()));
            mem::take(&mut state.listeners)
                .into_iter()
                .filter(|(id, _)| !accepted.contains(id))
                .collect()
        };
        for (_, listener) in late {
            guarded(self, "completed", || listener.completed(self, &resource));
        }

        if self.parent().is_none() {
            info!(node = %self.name(), len = ?resource.len(), "Download complete");
        } else {
            debug!(node = %self.name(), depth = self.depth(), "Attempt complete");
        }
        true
    }

    /// Sets a terminal failure. The first terminal outcome wins.
    pub(crate) fn inform_failed(&self, error: FetchError) {
        let listeners = {
            let mut state = self.base().state.lock();
            if state.outcome.is_some() || state.completing {
                return;
            }
            state.outcome = Some(Err(error.clone()));
            mem::take(&mut state.listeners)
        };
        self.log_failure(&error);
        self.notify_failed(listeners, &error);
    }

    /// Offers `resource` and turns a veto into [`FetchError::Rejected`].
    pub(crate) fn deliver(&self, resource: Resource) {
        if !self.inform_complete(resource) {
            self.inform_failed(FetchError::Rejected);
        }
    }

    pub(crate) fn cancel_with(&self, error: FetchError) {
        if !self.kind().cancellable() {
            debug!(node = %self.name(), depth = self.depth(), "Cancel ignored");
            return;
        }
        let listeners = {
            let mut state = self.base().state.lock();
            if state.outcome.is_some() {
                return;
            }
            if state.completing {
                state.pending_cancel.get_or_insert(error);
                return;
            }
            self.base().cancelled.store(true, Ordering::SeqCst);
            state.outcome = Some(Err(error.clone()));
            mem::take(&mut state.listeners)
        };
        self.log_failure(&error);
        self.kind().interrupt();
        self.notify_failed(listeners, &error);
    }

    pub(crate) fn register_listener(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let (id, outcome) = {
            let mut state = self.base().state.lock();
            let id = ListenerId(state.next_id);
            state.next_id += 1;
            match state.outcome.clone() {
                None => {
                    state.listeners.push((id, listener));
                    return id;
                }
                Some(outcome) => (id, outcome),
            }
        };

        match outcome {
            Ok(resource) => {
                guarded(self, "completed", || listener.completed(self, &resource));
            }
            Err(error) => {
                guarded(self, "failed", || listener.failed(self, &error));
            }
        }
        id
    }

    pub(crate) fn report_activity(&self, activity: &str) {
        debug!(node = %self.name(), depth = self.depth(), activity);
        for (_, listener) in self.listeners() {
            guarded(self, "report_activity", || listener.report_activity(self, activity));
        }
    }

    pub(crate) fn report_percent_complete(&self, percent: u8) {
        for (_, listener) in self.listeners() {
            guarded(self, "report_percent_complete", || {
                listener.report_percent_complete(self, percent)
            });
        }
    }

    pub(crate) fn report_amount_complete(&self, bytes: u64) {
        for (_, listener) in self.listeners() {
            guarded(self, "report_amount_complete", || {
                listener.report_amount_complete(self, bytes)
            });
        }
    }

    fn listeners(&self) -> Vec<Entry> { self.base().state.lock().listeners.clone() }

    fn notify_failed(&self, listeners: Vec<Entry>, error: &FetchError) {
        for (_, listener) in listeners {
            guarded(self, "failed", || listener.failed(self, error));
        }
    }

    fn log_failure(&self, error: &FetchError) {
        if self.parent().is_none() {
            info!(node = %self.name(), error = %error, "Download failed");
        } else {
            debug!(node = %self.name(), depth = self.depth(), error = %error, "Attempt failed");
        }
    }
}
