//! Call-chain-local ambient state.
//!
//! Each inbound request runs inside its own [`RequestContext`], installed as a
//! `tokio::task_local!`. The context carries the correlation id, the resolved
//! caller id and the stack of log scopes. Concurrent requests never observe
//! each other's values.
//!
//! Outside any request context nothing is stored: each access sees a fresh,
//! empty context. Entry points that log several related events (repository
//! operations, unit-of-work commits, timed operations) install their own
//! context through [`RequestContext::ensure`] when none is active.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::error::LoggingError;
use crate::observability::Properties;

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Scope ids are unique process-wide so a guard can never release a frame of
/// another context by accident.
static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Ambient state for one logical request.
#[derive(Debug, Default)]
pub struct RequestContext {
    correlation_id: RefCell<Option<String>>,
    caller_id: Cell<Option<Uuid>>,
    scopes: RefCell<ScopeStack>,
}

impl RequestContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with a pre-resolved correlation id.
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        let ctx = Self::new();
        ctx.correlation_id.replace(Some(correlation_id.into()));
        ctx
    }

    /// Attach the authenticated caller.
    pub fn with_caller_id(self, caller_id: Uuid) -> Self {
        self.caller_id.set(Some(caller_id));
        self
    }

    /// Snapshot the current context for a spawned child task.
    ///
    /// The child sees the parent's correlation id, caller and scope properties
    /// but owns its own copy; scopes opened by either side stay local.
    pub fn inherit() -> Self {
        with_current(|ctx| Self {
            correlation_id: RefCell::new(ctx.correlation_id.borrow().clone()),
            caller_id: Cell::new(ctx.caller_id.get()),
            scopes: RefCell::new(ctx.scopes.borrow().clone()),
        })
    }

    /// Run `future` with this context installed.
    pub async fn run<F: Future>(self, future: F) -> F::Output {
        CURRENT.scope(self, future).await
    }

    /// Run a synchronous closure with this context installed.
    pub fn run_sync<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self, f)
    }

    /// Run `future` inside the active context, or inside a fresh one when
    /// the caller is detached.
    pub async fn ensure<F: Future>(future: F) -> F::Output {
        if Self::is_active() {
            future.await
        } else {
            Self::new().run(future).await
        }
    }

    /// Synchronous counterpart of [`RequestContext::ensure`].
    pub fn ensure_sync<R>(f: impl FnOnce() -> R) -> R {
        if Self::is_active() {
            f()
        } else {
            Self::new().run_sync(f)
        }
    }

    /// Whether the caller is inside a request context.
    pub fn is_active() -> bool {
        CURRENT.try_with(|_| ()).is_ok()
    }

    pub(crate) fn correlation_id(&self) -> Option<String> {
        self.correlation_id.borrow().clone()
    }

    pub(crate) fn correlation_id_or_insert_with(&self, make: impl FnOnce() -> String) -> String {
        self.correlation_id.borrow_mut().get_or_insert_with(make).clone()
    }

    pub(crate) fn set_correlation_id(&self, correlation_id: String) {
        self.correlation_id.replace(Some(correlation_id));
    }

    pub(crate) fn caller_id(&self) -> Option<Uuid> {
        self.caller_id.get()
    }

    pub(crate) fn push_scope(&self, properties: Properties) -> u64 {
        self.scopes.borrow_mut().push(properties)
    }

    pub(crate) fn release_scope(&self, id: u64) -> Result<(), LoggingError> {
        self.scopes.borrow_mut().release(id)
    }

    pub(crate) fn scope_properties(&self) -> Properties {
        self.scopes.borrow().merged()
    }

    pub(crate) fn scope_depth(&self) -> usize {
        self.scopes.borrow().frames.len()
    }
}

/// Run `f` against the active request context.
///
/// Detached callers get a throwaway context, so writes made through it are
/// never seen by anyone else.
pub(crate) fn with_current<R>(f: impl FnOnce(&RequestContext) -> R) -> R {
    match CURRENT.try_with(|_| ()) {
        Ok(()) => CURRENT.with(f),
        Err(_) => f(&RequestContext::new()),
    }
}

#[derive(Debug, Clone)]
struct ScopeFrame {
    id: u64,
    properties: Properties,
    released: bool,
}

/// LIFO stack of scope frames.
///
/// Invariant: the top frame is never marked released. A frame released while
/// frames above it are live stays on the stack (its properties remain visible)
/// and is popped as soon as it becomes the top.
#[derive(Debug, Clone, Default)]
struct ScopeStack {
    frames: Vec<ScopeFrame>,
}

impl ScopeStack {
    fn push(&mut self, properties: Properties) -> u64 {
        let id = NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed);
        self.frames.push(ScopeFrame {
            id,
            properties,
            released: false,
        });
        id
    }

    fn release(&mut self, id: u64) -> Result<(), LoggingError> {
        let Some(depth) = self.frames.iter().position(|frame| frame.id == id) else {
            // Frame belongs to another context or was already popped.
            return Ok(());
        };

        if depth + 1 == self.frames.len() {
            self.frames.pop();
            while self.frames.last().is_some_and(|frame| frame.released) {
                self.frames.pop();
            }
            return Ok(());
        }

        self.frames[depth].released = true;
        Err(LoggingError::ScopeOutOfOrder {
            depth,
            open_inner: self.frames[depth + 1..]
                .iter()
                .filter(|frame| !frame.released)
                .count(),
        })
    }

    fn merged(&self) -> Properties {
        let mut merged = Properties::new();
        for frame in &self.frames {
            merged.extend(frame.properties.clone());
        }
        merged
    }
}
