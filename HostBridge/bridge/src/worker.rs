//! Background tasks on worker threads.
//!
//! A `WorkerDispatcher` holds task factories by name. `spawn` attaches a new
//! handler to the worker thread running that task, starting the thread if
//! none is running, and returns a `TaskHandle` right away. The worker builds
//! the task from its factory, then dispatches every message to it; replies
//! go back on the handler's own channel. Only owned byte payloads cross.
//!
//! A worker thread retires when its last handler disconnects. The decision
//! is made under the dispatcher lock so a concurrent `spawn` either reaches
//! the old thread or starts a new one.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;

use keel_hostapi::{ErrorValue, HostError};
use keel_primitives::ErrorCode;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identifies one handler connected to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// What a handler receives from its worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Message(Vec<u8>),
    /// The task failed or panicked while handling a message.
    Error(ErrorValue),
}

/// A task living on a worker thread.
pub trait BackgroundTask {
    fn received(&mut self, scope: &WorkerScope, id: HandlerId, payload: Vec<u8>);

    fn connected(&mut self, _scope: &WorkerScope, _id: HandlerId) {}

    fn disconnected(&mut self, _scope: &WorkerScope, _id: HandlerId) {}
}

/// Builds a task on its worker thread.
pub type TaskFactory =
    Arc<dyn Fn() -> Result<Box<dyn BackgroundTask>, HostError> + Send + Sync>;

/// The worker side of every connected handler.
pub struct WorkerScope {
    name: String,
    handlers: HashMap<HandlerId, Sender<Envelope>>,
}

impl WorkerScope {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self, id: HandlerId) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Send a reply to one handler. Returns `false` if it is gone.
    pub fn respond(&self, id: HandlerId, payload: Vec<u8>) -> bool {
        self.send(id, Envelope::Message(payload))
    }

    pub fn respond_json<T: Serialize>(&self, id: HandlerId, message: &T) -> bool {
        match serde_json::to_vec(message) {
            Ok(payload) => self.respond(id, payload),
            Err(err) => {
                tracing::error!(worker = %self.name, "failed to encode response: {err}");
                false
            }
        }
    }

    pub fn respond_error(&self, id: HandlerId, error: ErrorValue) -> bool {
        self.send(id, Envelope::Error(error))
    }

    fn send(&self, id: HandlerId, envelope: Envelope) -> bool {
        match self.handlers.get(&id) {
            Some(tx) => tx.send(envelope).is_ok(),
            None => {
                tracing::trace!(worker = %self.name, ?id, "dropping response for unknown handler");
                false
            }
        }
    }
}

/// Resolves once the worker has installed a handler. Clones share the
/// outcome; a worker that dies first resolves it with `ChannelClosed`.
pub type Deferred = Shared<BoxFuture<'static, Result<(), HostError>>>;

fn deferred() -> (oneshot::Sender<Result<(), HostError>>, Deferred) {
    let (tx, rx) = oneshot::channel();
    let ready = rx
        .map(|outcome| outcome.unwrap_or(Err(HostError::ChannelClosed)))
        .boxed()
        .shared();
    (tx, ready)
}

enum Control {
    Connect {
        id: HandlerId,
        responder: Sender<Envelope>,
        ready: oneshot::Sender<Result<(), HostError>>,
    },
    Message {
        id: HandlerId,
        payload: Vec<u8>,
    },
    Disconnect {
        id: HandlerId,
    },
}

/// The caller side of one handler.
///
/// Dropping or closing the handle disconnects it; replies that arrive
/// afterwards are discarded by the worker.
pub struct TaskHandle {
    id: HandlerId,
    name: String,
    control: Sender<Control>,
    responses: Receiver<Envelope>,
    ready: Deferred,
    closed: bool,
}

impl TaskHandle {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ready(&self) -> Deferred {
        self.ready.clone()
    }

    /// Whether the worker has installed this handler, without waiting.
    pub fn is_ready(&self) -> bool {
        self.ready.clone().now_or_never().is_some()
    }

    pub fn send(&self, payload: Vec<u8>) -> Result<(), HostError> {
        if self.closed {
            return Err(HostError::ChannelClosed);
        }
        self.control
            .send(Control::Message {
                id: self.id,
                payload,
            })
            .map_err(|_| HostError::ChannelClosed)
    }

    pub fn send_json<T: Serialize>(&self, message: &T) -> Result<(), HostError> {
        let payload =
            serde_json::to_vec(message).map_err(|e| HostError::InvalidEncoding(e.to_string()))?;
        self.send(payload)
    }

    /// Next reply if one is queued.
    pub fn try_recv(&self) -> Result<Option<Envelope>, HostError> {
        match self.responses.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(HostError::ChannelClosed),
        }
    }

    /// Wait up to `timeout` for the next reply.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Envelope>, HostError> {
        match self.responses.recv_timeout(timeout) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(HostError::ChannelClosed),
        }
    }

    /// Wait for the next reply and decode it as JSON. Task errors come back
    /// as `HostError::Raised`.
    pub fn recv_json<T: DeserializeOwned>(&self, timeout: Duration) -> Result<Option<T>, HostError> {
        match self.recv_timeout(timeout)? {
            None => Ok(None),
            Some(Envelope::Message(payload)) => serde_json::from_slice(&payload)
                .map(Some)
                .map_err(|e| HostError::DeserializationFailure(e.to_string())),
            Some(Envelope::Error(err)) => Err(HostError::Raised(err)),
        }
    }

    pub fn close(mut self) {
        self.disconnect();
    }

    fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.control.send(Control::Disconnect { id: self.id });
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.closed)
            .finish()
    }
}

struct RunningWorker {
    generation: u64,
    control: Sender<Control>,
}

#[derive(Default)]
struct DispatcherInner {
    factories: HashMap<String, TaskFactory>,
    running: HashMap<String, RunningWorker>,
    next_handler: u64,
    next_generation: u64,
}

/// Registry of background tasks and their running workers. Clones share
/// the registry.
#[derive(Clone, Default)]
pub struct WorkerDispatcher {
    inner: Arc<Mutex<DispatcherInner>>,
}

impl WorkerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_task<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn BackgroundTask>, HostError> + Send + Sync + 'static,
    {
        lock(&self.inner)
            .factories
            .insert(name.into(), Arc::new(factory));
    }

    /// Number of worker threads currently serving handlers.
    pub fn running(&self) -> usize {
        lock(&self.inner).running.len()
    }

    /// Connect a new handler to the worker for `name`. Never blocks on the
    /// worker; await `TaskHandle::ready` to know the handler is installed.
    pub fn spawn(&self, name: &str) -> Result<TaskHandle, HostError> {
        let mut inner = lock(&self.inner);
        let factory = inner
            .factories
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::Unavailable(format!("no background task named '{name}'")))?;

        let id = HandlerId(inner.next_handler);
        inner.next_handler += 1;
        let (responder, responses) = mpsc::channel();
        let (ready_tx, ready) = deferred();
        let connect = Control::Connect {
            id,
            responder,
            ready: ready_tx,
        };

        let running = inner.running.get(name).map(|w| w.control.clone());
        let control = match running {
            Some(control) => match control.send(connect) {
                Ok(()) => control,
                Err(mpsc::SendError(connect)) => self.start(&mut inner, name, factory, connect)?,
            },
            None => self.start(&mut inner, name, factory, connect)?,
        };

        Ok(TaskHandle {
            id,
            name: name.to_owned(),
            control,
            responses,
            ready,
            closed: false,
        })
    }

    fn start(
        &self,
        inner: &mut DispatcherInner,
        name: &str,
        factory: TaskFactory,
        first: Control,
    ) -> Result<Sender<Control>, HostError> {
        let (control, inbox) = mpsc::channel();
        control.send(first).map_err(|_| HostError::ChannelClosed)?;

        let generation = inner.next_generation;
        inner.next_generation += 1;
        let shared = Arc::clone(&self.inner);
        let worker_name = name.to_owned();
        thread::Builder::new()
            .name(format!("worker-{name}"))
            .spawn(move || run_worker(shared, worker_name, generation, factory, inbox))
            .map_err(|e| HostError::Unavailable(format!("cannot start worker thread: {e}")))?;

        tracing::debug!(worker = name, generation, "started worker thread");
        inner.running.insert(
            name.to_owned(),
            RunningWorker {
                generation,
                control: control.clone(),
            },
        );
        Ok(control)
    }
}

impl fmt::Debug for WorkerDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("WorkerDispatcher")
            .field("tasks", &inner.factories.keys().collect::<Vec<_>>())
            .field("running", &inner.running.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "background task panicked".to_owned()
    }
}

fn build_task(factory: &TaskFactory) -> Result<Box<dyn BackgroundTask>, ErrorValue> {
    match catch_unwind(AssertUnwindSafe(|| factory())) {
        Ok(Ok(task)) => Ok(task),
        Ok(Err(err)) => Err(err.to_error_value()),
        Err(panic) => Err(ErrorValue::new(ErrorCode::Error, panic_message(panic))),
    }
}

fn run_worker(
    shared: Arc<Mutex<DispatcherInner>>,
    name: String,
    generation: u64,
    factory: TaskFactory,
    inbox: Receiver<Control>,
) {
    let mut scope = WorkerScope {
        name,
        handlers: HashMap::new(),
    };
    let mut task = build_task(&factory);
    if let Err(err) = &task {
        tracing::error!(worker = %scope.name, "failed to create background task: {err}");
    }

    let mut next = None;
    loop {
        let control = match next.take() {
            Some(control) => control,
            None => match inbox.recv() {
                Ok(control) => control,
                Err(_) => break,
            },
        };

        match (control, &mut task) {
            (Control::Connect { id, responder, ready }, Ok(task)) => {
                scope.handlers.insert(id, responder);
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| task.connected(&scope, id))) {
                    scope.respond_error(id, ErrorValue::new(ErrorCode::Error, panic_message(panic)));
                }
                let _ = ready.send(Ok(()));
            }
            (Control::Connect { responder, ready, .. }, Err(err)) => {
                let _ = responder.send(Envelope::Error(err.clone()));
                let _ = ready.send(Err(HostError::Raised(err.clone())));
            }
            (Control::Message { id, payload }, Ok(task)) => {
                if let Err(panic) =
                    catch_unwind(AssertUnwindSafe(|| task.received(&scope, id, payload)))
                {
                    let message = panic_message(panic);
                    tracing::error!(worker = %scope.name, ?id, "background task panicked: {message}");
                    scope.respond_error(id, ErrorValue::new(ErrorCode::Error, message));
                }
            }
            (Control::Message { .. }, Err(_)) => {}
            (Control::Disconnect { id }, Ok(task)) => {
                if scope.is_connected(id) {
                    let _ = catch_unwind(AssertUnwindSafe(|| task.disconnected(&scope, id)));
                    scope.handlers.remove(&id);
                }
            }
            (Control::Disconnect { .. }, Err(_)) => {}
        }

        if scope.handlers.is_empty() {
            let mut inner = lock(&shared);
            match inbox.try_recv() {
                Ok(control) => next = Some(control),
                Err(_) => {
                    if inner
                        .running
                        .get(&scope.name)
                        .is_some_and(|w| w.generation == generation)
                    {
                        inner.running.remove(&scope.name);
                    }
                    tracing::debug!(worker = %scope.name, generation, "worker thread retiring");
                    break;
                }
            }
        }
    }
}
