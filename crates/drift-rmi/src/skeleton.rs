//! Server side of the RMI runtime.
//!
//! A [`Skeleton`] is a multithreaded TCP server bound to one remote
//! interface: a listener thread accepts connections and hands each one to
//! a worker thread, which reads a single request, dispatches it to the
//! server object through a [`Dispatch`] adapter, writes a single response
//! and closes the connection.

use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::RmiError;
use crate::iface::{InterfaceDesc, MethodSig};
use crate::wire::{read_frame, write_frame, Request, Response};

/// Result of invoking the server object: a return payload or a
/// user-declared error payload. Both are already encoded; see
/// [`crate::wire::encode_outcome`].
#[derive(Debug)]
pub enum Outcome {
    Return(Vec<u8>),
    Fault(Vec<u8>),
}

/// Bridge between the generic runtime and a typed server object.
///
/// Implementations decode the argument tuple, invoke the corresponding
/// method on the server object, and encode the result. The resolved
/// [`MethodSig`] is always one of `interface().methods`.
pub trait Dispatch: Send + Sync + 'static {
    fn interface(&self) -> &'static InterfaceDesc;
    fn dispatch(&self, method: &MethodSig, args: &[u8]) -> Result<Outcome, RmiError>;
}

/// Hooks observing the skeleton's listener and workers. All defaults are
/// no-ops except `listen_error`, which stops the listener.
pub trait SkeletonEvents: Send + Sync + 'static {
    /// Called on a top-level accept error. Return `true` to resume
    /// accepting connections, `false` to shut the skeleton down.
    fn listen_error(&self, _error: &RmiError) -> bool {
        false
    }

    /// Called when a worker hits a transport or dispatch failure.
    fn service_error(&self, _error: &RmiError) {}

    /// Called exactly once when the listener thread exits. `cause` is
    /// `None` when the skeleton stopped by request.
    fn stopped(&self, _cause: Option<&RmiError>) {}
}

struct NoEvents;

impl SkeletonEvents for NoEvents {}

/// Listener lifecycle. `stop` moves Started/Running to Interrupted; the
/// listener thread drains through Stopping to Stopped, from where `start`
/// may be called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    New,
    Started,
    Running,
    Interrupted,
    Stopping,
    Stopped,
}

struct LifecycleState {
    phase: Lifecycle,
    /// Fixed address if configured, later the resolved bound address.
    addr: Option<SocketAddr>,
}

struct Shared<D> {
    dispatch: D,
    events: Arc<dyn SkeletonEvents>,
    state: Mutex<LifecycleState>,
    state_cv: Condvar,
}

/// Server side of a remote interface.
pub struct Skeleton<D: Dispatch> {
    inner: Arc<Shared<D>>,
}

impl<D: Dispatch> Skeleton<D> {
    /// Skeleton with a system-chosen address, resolved at `start`.
    pub fn new(dispatch: D) -> Result<Self, RmiError> {
        Self::with_events(dispatch, None, Arc::new(NoEvents))
    }

    /// Skeleton bound to a fixed address. A stub can be created from it
    /// before it is started.
    pub fn bind(dispatch: D, addr: SocketAddr) -> Result<Self, RmiError> {
        Self::with_events(dispatch, Some(addr), Arc::new(NoEvents))
    }

    /// Full-control constructor with error hooks installed.
    pub fn with_events(
        dispatch: D,
        addr: Option<SocketAddr>,
        events: Arc<dyn SkeletonEvents>,
    ) -> Result<Self, RmiError> {
        dispatch.interface().ensure_remote()?;
        Ok(Self {
            inner: Arc::new(Shared {
                dispatch,
                events,
                state: Mutex::new(LifecycleState {
                    phase: Lifecycle::New,
                    addr,
                }),
                state_cv: Condvar::new(),
            }),
        })
    }

    /// The interface this skeleton serves.
    pub fn interface(&self) -> &'static InterfaceDesc {
        self.inner.dispatch.interface()
    }

    /// The skeleton's address: the configured address, or the bound
    /// address once started. `None` for an unbound skeleton that has
    /// never been started.
    pub fn address(&self) -> Option<SocketAddr> {
        self.inner.state.lock().unwrap().addr
    }

    /// Whether the listener is up (started or accepting).
    pub fn is_running(&self) -> bool {
        matches!(
            self.inner.state.lock().unwrap().phase,
            Lifecycle::Started | Lifecycle::Running
        )
    }

    /// Bind the listening socket and launch the listener thread.
    ///
    /// Fails with [`RmiError::AlreadyStarted`] unless the skeleton is new
    /// or fully stopped; a stopped skeleton may be started again.
    pub fn start(&self) -> Result<(), RmiError> {
        let mut state = self.inner.state.lock().unwrap();
        match state.phase {
            Lifecycle::New | Lifecycle::Stopped => {}
            _ => return Err(RmiError::AlreadyStarted),
        }

        let bind_to = state.addr.unwrap_or_else(|| {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        });
        let listener = TcpListener::bind(bind_to).map_err(|e| RmiError::Bind {
            addr: bind_to.to_string(),
            detail: e.to_string(),
        })?;
        let local = listener.local_addr().map_err(RmiError::io)?;
        state.addr = Some(local);
        state.phase = Lifecycle::Started;

        let shared = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("{}-listener", self.interface().name))
            .spawn(move || listen_loop(shared, listener));
        if let Err(e) = spawned {
            state.phase = Lifecycle::Stopped;
            return Err(RmiError::Io(e.to_string()));
        }

        tracing::debug!(
            interface = self.interface().name,
            addr = %local,
            "skeleton started"
        );
        Ok(())
    }

    /// Interrupt the listener. A no-op unless the skeleton is started or
    /// running. In-flight workers finish naturally; the `stopped` hook
    /// fires once the listener thread has exited.
    pub fn stop(&self) {
        let wake_addr;
        {
            let mut state = self.inner.state.lock().unwrap();
            match state.phase {
                Lifecycle::Started | Lifecycle::Running => {}
                _ => return,
            }
            state.phase = Lifecycle::Interrupted;
            wake_addr = state.addr;
        }

        // The listener blocks in accept; poke it with a throwaway
        // connection so it observes the interrupt.
        if let Some(addr) = wake_addr {
            let target = connectable(addr);
            let _ = TcpStream::connect_timeout(&target, Duration::from_millis(250));
        }
    }

    /// Block until the listener thread has fully stopped.
    pub fn wait_stopped(&self) {
        let mut state = self.inner.state.lock().unwrap();
        while state.phase != Lifecycle::Stopped {
            state = self.inner.state_cv.wait(state).unwrap();
        }
    }
}

/// An address we can dial to reach our own listener: the unspecified
/// address accepts but cannot always be connected to.
fn connectable(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
    } else {
        addr
    }
}

fn interrupted<D: Dispatch>(shared: &Shared<D>) -> bool {
    shared.inner_phase() == Lifecycle::Interrupted
}

impl<D> Shared<D> {
    fn inner_phase(&self) -> Lifecycle {
        self.state.lock().unwrap().phase
    }
}

fn listen_loop<D: Dispatch>(shared: Arc<Shared<D>>, listener: TcpListener) {
    // First tick: a stop issued before the thread was scheduled wins.
    {
        let mut state = shared.state.lock().unwrap();
        match state.phase {
            Lifecycle::Interrupted => {
                state.phase = Lifecycle::Stopped;
                drop(state);
                shared.events.stopped(None);
                shared.state_cv.notify_all();
                return;
            }
            Lifecycle::Started => state.phase = Lifecycle::Running,
            other => {
                tracing::error!(?other, "listener started in unexpected phase");
                return;
            }
        }
    }

    let mut cause: Option<RmiError> = None;
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if interrupted(&shared) {
                    break;
                }
                tracing::trace!(%peer, "connection accepted");
                let worker_shared = Arc::clone(&shared);
                thread::spawn(move || serve_connection(&worker_shared, stream));
            }
            Err(e) => {
                if interrupted(&shared) {
                    break;
                }
                let err = RmiError::Io(e.to_string());
                if !shared.events.listen_error(&err) {
                    cause = Some(err);
                    break;
                }
            }
        }
    }

    {
        let mut state = shared.state.lock().unwrap();
        state.phase = Lifecycle::Stopping;
    }
    drop(listener);
    {
        let mut state = shared.state.lock().unwrap();
        state.phase = Lifecycle::Stopped;
    }
    tracing::debug!("skeleton listener exited");
    shared.events.stopped(cause.as_ref());
    shared.state_cv.notify_all();
}

/// One connection, one exchange.
fn serve_connection<D: Dispatch>(shared: &Shared<D>, mut stream: TcpStream) {
    let response = match read_frame::<Request>(&mut stream) {
        Ok(request) => handle_request(shared, request),
        Err(e) => {
            shared.events.service_error(&e);
            Response::RmiException(e)
        }
    };

    if let Err(e) = write_frame(&mut stream, &response) {
        shared.events.service_error(&e);
    }
    let _ = stream.shutdown(Shutdown::Both);
}

fn handle_request<D: Dispatch>(shared: &Shared<D>, request: Request) -> Response {
    let desc = shared.dispatch.interface();

    let sig = match desc.find(&request.method, &request.param_types) {
        Some(sig) => sig,
        None => {
            let err = RmiError::UnknownMethod {
                interface: desc.name.to_string(),
                method: request.method,
                params: request.param_types.join(", "),
            };
            shared.events.service_error(&err);
            return Response::RmiException(err);
        }
    };

    if sig.returns != request.return_type {
        let err = RmiError::ReturnTypeMismatch {
            method: sig.name.to_string(),
            declared: sig.returns.to_string(),
            expected: request.return_type,
        };
        shared.events.service_error(&err);
        return Response::RmiException(err);
    }

    match shared.dispatch.dispatch(sig, &request.args) {
        Ok(Outcome::Return(value)) => Response::ReturnValue(value),
        Ok(Outcome::Fault(fault)) => Response::MethodException(fault),
        Err(err) => {
            shared.events.service_error(&err);
            Response::RmiException(err)
        }
    }
}
