//! Signal-driven control of long-running solves.
//!
//! Each bound OS signal owns an [`ActionCell`]. Delivery stores the signal's
//! configured effect into its cell; the solve loop drains the cells through
//! an [`ActionFn`] at iteration boundaries, so a step is never preempted.

use crate::error::{Result, RoastError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info};

/// Action the solver is asked to take at its next iteration boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SolverAction {
    #[default]
    None = 0,
    Stop = 1,
    Snapshot = 2,
}

impl SolverAction {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Stop,
            2 => Self::Snapshot,
            _ => Self::None,
        }
    }
}

impl FromStr for SolverAction {
    type Err = RoastError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stop" => Ok(Self::Stop),
            "snapshot" => Ok(Self::Snapshot),
            "none" => Ok(Self::None),
            other => Err(RoastError::usage(format!(
                "Invalid signal effect \"{other}\" was specified"
            ))),
        }
    }
}

impl fmt::Display for SolverAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Stop => write!(f, "stop"),
            Self::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Callback a solver polls for the currently requested action.
pub type ActionFn = Arc<dyn Fn() -> SolverAction + Send + Sync>;

/// An action function that never requests anything.
pub fn no_action() -> ActionFn {
    Arc::new(|| SolverAction::None)
}

/// Atomically readable/writable requested-action slot.
#[derive(Debug, Default)]
pub struct ActionCell(AtomicU8);

impl ActionCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(SolverAction::None as u8))
    }

    pub fn store(&self, action: SolverAction) {
        self.0.store(action as u8, Ordering::SeqCst);
    }

    /// Current value without consuming it.
    pub fn peek(&self) -> SolverAction {
        SolverAction::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Consume the pending action, leaving the cell at `None`.
    pub fn take(&self) -> SolverAction {
        SolverAction::from_u8(self.0.swap(SolverAction::None as u8, Ordering::SeqCst))
    }
}

/// Signals the controller can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Interrupt,
    Hangup,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Hangup => write!(f, "SIGHUP"),
        }
    }
}

#[derive(Debug)]
struct Binding {
    effect: SolverAction,
    pending: ActionCell,
}

impl Binding {
    fn new(effect: SolverAction) -> Arc<Self> {
        Arc::new(Self {
            effect,
            pending: ActionCell::new(),
        })
    }
}

/// Binds interrupt and hangup to requested solver actions.
#[derive(Debug, Clone)]
pub struct SignalController {
    interrupt: Arc<Binding>,
    hangup: Arc<Binding>,
}

impl SignalController {
    /// Create a controller without attaching it to OS signals.
    pub fn new(interrupt_effect: SolverAction, hangup_effect: SolverAction) -> Self {
        Self {
            interrupt: Binding::new(interrupt_effect),
            hangup: Binding::new(hangup_effect),
        }
    }

    /// Create a controller and start listening for OS signals on `handle`.
    pub fn install(
        handle: &tokio::runtime::Handle,
        interrupt_effect: SolverAction,
        hangup_effect: SolverAction,
    ) -> Result<Self> {
        let controller = Self::new(interrupt_effect, hangup_effect);
        controller.listen(handle)?;
        info!(
            sigint = %interrupt_effect,
            sighup = %hangup_effect,
            "Signal handlers installed"
        );
        Ok(controller)
    }

    fn binding(&self, kind: SignalKind) -> &Binding {
        match kind {
            SignalKind::Interrupt => &self.interrupt,
            SignalKind::Hangup => &self.hangup,
        }
    }

    pub fn effect(&self, kind: SignalKind) -> SolverAction {
        self.binding(kind).effect
    }

    /// Record one delivery of `kind`.
    pub fn deliver(&self, kind: SignalKind) {
        let binding = self.binding(kind);
        debug!(signal = %kind, effect = %binding.effect, "Signal received");
        binding.pending.store(binding.effect);
    }

    /// Pending, unconsumed action for `kind`.
    pub fn pending(&self, kind: SignalKind) -> SolverAction {
        self.binding(kind).pending.peek()
    }

    /// Consume pending deliveries. Hangup is checked before interrupt; an
    /// interrupt that arrives alongside a hangup is reported on the next poll.
    pub fn poll(&self) -> SolverAction {
        match self.hangup.pending.take() {
            SolverAction::None => self.interrupt.pending.take(),
            action => action,
        }
    }

    /// Polling closure to install on a solver.
    pub fn action_fn(&self) -> ActionFn {
        let controller = self.clone();
        Arc::new(move || controller.poll())
    }

    #[cfg(unix)]
    fn listen(&self, handle: &tokio::runtime::Handle) -> Result<()> {
        use tokio::signal::unix::{SignalKind as OsSignal, signal};

        let _guard = handle.enter();
        // Registered streams stay armed, so every later delivery is observed.
        for (kind, os_kind) in [
            (SignalKind::Interrupt, OsSignal::interrupt()),
            (SignalKind::Hangup, OsSignal::hangup()),
        ] {
            let mut stream = signal(os_kind)?;
            let controller = self.clone();
            handle.spawn(async move {
                while stream.recv().await.is_some() {
                    controller.deliver(kind);
                }
            });
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn listen(&self, handle: &tokio::runtime::Handle) -> Result<()> {
        let controller = self.clone();
        handle.spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                controller.deliver(SignalKind::Interrupt);
            }
        });
        Ok(())
    }
}
