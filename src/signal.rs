//! Termination signals as a scoped subscription.
//!
//! [`Signals`] is owned by whoever waits on it; dropping it releases the
//! subscription. tokio keeps its handlers registered for the life of the
//! process, so on Unix each signal also gets a fallback that replays the
//! default action (terminate, or dump core for SIGQUIT). The fallback is armed
//! whenever no subscription is live: after release, a signal ends the process
//! exactly as if nothing had ever listened for it.
//!
//! On Unix the OS subscription covers **SIGHUP**, **SIGINT** (Ctrl-C),
//! **SIGTERM** (what `kubectl` and the Kubernetes control plane send) and
//! **SIGQUIT**. Elsewhere only Ctrl-C is watched.

use std::fmt;
use std::io;

use tokio::sync::mpsc;

/// A termination request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    Hangup,
    Interrupt,
    Terminate,
    Quit,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hangup    => "SIGHUP",
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Quit      => "SIGQUIT",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stream of termination signals.
pub struct Signals {
    source: Source,
}

enum Source {
    #[cfg(unix)]
    Os(Box<unix::OsSignals>),
    #[cfg(not(unix))]
    CtrlC,
    Manual(mpsc::UnboundedReceiver<Signal>),
}

impl Signals {
    /// Subscribes to the process's termination signals. They stop reaching
    /// their default action until every subscription has been dropped.
    ///
    /// Must be called inside a tokio runtime.
    pub fn os() -> io::Result<Self> {
        #[cfg(unix)]
        let source = Source::Os(Box::new(unix::OsSignals::new()?));
        #[cfg(not(unix))]
        let source = Source::CtrlC;
        Ok(Self { source })
    }

    /// Signals delivered by hand, for embedding a server in a larger program
    /// (or in tests).
    pub fn manual() -> (SignalSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SignalSender(tx), Self { source: Source::Manual(rx) })
    }

    /// Waits for the next signal. `None` means no more can arrive.
    pub async fn recv(&mut self) -> Option<Signal> {
        match &mut self.source {
            #[cfg(unix)]
            Source::Os(os) => os.recv().await,
            #[cfg(not(unix))]
            Source::CtrlC => tokio::signal::ctrl_c().await.ok().map(|()| Signal::Interrupt),
            Source::Manual(rx) => rx.recv().await,
        }
    }
}

impl fmt::Debug for Signals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source {
            #[cfg(unix)]
            Source::Os(_) => "os",
            #[cfg(not(unix))]
            Source::CtrlC => "ctrl-c",
            Source::Manual(_) => "manual",
        };
        f.debug_struct("Signals").field("source", &source).finish()
    }
}

/// Sending half of [`Signals::manual`].
#[derive(Clone, Debug)]
pub struct SignalSender(mpsc::UnboundedSender<Signal>);

impl SignalSender {
    /// Delivers `signal`. Returns `false` once the receiving side is gone.
    pub fn send(&self, signal: Signal) -> bool {
        self.0.send(signal).is_ok()
    }
}

#[cfg(unix)]
mod unix {
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::flag;
    use tokio::signal::unix::{Signal as Stream, SignalKind, signal};

    use super::Signal;

    /// Default-action fallback shared by every subscription in the process.
    struct Fallback {
        armed: Arc<AtomicBool>,
        live: usize,
    }

    static FALLBACK: Mutex<Option<Fallback>> = Mutex::new(None);

    fn acquire() -> io::Result<()> {
        let mut fallback = FALLBACK.lock().unwrap_or_else(PoisonError::into_inner);
        if fallback.is_none() {
            let armed = Arc::new(AtomicBool::new(false));
            for sig in [SIGHUP, SIGINT, SIGTERM, SIGQUIT] {
                flag::register_conditional_default(sig, Arc::clone(&armed))?;
            }
            *fallback = Some(Fallback { armed, live: 0 });
        }
        if let Some(fallback) = fallback.as_mut() {
            fallback.live += 1;
            fallback.armed.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn release() {
        let mut fallback = FALLBACK.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(fallback) = fallback.as_mut() {
            fallback.live = fallback.live.saturating_sub(1);
            if fallback.live == 0 {
                fallback.armed.store(true, Ordering::SeqCst);
            }
        }
    }

    pub(super) struct OsSignals {
        hangup: Stream,
        interrupt: Stream,
        terminate: Stream,
        quit: Stream,
    }

    impl OsSignals {
        pub(super) fn new() -> io::Result<Self> {
            let signals = Self {
                hangup: signal(SignalKind::hangup())?,
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
                quit: signal(SignalKind::quit())?,
            };
            acquire()?;
            Ok(signals)
        }

        pub(super) async fn recv(&mut self) -> Option<Signal> {
            tokio::select! {
                Some(()) = self.hangup.recv()    => Some(Signal::Hangup),
                Some(()) = self.interrupt.recv() => Some(Signal::Interrupt),
                Some(()) = self.terminate.recv() => Some(Signal::Terminate),
                Some(()) = self.quit.recv()      => Some(Signal::Quit),
                else => None,
            }
        }
    }

    impl Drop for OsSignals {
        fn drop(&mut self) {
            release();
        }
    }

    #[cfg(test)]
    pub(super) fn armed() -> Option<bool> {
        let fallback = FALLBACK.lock().unwrap_or_else(PoisonError::into_inner);
        fallback.as_ref().map(|f| f.armed.load(Ordering::SeqCst))
    }
}
