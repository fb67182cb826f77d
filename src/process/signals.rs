//! Signal-aware shutdown for long-running workers (receiver, copy/index
//! workers, the CDC applier): graceful-stop, fast-stop, and quit, each
//! with a different cutoff (§4 "Cancellation and timeouts").

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::signal;

/// How far along a worker should unwind before exiting, in increasing
/// urgency. `Running` is never observed by a reader; it's the default
/// state before any signal arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopLevel {
    Running,
    /// SIGTERM: finish the current unit, commit, then exit.
    Graceful,
    /// SIGINT: abandon the current unit (rolling back any open
    /// transaction) and exit without starting another.
    Fast,
    /// SIGQUIT: exit immediately, skipping even a rollback where one
    /// can be avoided.
    Quit,
}

impl StopLevel {
    fn from_tag(tag: u8) -> StopLevel {
        match tag {
            1 => StopLevel::Graceful,
            2 => StopLevel::Fast,
            3 => StopLevel::Quit,
            _ => StopLevel::Running,
        }
    }

    fn tag(self) -> u8 {
        match self {
            StopLevel::Running => 0,
            StopLevel::Graceful => 1,
            StopLevel::Fast => 2,
            StopLevel::Quit => 3,
        }
    }
}

/// Shared, cheaply-cloned handle workers poll between units of work.
/// Only ever escalates: once `Quit` is observed a later `Graceful`
/// signal (there won't be one, but just in case) can't downgrade it.
#[derive(Clone)]
pub struct ShutdownSignal {
    level: Arc<AtomicU8>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self { level: Arc::new(AtomicU8::new(StopLevel::Running.tag())) }
    }

    pub fn level(&self) -> StopLevel {
        StopLevel::from_tag(self.level.load(Ordering::Relaxed))
    }

    pub fn is_stopping(&self) -> bool {
        self.level() != StopLevel::Running
    }

    fn escalate_to(&self, level: StopLevel) {
        let tag = level.tag();
        self.level.fetch_max(tag, Ordering::Relaxed);
    }

    /// Spawn the signal listener. Installs SIGTERM (graceful), SIGINT
    /// (fast, also Ctrl+C), and SIGQUIT (quit) handlers on Unix; on
    /// other platforms only Ctrl+C is available, treated as fast-stop.
    pub fn install(&self) {
        let handle = self.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
                let mut quit = signal::unix::signal(signal::unix::SignalKind::quit())
                    .expect("failed to install SIGQUIT handler");
                loop {
                    tokio::select! {
                        _ = signal::ctrl_c() => {
                            tracing::info!("received interrupt, requesting fast-stop");
                            handle.escalate_to(StopLevel::Fast);
                        }
                        _ = term.recv() => {
                            tracing::info!("received SIGTERM, requesting graceful-stop");
                            handle.escalate_to(StopLevel::Graceful);
                        }
                        _ = quit.recv() => {
                            tracing::info!("received SIGQUIT, requesting immediate quit");
                            handle.escalate_to(StopLevel::Quit);
                            break;
                        }
                    }
                    if handle.level() == StopLevel::Quit {
                        break;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                if signal::ctrl_c().await.is_ok() {
                    tracing::info!("received interrupt, requesting fast-stop");
                    handle.escalate_to(StopLevel::Fast);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_never_downgrades() {
        let s = ShutdownSignal::new();
        s.escalate_to(StopLevel::Fast);
        s.escalate_to(StopLevel::Graceful);
        assert_eq!(s.level(), StopLevel::Fast);
        s.escalate_to(StopLevel::Quit);
        assert_eq!(s.level(), StopLevel::Quit);
    }

    #[test]
    fn fresh_signal_is_not_stopping() {
        let s = ShutdownSignal::new();
        assert!(!s.is_stopping());
    }
}
