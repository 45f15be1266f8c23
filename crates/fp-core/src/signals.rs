//! Interrupt and suspend handling.
//!
//! Handlers only set flags. The dispatcher and agent streams poll the flags
//! at their next safe point and do any I/O (history, exit) themselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::debug;

/// Flag the SIGTSTP handler sets; a C handler cannot capture state.
static SUSPEND_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("cannot install interrupt handler: {0}")]
    Interrupt(#[from] ctrlc::Error),

    #[error("cannot install suspend handler: {0}")]
    Suspend(#[source] std::io::Error),
}

/// Shared view of the interrupt and suspend flags.
#[derive(Debug, Clone, Default)]
pub struct SignalState {
    interrupt: Arc<AtomicBool>,
    suspend: Arc<AtomicBool>,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route SIGINT and SIGTSTP to these flags. Call once per process.
    pub fn install(&self) -> Result<(), SignalError> {
        let interrupt = Arc::clone(&self.interrupt);
        ctrlc::set_handler(move || interrupt.store(true, Ordering::SeqCst))?;
        self.install_suspend()?;
        debug!("signal handlers installed");
        Ok(())
    }

    #[cfg(unix)]
    fn install_suspend(&self) -> Result<(), SignalError> {
        let _ = SUSPEND_FLAG.set(Arc::clone(&self.suspend));
        let handler = on_sigtstp as extern "C" fn(libc::c_int);
        let previous = unsafe { libc::signal(libc::SIGTSTP, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(SignalError::Suspend(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn install_suspend(&self) -> Result<(), SignalError> {
        Ok(())
    }

    pub fn request_interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Consume a pending interrupt.
    pub fn take_interrupt(&self) -> bool {
        self.interrupt.swap(false, Ordering::SeqCst)
    }

    pub fn request_suspend(&self) {
        self.suspend.store(true, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend.load(Ordering::SeqCst)
    }

    /// Consume a pending suspend request.
    pub fn take_suspend(&self) -> bool {
        self.suspend.swap(false, Ordering::SeqCst)
    }
}

#[cfg(unix)]
extern "C" fn on_sigtstp(_signal: libc::c_int) {
    if let Some(flag) = SUSPEND_FLAG.get() {
        flag.store(true, Ordering::SeqCst);
    }
}
