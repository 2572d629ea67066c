//! Process entry point.
//!
//! [`run`] is the whole-program wrapper: it installs the global runtime
//! with the given configuration, registers a SIGINT handler that flips
//! a shutdown flag, optionally installs a default tracing subscriber,
//! drives the main future to completion, and waits for the runtime to
//! quiesce before returning.
//!
//! ```no_run
//! fn main() {
//!     let exit = fibril::app::run(fibril::RuntimeConfig::default(), async {
//!         // main coroutine
//!         0
//!     });
//!     std::process::exit(exit);
//! }
//! ```

use crate::config::RuntimeConfig;
use crate::runtime::Runtime;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static SIGNAL_INSTALL: Once = Once::new();

extern "C" fn handle_sigint(_signal: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Returns true once SIGINT has been received.
///
/// Long-running main coroutines poll this to exit their loops cleanly.
#[must_use]
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

fn install_signal_handler() {
    SIGNAL_INSTALL.call_once(|| {
        // SAFETY: the handler only stores to an atomic, which is
        // async-signal-safe.
        unsafe {
            libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
        }
    });
}

fn install_default_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Installs the runtime and runs `main` to completion, then shuts the
/// runtime down.
///
/// Uses the already-running global runtime if one exists (its config
/// wins in that case).
pub fn run<F: Future>(config: RuntimeConfig, main: F) -> F::Output {
    install_default_logging();
    install_signal_handler();

    let runtime = Runtime::init(config).unwrap_or_else(|_| Runtime::global());
    let output = runtime.block_on(main);
    runtime.shutdown();
    output
}
