use console::Term;
use wikisync::Shutdown;

/// Route Ctrl+C to `shutdown`.
///
/// The first press requests a graceful stop: the current item finishes and
/// the ledger is published. Later presses join that same shutdown.
pub(crate) fn setup_shutdown_handler(shutdown: Shutdown) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                return;
            }

            let is_tty = Term::stderr().is_term();
            if shutdown.request() {
                if is_tty {
                    eprintln!("\n\nShutdown requested, finishing current item and saving the ledger...");
                } else {
                    tracing::warn!("Shutdown requested, finishing current item");
                }
            } else if is_tty {
                eprintln!("Shutdown already in progress, waiting for the ledger to be saved.");
            } else {
                tracing::warn!("Shutdown already in progress");
            }
        }
    });
}
