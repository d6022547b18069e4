//! # sbspk
//!
//! Retrieve SPK ephemeris kernels for small bodies from the JPL Horizons
//! telnet service.
//!
//! Horizons has no API for SPK generation; a kernel is obtained by holding a
//! scripted conversation with its interactive telnet interface. This crate
//! drives that conversation as an explicit state machine over a versioned
//! table of prompt rules ([`rules`]), receives the kernel, and writes it under
//! a templated file name.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sbspk::{Config, SpkRetriever};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.session.email = "observer@example.org".to_string();
//!     config.session.start_date = "2020-01-01".to_string();
//!     config.session.stop_date = "2020-02-01".to_string();
//!
//!     let retriever = SpkRetriever::new(config)?;
//!     for (object, result) in retriever.retrieve_each(["2000433", "Ceres"]).await {
//!         match result {
//!             Ok(kernel) => println!("{object}: {}", kernel.path.display()),
//!             Err(e) => eprintln!("{object}: {e}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Transfer finalizer
pub mod finalize;
/// Prompt recognition
pub mod matcher;
/// Caller façade
pub mod retriever;
/// Retry logic with exponential backoff
pub mod retry;
/// The Horizons prompt table
pub mod rules;
/// Session driver
pub mod session;
/// Transport layer
pub mod transport;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, RetryConfig, ServerConfig, SessionConfig};
pub use error::{Error, ErrorKind, Result, TransportError};
pub use finalize::{finalize, render_file_name};
pub use retriever::{SpkRetriever, parse_object_list};
pub use rules::{PROMPT_TABLE_VERSION, TRANSFER_FRAMING_VERSION};
pub use session::SessionDriver;
pub use transport::{CloseHandle, TcpTransport, Transport};
pub use types::{Candidate, Event, Retrieval, Stage};

/// Cancel a retriever's work when the process is asked to stop
///
/// Waits for a termination signal, then calls [`SpkRetriever::cancel`]; open
/// connections are closed and the affected retrievals fail with a
/// cancellation error.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use sbspk::{Config, SpkRetriever, cancel_on_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let retriever = SpkRetriever::new(Config::default())?;
///     tokio::spawn(cancel_on_signal(retriever.clone()));
///
///     retriever.retrieve("2000433").await?;
///     Ok(())
/// }
/// ```
pub async fn cancel_on_signal(retriever: SpkRetriever) {
    wait_for_signal().await;
    retriever.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
