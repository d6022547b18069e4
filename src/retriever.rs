//! Caller façade: validated configuration in, kernel files out

use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::retry;
use crate::session::SessionDriver;
use crate::transport::{TcpTransport, Transport};
use crate::types::{Event, Retrieval, Stage};

/// Retrieves SPK kernels from Horizons
///
/// Each retrieval is one (or, with retries configured, several) independent
/// negotiations with their own connection. Clones share the configuration,
/// the event channel and cancellation.
///
/// ```no_run
/// use sbspk::{Config, SpkRetriever};
///
/// # async fn example() -> sbspk::Result<()> {
/// let mut config = Config::default();
/// config.session.email = "observer@example.org".to_string();
///
/// let retriever = SpkRetriever::new(config)?;
/// let mut events = retriever.subscribe();
/// tokio::spawn(async move {
///     while let Ok(event) = events.recv().await {
///         println!("{event:?}");
///     }
/// });
///
/// let eros = retriever.retrieve("2000433").await?;
/// println!("{}", eros.path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SpkRetriever {
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
    shutdown: CancellationToken,
}

impl SpkRetriever {
    /// Create a retriever after validating the configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(1000);
        Ok(Self {
            config: Arc::new(config),
            event_tx,
            shutdown: CancellationToken::new(),
        })
    }

    /// Subscribe to retrieval events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The configuration in use
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Cancel every running and future retrieval of this retriever
    ///
    /// Open connections are closed, which unblocks pending reads; the affected
    /// retrievals fail with a cancellation error.
    pub fn cancel(&self) {
        tracing::info!("Cancelling retrievals");
        self.shutdown.cancel();
    }

    /// Whether [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Retrieve the kernel of one object
    ///
    /// Transient failures restart the whole negotiation according to the
    /// retry configuration.
    pub async fn retrieve(&self, object: &str) -> Result<Retrieval> {
        let object = object.trim();
        if object.is_empty() {
            return Err(Error::config(
                "object identifier must not be empty",
                "object",
            ));
        }

        self.emit_event(Event::Started {
            object: object.to_string(),
        });
        let result = retry::with_retry(&self.config.retry, || self.negotiate(object)).await;
        self.report(object, &result);
        result
    }

    /// Retrieve one kernel over an already open transport
    ///
    /// Runs a single negotiation without retries.
    pub async fn retrieve_over<T: Transport>(&self, object: &str, transport: T) -> Result<Retrieval> {
        let object = object.trim();
        self.emit_event(Event::Started {
            object: object.to_string(),
        });
        let result = self.drive(object, transport).await;
        self.report(object, &result);
        result
    }

    /// Retrieve several kernels, stopping at the first failure
    ///
    /// Identifiers are trimmed and blank ones skipped. Up to `max_concurrent`
    /// negotiations run at once; results keep the input order.
    pub async fn retrieve_all<I, S>(&self, objects: I) -> Result<Vec<Retrieval>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        futures::stream::iter(object_list(objects))
            .map(|object| async move { self.retrieve(&object).await })
            .buffered(self.config.max_concurrent)
            .try_collect()
            .await
    }

    /// Retrieve several kernels, reporting every outcome
    ///
    /// Like [`retrieve_all`](Self::retrieve_all) but a failure does not stop
    /// the remaining retrievals.
    pub async fn retrieve_each<I, S>(&self, objects: I) -> Vec<(String, Result<Retrieval>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        futures::stream::iter(object_list(objects))
            .map(|object| async move {
                let result = self.retrieve(&object).await;
                (object, result)
            })
            .buffered(self.config.max_concurrent)
            .collect()
            .await
    }

    async fn negotiate(&self, object: &str) -> Result<Retrieval> {
        self.emit_event(Event::StageChanged {
            object: object.to_string(),
            stage: Stage::Connecting,
        });
        let transport =
            TcpTransport::connect(&self.config.server, self.shutdown.child_token()).await?;
        self.drive(object, transport).await
    }

    async fn drive<T: Transport>(&self, object: &str, transport: T) -> Result<Retrieval> {
        SessionDriver::new(
            transport,
            &self.config.session,
            object,
            &self.config.output_dir,
        )
        .with_events(self.event_tx.clone())
        .run()
        .await
    }

    fn report(&self, object: &str, result: &Result<Retrieval>) {
        match result {
            Ok(retrieval) => {
                tracing::info!(
                    object = %object,
                    path = %retrieval.path.display(),
                    bytes = retrieval.bytes,
                    "Kernel retrieved"
                );
                self.emit_event(Event::Completed {
                    object: object.to_string(),
                    path: retrieval.path.clone(),
                    bytes: retrieval.bytes,
                });
            }
            Err(e) => self.emit_event(Event::Failed {
                object: object.to_string(),
                kind: e.kind(),
                error: e.to_string(),
            }),
        }
    }

    /// Send an event to all subscribers; dropped when nobody listens
    fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Parse a list of object identifiers, one per line
///
/// Lines are trimmed and blank lines skipped.
pub fn parse_object_list(text: &str) -> Vec<String> {
    object_list(text.lines())
}

fn object_list<I, S>(objects: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    objects
        .into_iter()
        .map(|object| object.as_ref().trim().to_string())
        .filter(|object| !object.is_empty())
        .collect()
}
