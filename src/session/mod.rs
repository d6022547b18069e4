//! Session driver: one Horizons negotiation from main menu to kernel file
//!
//! The driver is an explicit state machine over [`Stage`]. Each step waits,
//! up to the configured timeout, for output matching one of the prompt rules
//! valid in the current stage, answers it, and moves to the stage the rule
//! declares. Nothing is ever sent before the current prompt is classified.
//!
//! The driver never retries: every failure ends the negotiation with an error
//! carrying the stage and the unmatched output, and the transport is closed on
//! every exit path.

mod ambiguity;
mod transcript;
mod transfer;


use std::path::PathBuf;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::error::{Error, Result, TransportError};
use crate::finalize;
use crate::matcher::{self, Match};
use crate::rules::{self, Capture, CompiledTable, Framing, Outcome, PROMPT_RULES, Rejection, Reply};
use crate::transport::{Chunk, CloseHandle, Transport, send_line};
use crate::types::{Event, Retrieval, Stage};

use ambiguity::{AmbiguityResolver, Unresolved};
use transfer::{ProgressReporter, StagedFile};

/// Times a rule that keeps the stage may fire before the stage is abandoned
const MAX_STAGE_REPEATS: u32 = 8;

/// Unmatched output kept for matching; older bytes are dropped
const MAX_BUFFER_BYTES: usize = 256 * 1024;

/// Unmatched output quoted in errors
const MAX_QUOTED_BYTES: usize = 2048;

/// Mutable negotiation state, owned by the driver
#[derive(Debug)]
struct SessionState {
    stage: Stage,
    /// Output received and not yet consumed by a match
    buffer: Vec<u8>,
    /// Rules fired without leaving the current stage
    repeats: u32,
}

/// Facts learned from the service along the way
#[derive(Debug, Default)]
struct Negotiated {
    object_id: Option<String>,
    target: Option<String>,
    selection: Option<String>,
}

/// Drives one negotiation over a transport
///
/// ```no_run
/// # async fn example() -> sbspk::Result<()> {
/// use sbspk::{SessionConfig, SessionDriver, ServerConfig, TcpTransport};
/// use tokio_util::sync::CancellationToken;
///
/// let config = SessionConfig::default();
/// let transport = TcpTransport::connect(&ServerConfig::default(), CancellationToken::new()).await?;
/// let retrieval = SessionDriver::new(transport, &config, "2000433", ".")
///     .run()
///     .await?;
/// println!("{}", retrieval.path.display());
/// # Ok(())
/// # }
/// ```
pub struct SessionDriver<'a, T: Transport> {
    transport: T,
    config: &'a SessionConfig,
    object: String,
    output_dir: PathBuf,
    events: Option<broadcast::Sender<Event>>,
    state: SessionState,
    negotiated: Negotiated,
}

impl<'a, T: Transport> SessionDriver<'a, T> {
    /// Prepare a negotiation for `object` on an open transport
    pub fn new(
        transport: T,
        config: &'a SessionConfig,
        object: &str,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            config,
            object: object.trim().to_string(),
            output_dir: output_dir.into(),
            events: None,
            state: SessionState {
                stage: Stage::Connecting,
                buffer: Vec::new(),
                repeats: 0,
            },
            negotiated: Negotiated::default(),
        }
    }

    /// Publish stage changes (and progress, when enabled) on `events`
    pub fn with_events(mut self, events: broadcast::Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    /// Current stage
    pub fn stage(&self) -> Stage {
        self.state.stage
    }

    /// Handle that cancels the negotiation from another task
    pub fn close_handle(&self) -> CloseHandle {
        self.transport.close_handle()
    }

    /// Run the negotiation to completion
    ///
    /// Returns the written kernel, or the error that ended the negotiation.
    /// The transport is closed either way.
    pub async fn run(mut self) -> Result<Retrieval> {
        let result = self.negotiate().await;

        if let Err(e) = self.transport.close().await {
            tracing::debug!(object = %self.object, error = %e, "Error closing transport");
        }

        match result {
            Ok(retrieval) => Ok(retrieval),
            Err(e) => {
                let stage = self.state.stage;
                self.enter(Stage::Failed);
                tracing::error!(
                    object = %self.object,
                    stage = %stage,
                    kind = %e.kind(),
                    error = %e,
                    "Negotiation failed"
                );
                Err(e)
            }
        }
    }

    async fn negotiate(&mut self) -> Result<Retrieval> {
        let table = rules::compiled()?;
        let mut resolver = AmbiguityResolver::new(&self.object, self.config.selection.as_deref());

        self.enter(Stage::AwaitMainMenu);

        let (framing, announcement) = loop {
            if let Some(transfer) = self.step(table, &mut resolver).await? {
                break transfer;
            }
        };

        self.enter(Stage::ReceivingFile);
        let mut staged = StagedFile::create(&self.output_dir, &self.object).await?;
        let bytes = self.receive(framing, announcement, &mut staged).await?;
        if bytes == 0 {
            return Err(Error::IncompleteTransfer {
                object: self.object.clone(),
                received: 0,
                expected: None,
                reason: "service sent an empty kernel".to_string(),
            });
        }

        self.enter(Stage::Done);
        let object_id = self
            .negotiated
            .object_id
            .clone()
            .unwrap_or_else(|| self.object.clone());
        let target = self
            .negotiated
            .target
            .clone()
            .unwrap_or_else(|| self.object.clone());

        let path = finalize::finalize(
            staged.path(),
            &self.output_dir,
            &self.config.file_format,
            &object_id,
            &target,
        )
        .await?;
        staged.persist();

        Ok(Retrieval {
            object: self.object.clone(),
            object_id,
            target,
            path,
            bytes,
        })
    }

    /// Recognize one prompt and answer it
    ///
    /// Returns the framing and the announced size or URL once the transfer
    /// starts.
    async fn step(
        &mut self,
        table: &CompiledTable,
        resolver: &mut AmbiguityResolver,
    ) -> Result<Option<(Framing, Option<String>)>> {
        let found = self.expect(table).await?;
        let rule = &PROMPT_RULES[found.rule];
        let before = self.state.buffer[..found.span.start].to_vec();
        let matched = self.state.buffer[found.span.clone()].to_vec();
        self.state.buffer.drain(..found.span.end);

        tracing::debug!(
            stage = %self.state.stage,
            rule = rule.name,
            before = %String::from_utf8_lossy(&before),
            matched = %String::from_utf8_lossy(&matched),
            "Prompt recognized"
        );

        if let Outcome::Fail(rejection) = rule.outcome {
            return Err(self.rejected(rejection, &before, &matched));
        }

        self.capture(rule.capture, table, &before, resolver)?;

        if let Some(line) = self.reply_text(rule.reply)? {
            tracing::debug!(stage = %self.state.stage, line = %line, "Sending");
            send_line(&mut self.transport, &line)
                .await
                .map_err(|e| self.transport_failure(e))?;
        }

        match rule.outcome {
            Outcome::Transfer(framing) => {
                let announcement = table.prompts[found.rule]
                    .captures(&matched)
                    .and_then(|caps| caps.get(1))
                    .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned());
                Ok(Some((framing, announcement)))
            }
            outcome => {
                self.advance(rules::next_stage(self.state.stage, outcome), &matched)?;
                Ok(None)
            }
        }
    }

    /// Wait for a prompt valid in the current stage
    ///
    /// Output already buffered is matched before reading more; the wait is
    /// bounded by one timeout from the start of the step.
    async fn expect(&mut self, table: &CompiledTable) -> Result<Match> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;

        loop {
            let stage = self.state.stage;
            let candidates = rules::rules_for(stage).map(|(i, _)| (i, &table.prompts[i]));
            if let Some(found) = matcher::find_match(&self.state.buffer, candidates) {
                return Ok(found);
            }

            match self.transport.read_available(deadline).await {
                Ok(Chunk::Data(bytes)) => {
                    tracing::trace!(stage = %stage, bytes = bytes.len(), "Received");
                    self.state.buffer.extend_from_slice(&bytes);
                    if self.state.buffer.len() > MAX_BUFFER_BYTES {
                        let excess = self.state.buffer.len() - MAX_BUFFER_BYTES;
                        self.state.buffer.drain(..excess);
                    }
                }
                Ok(Chunk::Eof) => {
                    return Err(Error::ConnectionLost {
                        stage,
                        unmatched: self.unmatched(),
                    });
                }
                Err(TransportError::DeadlineElapsed) => {
                    tracing::warn!(
                        object = %self.object,
                        stage = %stage,
                        "No recognized prompt before the timeout. Perhaps the Horizons interface changed?"
                    );
                    return Err(Error::Timeout {
                        stage,
                        elapsed: started.elapsed(),
                        unmatched: self.unmatched(),
                    });
                }
                Err(e) => return Err(self.transport_failure(e)),
            }
        }
    }

    fn capture(
        &mut self,
        capture: Capture,
        table: &CompiledTable,
        before: &[u8],
        resolver: &mut AmbiguityResolver,
    ) -> Result<()> {
        match capture {
            Capture::Nothing => {}
            Capture::Target => {
                if let Some(target) = transcript::target_name(table, before) {
                    tracing::debug!(object = %self.object, target = %target, "Target name");
                    self.negotiated.target = Some(target);
                }
            }
            Capture::ObjectId => match transcript::object_id(table, before) {
                Some(id) => {
                    tracing::info!(object = %self.object, object_id = %id, "SPK object ID");
                    self.negotiated.object_id = Some(id);
                }
                None => {
                    return Err(Error::UnexpectedPrompt {
                        stage: self.state.stage,
                        reason: "cannot parse object ID".to_string(),
                        text: quote(before),
                    });
                }
            },
            Capture::Candidates => {
                let text = String::from_utf8_lossy(before);
                match resolver.resolve(&text) {
                    Ok(chosen) => {
                        tracing::info!(
                            object = %self.object,
                            record = %chosen.record,
                            description = %chosen.description,
                            "Resolved ambiguous object"
                        );
                        self.negotiated.selection = Some(chosen.record);
                    }
                    Err(Unresolved::Ambiguous(candidates)) => {
                        return Err(Error::AmbiguousObject {
                            object: self.object.clone(),
                            stage: self.state.stage,
                            candidates,
                        });
                    }
                    Err(Unresolved::Unreadable) => {
                        return Err(Error::UnexpectedPrompt {
                            stage: self.state.stage,
                            reason: "cannot parse candidate list".to_string(),
                            text: quote(before),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn reply_text(&self, reply: Reply) -> Result<Option<String>> {
        let text = match reply {
            Reply::Nothing => return Ok(None),
            Reply::Line(line) => line.to_string(),
            Reply::ObjectId => self.object.clone(),
            Reply::Email => self.config.email.clone(),
            Reply::StartDate => self.config.start_date.clone(),
            Reply::StopDate => self.config.stop_date.clone(),
            Reply::Selection => match &self.negotiated.selection {
                Some(record) => format!("{record};"),
                None => {
                    return Err(Error::UnexpectedPrompt {
                        stage: self.state.stage,
                        reason: "no candidate selected".to_string(),
                        text: String::new(),
                    });
                }
            },
        };
        Ok(Some(text))
    }

    fn advance(&mut self, next: Stage, matched: &[u8]) -> Result<()> {
        if next != self.state.stage {
            self.enter(next);
            return Ok(());
        }

        self.state.repeats += 1;
        if self.state.repeats > MAX_STAGE_REPEATS {
            return Err(Error::UnexpectedPrompt {
                stage: self.state.stage,
                reason: format!("service repeated the same prompt {MAX_STAGE_REPEATS} times"),
                text: quote(matched),
            });
        }
        Ok(())
    }

    async fn receive(
        &mut self,
        framing: Framing,
        announcement: Option<String>,
        staged: &mut StagedFile,
    ) -> Result<u64> {
        let events = if self.config.progress {
            self.events.clone()
        } else {
            None
        };
        let mut progress = ProgressReporter::new(&self.object, events);
        let residual = std::mem::take(&mut self.state.buffer);
        let timeout = self.config.timeout;

        match framing {
            Framing::ByteCount => {
                let total = announcement
                    .as_deref()
                    .and_then(|n| n.parse::<u64>().ok())
                    .ok_or_else(|| Error::UnexpectedPrompt {
                        stage: Stage::ReceivingFile,
                        reason: "cannot parse transfer size".to_string(),
                        text: announcement.clone().unwrap_or_default(),
                    })?;
                tracing::info!(object = %self.object, bytes = total, "Receiving kernel");
                transfer::receive_in_band(
                    &mut self.transport,
                    residual,
                    Some(total),
                    staged,
                    timeout,
                    &mut progress,
                    &self.object,
                )
                .await
            }
            Framing::UntilClose => {
                tracing::info!(object = %self.object, "Receiving kernel until the service closes");
                transfer::receive_in_band(
                    &mut self.transport,
                    residual,
                    None,
                    staged,
                    timeout,
                    &mut progress,
                    &self.object,
                )
                .await
            }
            Framing::DownloadUrl => {
                let url = announcement.ok_or_else(|| Error::UnexpectedPrompt {
                    stage: Stage::ReceivingFile,
                    reason: "cannot parse download URL".to_string(),
                    text: String::new(),
                })?;
                tracing::info!(object = %self.object, url = %url, "Downloading kernel");
                let cancel = self.transport.close_handle();
                transfer::download(&url, staged, timeout, &mut progress, &self.object, &cancel)
                    .await
            }
        }
    }

    fn enter(&mut self, stage: Stage) {
        if stage == self.state.stage {
            return;
        }
        tracing::debug!(object = %self.object, from = %self.state.stage, to = %stage, "Stage change");
        self.state.stage = stage;
        self.state.repeats = 0;
        if let Some(events) = &self.events {
            events
                .send(Event::StageChanged {
                    object: self.object.clone(),
                    stage,
                })
                .ok();
        }
    }

    fn rejected(&self, rejection: Rejection, before: &[u8], matched: &[u8]) -> Error {
        match rejection {
            Rejection::ObjectNotFound => Error::ObjectNotFound {
                object: self.object.clone(),
                stage: self.state.stage,
            },
            Rejection::Fatal(reason) => {
                let mut text = before.to_vec();
                text.extend_from_slice(matched);
                text.extend_from_slice(&self.state.buffer);
                Error::UnexpectedPrompt {
                    stage: self.state.stage,
                    reason: reason.to_string(),
                    text: quote(&text),
                }
            }
        }
    }

    fn transport_failure(&self, error: TransportError) -> Error {
        match error {
            TransportError::Closed => Error::Cancelled {
                stage: self.state.stage,
            },
            TransportError::DeadlineElapsed => Error::Timeout {
                stage: self.state.stage,
                elapsed: self.config.timeout,
                unmatched: self.unmatched(),
            },
            other => Error::Transport(other),
        }
    }

    fn unmatched(&self) -> String {
        quote(&self.state.buffer)
    }
}

/// Tail of the output, lossily decoded, for error messages
fn quote(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(MAX_QUOTED_BYTES);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}
