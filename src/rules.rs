//! The Horizons prompt table
//!
//! Everything the driver knows about the service's wording lives here. Each
//! [`PromptRule`] says in which stages a prompt may appear, what to answer,
//! and where the negotiation goes next. The table is ordered by priority:
//! rejections and structural prompts come before the generic prompts they
//! could be mistaken for. When the service changes its wording, this table
//! (and [`PROMPT_TABLE_VERSION`]) is what changes.

use regex::bytes::Regex;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::matcher::Pattern;
use crate::types::Stage;

/// Revision of the prompt wording this table was recorded against
pub const PROMPT_TABLE_VERSION: &str = "horizons-telnet/4.x";

/// Revision of the transfer framing rules ([`Framing`])
pub const TRANSFER_FRAMING_VERSION: u32 = 1;

/// Record banner printed before the object menu, e.g.
/// `JPL/HORIZONS                      433 Eros (A898 PA)        2024-Jan-10`
const BANNER_PATTERN: &str = r"(?m)^[ \t]*JPL/HORIZONS[ \t]+(\S.*?)(?:[ \t]{2,}|\r?$)";

/// SPK object ID line printed before the e-mail prompt
const OBJECT_ID_PATTERN: &str = r"object ID:[ \t]*(\d+)";

/// Answer sent after a prompt is recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Send nothing
    Nothing,
    /// Fixed text
    Line(&'static str),
    /// The object identifier being retrieved
    ObjectId,
    /// Contact e-mail
    Email,
    /// Kernel start date
    StartDate,
    /// Kernel stop date
    StopDate,
    /// Record chosen from a candidate list, followed by `;`
    Selection,
}

/// Information extracted from the output around a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Nothing to extract
    Nothing,
    /// Body name from the record banner (optional)
    Target,
    /// SPK object ID (required)
    ObjectId,
    /// Candidate list of an ambiguous search
    Candidates,
}

/// How the kernel payload is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Header announces the byte count; exactly that many bytes follow
    ByteCount,
    /// Payload runs until the service closes the connection
    UntilClose,
    /// The service announces a URL; the kernel is fetched over HTTP
    DownloadUrl,
}

/// Remote rejection ending the negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Identifier resolves to no body
    ObjectNotFound,
    /// Any other fatal message, with a short reason
    Fatal(&'static str),
}

/// Where a recognized prompt leads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Remain in the current stage
    Stay,
    /// Move to the given stage
    Advance(Stage),
    /// Fail the negotiation
    Fail(Rejection),
    /// Start receiving the kernel with the given framing
    Transfer(Framing),
}

/// One entry of the prompt table
#[derive(Debug)]
pub struct PromptRule {
    /// Name used in logs
    pub name: &'static str,
    /// What the prompt looks like
    pub pattern: Pattern,
    /// Stages in which the prompt is expected
    pub stages: &'static [Stage],
    /// What to extract before answering
    pub capture: Capture,
    /// What to answer
    pub reply: Reply,
    /// Where to go next
    pub outcome: Outcome,
}

const SEARCH: &[Stage] = &[Stage::SubmitObjectId, Stage::ResolveAmbiguity];

/// The prompt table, in priority order
pub static PROMPT_RULES: &[PromptRule] = &[
    PromptRule {
        name: "no_matches",
        pattern: Pattern::Literal("No matches found"),
        stages: SEARCH,
        capture: Capture::Nothing,
        reply: Reply::Nothing,
        outcome: Outcome::Fail(Rejection::ObjectNotFound),
    },
    PromptRule {
        name: "date_rejected",
        pattern: Pattern::Literal("Cannot interpret date"),
        stages: &[Stage::SubmitDateRange],
        capture: Capture::Nothing,
        reply: Reply::Nothing,
        outcome: Outcome::Fail(Rejection::Fatal("service rejected the date")),
    },
    PromptRule {
        name: "candidate_list",
        pattern: Pattern::Regex(r"To SELECT, enter record #[^\r\n]*"),
        stages: SEARCH,
        capture: Capture::Candidates,
        reply: Reply::Selection,
        outcome: Outcome::Advance(Stage::ResolveAmbiguity),
    },
    PromptRule {
        name: "main_prompt",
        pattern: Pattern::Literal("Horizons>"),
        stages: &[Stage::AwaitMainMenu],
        capture: Capture::Nothing,
        reply: Reply::Line("PAGE"),
        outcome: Outcome::Advance(Stage::SubmitObjectId),
    },
    PromptRule {
        name: "paging_off",
        pattern: Pattern::Regex(r"(?s-u)PAGING toggled OFF.*?Horizons>"),
        stages: &[Stage::SubmitObjectId],
        capture: Capture::Nothing,
        reply: Reply::ObjectId,
        outcome: Outcome::Stay,
    },
    PromptRule {
        name: "continue_search",
        pattern: Pattern::Regex(r"Continue \[[^\]\r\n]*\]"),
        stages: SEARCH,
        capture: Capture::Nothing,
        reply: Reply::Line("yes"),
        outcome: Outcome::Stay,
    },
    PromptRule {
        name: "object_menu",
        pattern: Pattern::Literal("[S]PK"),
        stages: SEARCH,
        capture: Capture::Target,
        reply: Reply::Line("s"),
        outcome: Outcome::Advance(Stage::ConfirmEphemerisParams),
    },
    PromptRule {
        name: "email_prompt",
        pattern: Pattern::Literal("Enter your Internet e-mail address"),
        stages: &[Stage::ConfirmEphemerisParams],
        capture: Capture::ObjectId,
        reply: Reply::Email,
        outcome: Outcome::Stay,
    },
    PromptRule {
        name: "email_confirm",
        pattern: Pattern::Literal("Confirm e-mail address"),
        stages: &[Stage::ConfirmEphemerisParams],
        capture: Capture::Nothing,
        reply: Reply::Line("yes"),
        outcome: Outcome::Stay,
    },
    PromptRule {
        name: "text_format",
        pattern: Pattern::Literal("SPK text transfer format"),
        stages: &[Stage::ConfirmEphemerisParams],
        capture: Capture::Nothing,
        reply: Reply::Line("NO"),
        outcome: Outcome::Advance(Stage::SubmitDateRange),
    },
    PromptRule {
        name: "start_date",
        pattern: Pattern::Literal("SPK object START"),
        stages: &[Stage::SubmitDateRange],
        capture: Capture::Nothing,
        reply: Reply::StartDate,
        outcome: Outcome::Stay,
    },
    PromptRule {
        name: "stop_date",
        pattern: Pattern::Literal("SPK object STOP"),
        stages: &[Stage::SubmitDateRange],
        capture: Capture::Nothing,
        reply: Reply::StopDate,
        outcome: Outcome::Advance(Stage::SubmitOutputOptions),
    },
    PromptRule {
        name: "more_objects",
        pattern: Pattern::Literal("Add more objects to file"),
        stages: &[Stage::SubmitOutputOptions],
        capture: Capture::Nothing,
        reply: Reply::Line("no"),
        outcome: Outcome::Advance(Stage::AwaitTransferStart),
    },
    PromptRule {
        name: "binary_byte_count",
        pattern: Pattern::Regex(r"SPK binary transfer: (\d+) bytes\r?\n"),
        stages: &[Stage::AwaitTransferStart],
        capture: Capture::Nothing,
        reply: Reply::Nothing,
        outcome: Outcome::Transfer(Framing::ByteCount),
    },
    PromptRule {
        name: "binary_until_close",
        pattern: Pattern::Regex(r"SPK binary transfer: begin\r?\n"),
        stages: &[Stage::AwaitTransferStart],
        capture: Capture::Nothing,
        reply: Reply::Nothing,
        outcome: Outcome::Transfer(Framing::UntilClose),
    },
    PromptRule {
        name: "download_url",
        pattern: Pattern::Regex(r"((?:https?|ftp)://[!-~]+)\r?\n"),
        stages: &[Stage::AwaitTransferStart],
        capture: Capture::Nothing,
        reply: Reply::Line("quit"),
        outcome: Outcome::Transfer(Framing::DownloadUrl),
    },
];

/// Rules valid in `stage`, in priority order, with their table index
pub fn rules_for(stage: Stage) -> impl Iterator<Item = (usize, &'static PromptRule)> {
    PROMPT_RULES
        .iter()
        .enumerate()
        .filter(move |(_, rule)| rule.stages.contains(&stage))
}

/// Stage reached by applying `outcome` in `current`
pub fn next_stage(current: Stage, outcome: Outcome) -> Stage {
    match outcome {
        Outcome::Stay => current,
        Outcome::Advance(stage) => stage,
        Outcome::Fail(_) => Stage::Failed,
        Outcome::Transfer(_) => Stage::ReceivingFile,
    }
}

/// Every stage reachable from `stage` in one step
///
/// Besides the table, any stage can fail (timeout, lost connection), the
/// initial stage reaches the main menu once connected, and a transfer ends in
/// `Done`.
pub fn valid_next_stages(stage: Stage) -> Vec<Stage> {
    let mut next: Vec<Stage> = match stage {
        Stage::Connecting => vec![Stage::AwaitMainMenu],
        Stage::ReceivingFile => vec![Stage::Done],
        Stage::Done | Stage::Failed => return Vec::new(),
        _ => rules_for(stage)
            .map(|(_, rule)| next_stage(stage, rule.outcome))
            .collect(),
    };
    next.push(Stage::Failed);
    next.sort_by_key(|s| s.as_str());
    next.dedup();
    next
}

/// Compiled form of the table and the transcript patterns
#[derive(Debug)]
pub(crate) struct CompiledTable {
    /// One regex per entry of [`PROMPT_RULES`], same order
    pub prompts: Vec<Regex>,
    pub banner: Regex,
    pub object_id: Regex,
}

static COMPILED: LazyLock<std::result::Result<CompiledTable, regex::Error>> =
    LazyLock::new(|| {
        Ok(CompiledTable {
            prompts: PROMPT_RULES
                .iter()
                .map(|rule| rule.pattern.compile())
                .collect::<std::result::Result<_, _>>()?,
            banner: Regex::new(BANNER_PATTERN)?,
            object_id: Regex::new(OBJECT_ID_PATTERN)?,
        })
    });

/// The process-wide compiled table
pub(crate) fn compiled() -> Result<&'static CompiledTable> {
    (*COMPILED).as_ref().map_err(|e| Error::Config {
        message: format!("invalid prompt pattern: {e}"),
        key: Some("prompt_table".to_string()),
    })
}
