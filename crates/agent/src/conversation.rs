use std::sync::OnceLock;

use regex::Regex;

use fleet_core::domain::event::EventId;

const TAX_HELP_KEYWORDS: &[&str] =
    &["tax", "w-2", "w2", "1099", "1098", "refund", "irs", "filing", "accountant"];

const ADDRESS_QUESTION_PATTERNS: &[&str] = &[
    "my email",
    "what email",
    "email address",
    "whats my email",
    "what's my email",
    "my address",
    "receive email",
    "send me email",
    "email me at",
];

const ACTION_KEYWORDS: &[&str] = &["email", "mail", "send"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    EmailAddress,
    ShowSummary,
    ClearDocuments,
    Inbox,
    Reply { event_id: EventId, text: String },
    Confirm,
    Cancel,
    LinkAccount,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::EmailAddress => "email_address",
            Self::ShowSummary => "show_summary",
            Self::ClearDocuments => "clear_documents",
            Self::Inbox => "inbox",
            Self::Reply { .. } => "reply",
            Self::Confirm => "confirm",
            Self::Cancel => "cancel",
            Self::LinkAccount => "link_account",
        }
    }
}

/// What the body of an extracted mail proposal should be.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DraftBody {
    /// The user's rendered document summary.
    Summary,
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionDraft {
    pub to: String,
    pub body: DraftBody,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageIntent {
    Command(Command),
    Proposal(ActionDraft),
    Chat,
}

/// Classifies one inbound text. Commands win over proposals, proposals win
/// over free-form chat.
pub fn classify(text: &str) -> MessageIntent {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return MessageIntent::Chat;
    }

    if let Some(command) = exact_command(&normalized) {
        return MessageIntent::Command(command);
    }
    if let Some(command) = reply_command(text) {
        return MessageIntent::Command(command);
    }
    if is_address_question(&normalized) {
        return MessageIntent::Command(Command::EmailAddress);
    }
    if normalized.contains("show summary") {
        return MessageIntent::Command(Command::ShowSummary);
    }
    if let Some(draft) = extract_action_draft(text, &normalized) {
        return MessageIntent::Proposal(draft);
    }
    if normalized.contains("clear") && normalized.contains("document") {
        return MessageIntent::Command(Command::ClearDocuments);
    }
    if is_tax_help_request(&normalized) {
        return MessageIntent::Command(Command::Help);
    }

    MessageIntent::Chat
}

fn exact_command(normalized: &str) -> Option<Command> {
    let command = match normalized.trim_end_matches(['!', '.']) {
        "/start" => Command::Start,
        "/help" | "help" => Command::Help,
        "confirm" | "yes" | "send it" | "/confirm" => Command::Confirm,
        "cancel" | "no" | "/cancel" => Command::Cancel,
        "inbox" | "/inbox" | "show emails" | "check email" | "check emails" => Command::Inbox,
        "link account" | "/link" => Command::LinkAccount,
        "clear documents" | "clear docs" => Command::ClearDocuments,
        _ => return None,
    };
    Some(command)
}

/// `reply <event-id> <text>`; the reply text keeps its original casing.
fn reply_command(text: &str) -> Option<Command> {
    let trimmed = text.trim();
    let (verb, rest) = trimmed.split_once(char::is_whitespace)?;
    if !matches!(verb.to_lowercase().as_str(), "reply" | "/reply") {
        return None;
    }

    let rest = rest.trim_start();
    let (event_id, body) = rest.split_once(char::is_whitespace)?;
    let body = body.trim();
    if event_id.is_empty() || body.is_empty() {
        return None;
    }

    Some(Command::Reply { event_id: EventId(event_id.to_owned()), text: body.to_owned() })
}

pub fn is_address_question(normalized: &str) -> bool {
    ADDRESS_QUESTION_PATTERNS.iter().any(|pattern| normalized.contains(pattern))
}

pub fn is_tax_help_request(normalized: &str) -> bool {
    TAX_HELP_KEYWORDS.iter().any(|keyword| normalized.contains(keyword))
}

fn address_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[\w.-]+@[\w.-]+\.\w+").ok()).as_ref()
}

pub fn first_address(text: &str) -> Option<String> {
    address_pattern()?.find(text).map(|found| found.as_str().to_lowercase())
}

fn extract_action_draft(text: &str, normalized: &str) -> Option<ActionDraft> {
    if !ACTION_KEYWORDS.iter().any(|keyword| normalized.contains(keyword)) {
        return None;
    }
    let to = first_address(text)?;

    if normalized.contains("summary") {
        return Some(ActionDraft { to, body: DraftBody::Summary });
    }

    Some(ActionDraft { to, body: DraftBody::Text(message_body(text)) })
}

/// Text following `saying`, `that` or `:`; the whole message otherwise.
fn message_body(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut best: Option<usize> = None;
    for marker in [" saying ", " that ", ":"] {
        if let Some(position) = lowered.find(marker) {
            let end = position + marker.len();
            best = Some(best.map_or(end, |current| current.min(end)));
        }
    }

    // Markers are ASCII, so byte offsets in the lowered text line up with the original.
    let body = best
        .filter(|end| text.is_char_boundary(*end) && lowered.len() == text.len())
        .map(|end| text[end..].trim())
        .filter(|body| !body.is_empty());

    body.unwrap_or_else(|| text.trim()).to_owned()
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
