//! Text shown to operators.

use chrono::FixedOffset;
use teloxide::types::InlineKeyboardMarkup;

use courier_compose::timepick::{self, format_local};
use courier_compose::{ComposeError, Reply};
use courier_core::{MessageItem, MessageKind};
use courier_scheduler::ScheduledJob;
use courier_users::{Group, Operator};

use crate::callback;

/// Text previews are cut to this many characters.
const PREVIEW_CHARS: usize = 30;

/// One message to send back to the operator.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub text: String,
    pub keyboard: Option<InlineKeyboardMarkup>,
}

impl Outgoing {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(text: impl Into<String>, keyboard: InlineKeyboardMarkup) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }
}

pub fn reply(reply: &Reply, offset: FixedOffset) -> Vec<Outgoing> {
    match reply {
        Reply::Started => vec![Outgoing::text(
            "Send the messages to schedule: text, photos or videos. \
             Send END when done, /cancel to abort.",
        )],
        Reply::ItemRecorded { count } => vec![Outgoing::text(format!(
            "Recorded ({count}). Send the next message or END to finish."
        ))],
        Reply::ChooseTarget { items, targets } => {
            let mut out = vec![Outgoing::text(preview(items))];
            if targets.is_empty() {
                out.push(Outgoing::text(
                    "No groups are registered. Run /register inside a group, or /cancel.",
                ));
            } else {
                out.push(Outgoing::with_keyboard(
                    "Choose the target group:",
                    callback::targets(targets),
                ));
            }
            out
        }
        Reply::ChooseScheduleTime { target } => vec![Outgoing::with_keyboard(
            format!(
                "Target: {}\nWhen should it be sent? You can also type {} ({}).",
                target.name,
                timepick::INPUT_FORMAT_HINT,
                zone_label(offset)
            ),
            callback::schedule_times(),
        )],
        Reply::ConfirmAutoDelete { schedule_time } => vec![Outgoing::with_keyboard(
            format!(
                "Send time: {}\nDelete the messages automatically afterwards?",
                format_local(*schedule_time, offset)
            ),
            callback::confirm_delete(),
        )],
        Reply::ChooseDeleteTime { schedule_time } => vec![Outgoing::with_keyboard(
            format!(
                "When should they be deleted? Offsets count from the send time ({}). \
                 You can also type {}.",
                format_local(*schedule_time, offset),
                timepick::INPUT_FORMAT_HINT
            ),
            callback::delete_times(),
        )],
        Reply::Scheduled { jobs } => vec![Outgoing::text(scheduled_summary(jobs, offset))],
        Reply::NothingCollected => vec![Outgoing::text(
            "Nothing was collected. Start again with /schedule.",
        )],
        Reply::Cancelled => vec![Outgoing::text("Cancelled. Nothing was scheduled.")],
    }
}

pub fn error(e: &ComposeError) -> String {
    match e {
        ComposeError::Validation(msg) => format!("⚠️ {msg}"),
        ComposeError::PermissionDenied { .. } => {
            "⛔ You are not allowed to schedule messages.".to_string()
        }
        ComposeError::Persistence(_) => {
            "⚠️ Saving failed. Please try again in a moment.".to_string()
        }
        ComposeError::NotFound(what) => format!("❓ Not found: {what}"),
    }
}

/// Numbered list of collected items; text cut to [`PREVIEW_CHARS`].
pub fn preview(items: &[MessageItem]) -> String {
    let mut out = format!("Collected {} message(s):", items.len());
    for (i, item) in items.iter().enumerate() {
        out.push_str(&format!("\n{}. {}", i + 1, item_label(item)));
    }
    out
}

fn item_label(item: &MessageItem) -> String {
    match item.kind {
        MessageKind::Text => format!("[text] {}", truncate(&item.content, PREVIEW_CHARS)),
        MessageKind::Photo => "[photo]".to_string(),
        MessageKind::Video => "[video]".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}...")
}

fn scheduled_summary(jobs: &[ScheduledJob], offset: FixedOffset) -> String {
    let Some(first) = jobs.first() else {
        return "Nothing was scheduled.".to_string();
    };
    let mut out = format!(
        "✅ Scheduled {} message(s) for {}.",
        jobs.len(),
        format_local(first.schedule_time, offset)
    );
    if let Some(delete_at) = first.delete_time {
        out.push_str(&format!(
            "\nThey will be deleted at {}.",
            format_local(delete_at, offset)
        ));
    }
    out
}

pub fn job_list(jobs: &[ScheduledJob], offset: FixedOffset) -> String {
    if jobs.is_empty() {
        return "You have no scheduled messages.".to_string();
    }
    let mut out = String::from("Your scheduled messages:");
    for job in jobs {
        let status = if job.is_delivered() { "sent" } else { "pending" };
        out.push_str(&format!(
            "\n• {} {} → {} at {} ({status}",
            job.id,
            item_label(&job.item()),
            job.target,
            format_local(job.schedule_time, offset)
        ));
        if let Some(delete_at) = job.delete_time {
            out.push_str(&format!(", delete at {}", format_local(delete_at, offset)));
        }
        out.push(')');
    }
    out
}

pub fn group_list(groups: &[Group]) -> String {
    if groups.is_empty() {
        return "No groups are registered.".to_string();
    }
    let mut out = String::from("Registered groups:");
    for g in groups {
        out.push_str(&format!("\n• {} ({})", g.name, g.id));
    }
    out
}

pub fn operator_list(operators: &[Operator]) -> String {
    if operators.is_empty() {
        return "No operators.".to_string();
    }
    let mut out = String::from("Operators:");
    for op in operators {
        let caps: Vec<&str> = courier_users::Capability::ALL
            .into_iter()
            .filter(|c| op.has(*c))
            .map(|c| c.as_str())
            .collect();
        let caps = if caps.is_empty() {
            "none".to_string()
        } else {
            caps.join(", ")
        };
        out.push_str(&format!("\n• {}: {caps}", op.id));
    }
    out
}

pub fn zone_label(offset: FixedOffset) -> String {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let hours = secs.abs() / 3600;
    let minutes = secs.abs() % 3600 / 60;
    if minutes == 0 {
        format!("UTC{sign}{hours}")
    } else {
        format!("UTC{sign}{hours}:{minutes:02}")
    }
}
