//! Message and callback handlers registered in the teloxide Dispatcher.

use std::sync::Arc;

use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use tracing::{debug, error, warn};

use courier_compose::machine::{CompositionEvent, CompositionState, IncomingContent, TimeChoice};
use courier_compose::timepick::{custom_options, parse_local};
use courier_compose::ComposeError;
use courier_core::{OwnerId, TargetId};
use courier_scheduler::SchedulerError;
use courier_users::{Capability, CapabilityCheck, TargetDirectory, UserError};

use crate::callback::{self, CallbackAction};
use crate::context::CourierContext;
use crate::render::{self, Outgoing};

/// Typed in a private chat to finish collecting content.
pub const END_TOKEN: &str = "END";

/// Runs for every incoming `Message`.
///
/// Commands are handled in any chat; everything else only in private chats,
/// where it feeds the sender's composition session.
pub async fn handle_message(
    bot: Bot,
    msg: Message,
    ctx: Arc<CourierContext>,
) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    if from.is_bot {
        return Ok(());
    }
    let owner = OwnerId(from.id.0 as i64);
    let chat_id = msg.chat.id;

    if let Some(text) = msg.text().filter(|t| t.starts_with('/')) {
        let out = handle_command(text, owner, &msg, &ctx).await;
        send_all(&bot, chat_id, out).await;
        return Ok(());
    }

    if !msg.chat.is_private() {
        return Ok(());
    }

    let mapped = ctx
        .composer
        .handle_with(owner, Utc::now(), |state| message_event(&msg, state, &ctx))
        .await;
    let out = match mapped {
        Ok(Some(reply)) => render::reply(&reply, ctx.offset),
        Ok(None) => return Ok(()),
        Err(e) => compose_error(owner, &e),
    };
    send_all(&bot, chat_id, out).await;
    Ok(())
}

/// Runs for every inline-keyboard button press.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    ctx: Arc<CourierContext>,
) -> ResponseResult<()> {
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        warn!(error = %e, "telegram: failed to answer callback query");
    }

    let owner = OwnerId(q.from.id.0 as i64);
    let chat_id = ChatId(q.from.id.0 as i64);
    let Some(action) = q.data.as_deref().and_then(callback::parse) else {
        warn!(owner = %owner, data = ?q.data, "telegram: unrecognised callback data");
        return Ok(());
    };
    debug!(owner = %owner, ?action, "telegram: callback");

    let out = match action {
        CallbackAction::Compose(event) => compose(&ctx, owner, event).await,
        CallbackAction::ScheduleTimePicker => {
            let options = custom_options(Utc::now(), ctx.offset);
            vec![Outgoing::with_keyboard(
                format!("Pick a send time ({}):", render::zone_label(ctx.offset)),
                callback::schedule_picker(&options),
            )]
        }
        CallbackAction::DeleteTimePicker => {
            let base = ctx
                .composer
                .draft_of(owner)
                .await
                .and_then(|d| d.schedule_time)
                .map_or_else(Utc::now, |at| at.max(Utc::now()));
            let options = custom_options(base, ctx.offset);
            vec![Outgoing::with_keyboard(
                format!("Pick a delete time ({}):", render::zone_label(ctx.offset)),
                callback::delete_picker(&options),
            )]
        }
        CallbackAction::ListGroups => list_groups(&ctx, owner),
        CallbackAction::ListOperators => list_operators(&ctx, owner),
    };
    send_all(&bot, chat_id, out).await;
    Ok(())
}

/// Translate a private non-command message into a composition event for the
/// sender's current state. `None` means the message is not part of any flow.
fn message_event(
    msg: &Message,
    state: CompositionState,
    ctx: &CourierContext,
) -> Result<Option<CompositionEvent>, ComposeError> {
    let typed_time = || match msg.text() {
        Some(text) => parse_local(text, ctx.offset).map(|at| Some(TimeChoice::At(at))),
        None => Ok(None),
    };

    match state {
        CompositionState::CollectingContent => {
            let event = match msg.text() {
                Some(text) if is_end_token(text) => CompositionEvent::EndOfInput,
                _ => CompositionEvent::Content(incoming_content(msg)),
            };
            Ok(Some(event))
        }
        CompositionState::SelectingScheduleTime => {
            Ok(typed_time()?.map(CompositionEvent::SelectScheduleTime))
        }
        CompositionState::SelectingDeleteTime => {
            Ok(typed_time()?.map(CompositionEvent::SelectDeleteTime))
        }
        _ => Ok(None),
    }
}

fn is_end_token(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case(END_TOKEN)
}

fn incoming_content(msg: &Message) -> IncomingContent {
    if let Some(text) = msg.text() {
        return IncomingContent::Text(text.to_string());
    }
    if let Some(largest) = msg.photo().and_then(|sizes| sizes.last()) {
        return IncomingContent::Photo(largest.file.id.clone());
    }
    if let Some(video) = msg.video() {
        return IncomingContent::Video(video.file.id.clone());
    }
    let kind = if msg.animation().is_some() {
        "animation"
    } else if msg.sticker().is_some() {
        "sticker"
    } else if msg.document().is_some() {
        "document"
    } else if msg.voice().is_some() {
        "voice"
    } else if msg.audio().is_some() {
        "audio"
    } else if msg.video_note().is_some() {
        "video note"
    } else {
        "message"
    };
    IncomingContent::Unsupported(kind.to_string())
}

async fn compose(ctx: &CourierContext, owner: OwnerId, event: CompositionEvent) -> Vec<Outgoing> {
    match ctx.composer.handle(owner, event).await {
        Ok(reply) => render::reply(&reply, ctx.offset),
        Err(e) => compose_error(owner, &e),
    }
}

fn compose_error(owner: OwnerId, e: &ComposeError) -> Vec<Outgoing> {
    if let ComposeError::Persistence(detail) = e {
        error!(owner = %owner, %detail, "composition could not be saved");
    }
    vec![Outgoing::text(render::error(e))]
}

/// Split `/cmd@bot arg1 arg2` into `("cmd", ["arg1", "arg2"])`.
fn split_command(text: &str) -> (String, Vec<&str>) {
    let mut parts = text.split_whitespace();
    let head = parts.next().unwrap_or("");
    let name = head
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    (name, parts.collect())
}

async fn handle_command(
    text: &str,
    owner: OwnerId,
    msg: &Message,
    ctx: &CourierContext,
) -> Vec<Outgoing> {
    let (command, args) = split_command(text);
    let private = msg.chat.is_private();

    match command.as_str() {
        "start" if private => vec![Outgoing::with_keyboard(
            "Welcome. What would you like to do?",
            callback::main_menu(),
        )],
        "schedule" if private => compose(ctx, owner, CompositionEvent::Start).await,
        "cancel" if private => compose(ctx, owner, CompositionEvent::Cancel).await,
        "start" | "schedule" | "cancel" => vec![Outgoing::text(
            "Use this command in a private chat with the bot.",
        )],
        "register" => register_group(ctx, owner, msg),
        "groups" => list_groups(ctx, owner),
        "unregister" => unregister_group(ctx, owner, &args),
        "adduser" => add_operator(ctx, owner, &args),
        "grant" => set_capability(ctx, owner, &args, true),
        "revoke" => set_capability(ctx, owner, &args, false),
        "operators" => list_operators(ctx, owner),
        "jobs" => list_jobs(ctx, owner),
        "unschedule" => unschedule(ctx, owner, &args),
        _ => Vec::new(),
    }
}

fn denied(capability: Capability) -> Vec<Outgoing> {
    vec![Outgoing::text(format!(
        "⛔ This needs the {capability} permission."
    ))]
}

fn failed(what: &str, e: &dyn std::fmt::Display) -> Vec<Outgoing> {
    error!(error = %e, "{what} failed");
    vec![Outgoing::text(format!(
        "⚠️ {what} failed. Please try again later."
    ))]
}

fn register_group(ctx: &CourierContext, owner: OwnerId, msg: &Message) -> Vec<Outgoing> {
    if !ctx.operators.has_capability(owner, Capability::CanManageGroups) {
        return denied(Capability::CanManageGroups);
    }
    if !(msg.chat.is_group() || msg.chat.is_supergroup()) {
        return vec![Outgoing::text("Run /register inside the group to register.")];
    }
    let name = msg.chat.title().unwrap_or("untitled group");
    match ctx.groups.register(TargetId(msg.chat.id.0), name, Some(owner)) {
        Ok(group) => vec![Outgoing::text(format!("✅ Registered {}.", group.name))],
        Err(UserError::AlreadyExists(_)) => {
            vec![Outgoing::text("This group is already registered.")]
        }
        Err(e) => failed("Registering the group", &e),
    }
}

fn list_groups(ctx: &CourierContext, owner: OwnerId) -> Vec<Outgoing> {
    if !ctx.operators.has_capability(owner, Capability::CanManageGroups) {
        return denied(Capability::CanManageGroups);
    }
    match ctx.groups.known_targets() {
        Ok(groups) => vec![Outgoing::text(render::group_list(&groups))],
        Err(e) => failed("Listing groups", &e),
    }
}

fn unregister_group(ctx: &CourierContext, owner: OwnerId, args: &[&str]) -> Vec<Outgoing> {
    if !ctx.operators.has_capability(owner, Capability::CanManageGroups) {
        return denied(Capability::CanManageGroups);
    }
    let Some(id) = args.first().and_then(|a| a.parse::<i64>().ok()) else {
        return vec![Outgoing::text("Usage: /unregister <group id>")];
    };
    match ctx.groups.remove(TargetId(id)) {
        Ok(group) => vec![Outgoing::text(format!("Removed {}.", group.name))],
        Err(UserError::GroupNotFound(_)) => {
            vec![Outgoing::text(format!("No registered group with id {id}."))]
        }
        Err(e) => failed("Removing the group", &e),
    }
}

fn add_operator(ctx: &CourierContext, owner: OwnerId, args: &[&str]) -> Vec<Outgoing> {
    if !ctx.operators.has_capability(owner, Capability::CanManageWhitelist) {
        return denied(Capability::CanManageWhitelist);
    }
    let Some(id) = args.first().and_then(|a| a.parse::<i64>().ok()) else {
        return vec![Outgoing::text("Usage: /adduser <user id>")];
    };
    match ctx.operators.add(OwnerId(id)) {
        Ok(op) => vec![Outgoing::text(format!(
            "✅ Operator {} added. Grant permissions with /grant {} <permission>.",
            op.id, op.id
        ))],
        Err(UserError::AlreadyExists(_)) => {
            vec![Outgoing::text(format!("{id} is already an operator."))]
        }
        Err(e) => failed("Adding the operator", &e),
    }
}

fn set_capability(
    ctx: &CourierContext,
    owner: OwnerId,
    args: &[&str],
    enabled: bool,
) -> Vec<Outgoing> {
    if !ctx.operators.has_capability(owner, Capability::CanManageWhitelist) {
        return denied(Capability::CanManageWhitelist);
    }
    let usage = || {
        let names: Vec<&str> = Capability::ALL.iter().map(|c| c.as_str()).collect();
        vec![Outgoing::text(format!(
            "Usage: /{} <user id> <permission>\nPermissions: {}",
            if enabled { "grant" } else { "revoke" },
            names.join(", ")
        ))]
    };
    let (Some(id), Some(capability)) = (
        args.first().and_then(|a| a.parse::<i64>().ok()),
        args.get(1).and_then(|a| a.parse::<Capability>().ok()),
    ) else {
        return usage();
    };
    match ctx.operators.set_capability(OwnerId(id), capability, enabled) {
        Ok(()) => vec![Outgoing::text(format!(
            "✅ {capability} {} for {id}.",
            if enabled { "granted" } else { "revoked" }
        ))],
        Err(UserError::NotFound(_)) => {
            vec![Outgoing::text(format!("{id} is not an operator. Use /adduser first."))]
        }
        Err(e) => failed("Updating the permission", &e),
    }
}

fn list_operators(ctx: &CourierContext, owner: OwnerId) -> Vec<Outgoing> {
    if !ctx.operators.has_capability(owner, Capability::CanManageWhitelist) {
        return denied(Capability::CanManageWhitelist);
    }
    match ctx.operators.list() {
        Ok(ops) => vec![Outgoing::text(render::operator_list(&ops))],
        Err(e) => failed("Listing operators", &e),
    }
}

fn list_jobs(ctx: &CourierContext, owner: OwnerId) -> Vec<Outgoing> {
    if !ctx.operators.has_capability(owner, Capability::CanSchedule) {
        return denied(Capability::CanSchedule);
    }
    match ctx.jobs.list_for_owner(owner) {
        Ok(jobs) => vec![Outgoing::text(render::job_list(&jobs, ctx.offset))],
        Err(e) => failed("Listing your jobs", &e),
    }
}

fn unschedule(ctx: &CourierContext, owner: OwnerId, args: &[&str]) -> Vec<Outgoing> {
    if !ctx.operators.has_capability(owner, Capability::CanDelete) {
        return denied(Capability::CanDelete);
    }
    let Some(id) = args.first() else {
        return vec![Outgoing::text("Usage: /unschedule <job id> (see /jobs)")];
    };
    match ctx.jobs.cancel_pending(owner, id) {
        Ok(()) => vec![Outgoing::text(format!("Removed job {id}."))],
        Err(SchedulerError::JobNotFound { .. }) => vec![Outgoing::text(format!(
            "No pending job {id} of yours. Messages already sent cannot be unscheduled."
        ))],
        Err(SchedulerError::JobInFlight { .. }) => vec![Outgoing::text(format!(
            "Job {id} is being sent right now. It will still be deleted on schedule."
        ))],
        Err(e) => failed("Removing the job", &e),
    }
}

/// Send each message in order; failures are logged, not retried.
async fn send_all(bot: &Bot, chat_id: ChatId, out: Vec<Outgoing>) {
    for o in out {
        let request = bot.send_message(chat_id, o.text);
        let sent = match o.keyboard {
            Some(keyboard) => request.reply_markup(keyboard).await,
            None => request.await,
        };
        if let Err(e) = sent {
            warn!(error = %e, chat = chat_id.0, "telegram: failed to send reply");
        }
    }
}
