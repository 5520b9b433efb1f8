//! Inline keyboards and the callback data they carry.
//!
//! | data                  | meaning                                  |
//! |-----------------------|------------------------------------------|
//! | `menu_schedule`       | start a composition                      |
//! | `menu_groups`         | list registered groups                   |
//! | `menu_operators`      | list operators                           |
//! | `group_<chat id>`     | pick the target                          |
//! | `time_30s/5m/1h`      | send offset from now                     |
//! | `time_custom`         | open the send-time picker                |
//! | `time_at_<unix>`      | absolute send time                       |
//! | `delete_yes/no`       | auto-delete confirmation                 |
//! | `deltime_30s/5m/1h`   | delete offset from the send time         |
//! | `deltime_custom`      | open the delete-time picker              |
//! | `deltime_at_<unix>`   | absolute delete time                     |
//! | `cancel`              | abandon the composition                  |

use chrono::{DateTime, Utc};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use courier_compose::machine::{CompositionEvent, TimeChoice};
use courier_compose::timepick::TimeOption;
use courier_core::TargetId;
use courier_users::Group;

const TIME_AT: &str = "time_at_";
const DELTIME_AT: &str = "deltime_at_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Compose(CompositionEvent),
    ScheduleTimePicker,
    DeleteTimePicker,
    ListGroups,
    ListOperators,
}

pub fn parse(data: &str) -> Option<CallbackAction> {
    use CallbackAction::*;
    use CompositionEvent as E;

    let action = match data {
        "menu_schedule" => Compose(E::Start),
        "menu_groups" => ListGroups,
        "menu_operators" => ListOperators,
        "cancel" => Compose(E::Cancel),
        "time_custom" => ScheduleTimePicker,
        "deltime_custom" => DeleteTimePicker,
        "delete_yes" => Compose(E::ConfirmAutoDelete(true)),
        "delete_no" => Compose(E::ConfirmAutoDelete(false)),
        _ => {
            if let Some(rest) = data.strip_prefix(TIME_AT) {
                Compose(E::SelectScheduleTime(TimeChoice::At(parse_unix(rest)?)))
            } else if let Some(rest) = data.strip_prefix(DELTIME_AT) {
                Compose(E::SelectDeleteTime(TimeChoice::At(parse_unix(rest)?)))
            } else if let Some(rest) = data.strip_prefix("time_") {
                Compose(E::SelectScheduleTime(parse_offset(rest)?))
            } else if let Some(rest) = data.strip_prefix("deltime_") {
                Compose(E::SelectDeleteTime(parse_offset(rest)?))
            } else if let Some(rest) = data.strip_prefix("group_") {
                Compose(E::SelectTarget(TargetId(rest.parse().ok()?)))
            } else {
                return None;
            }
        }
    };
    Some(action)
}

fn parse_offset(s: &str) -> Option<TimeChoice> {
    match s {
        "30s" => Some(TimeChoice::In30Seconds),
        "5m" => Some(TimeChoice::In5Minutes),
        "1h" => Some(TimeChoice::In1Hour),
        _ => None,
    }
}

fn parse_unix(s: &str) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(s.parse().ok()?, 0)
}

fn button(label: impl Into<String>, data: impl Into<String>) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label.into(), data.into())
}

fn cancel_row() -> Vec<InlineKeyboardButton> {
    vec![button("Cancel", "cancel")]
}

pub fn main_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("📅 Schedule a message", "menu_schedule")],
        vec![button("👥 Groups", "menu_groups")],
        vec![button("⚙️ Operators", "menu_operators")],
    ])
}

pub fn targets(groups: &[Group]) -> InlineKeyboardMarkup {
    let mut rows: Vec<_> = groups
        .iter()
        .map(|g| vec![button(g.name.clone(), format!("group_{}", g.id))])
        .collect();
    rows.push(cancel_row());
    InlineKeyboardMarkup::new(rows)
}

pub fn schedule_times() -> InlineKeyboardMarkup {
    offset_keyboard("time_")
}

pub fn delete_times() -> InlineKeyboardMarkup {
    offset_keyboard("deltime_")
}

fn offset_keyboard(prefix: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("In 30 seconds", format!("{prefix}30s"))],
        vec![button("In 5 minutes", format!("{prefix}5m"))],
        vec![button("In 1 hour", format!("{prefix}1h"))],
        vec![button("Custom time", format!("{prefix}custom"))],
        cancel_row(),
    ])
}

pub fn confirm_delete() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("Yes", "delete_yes"),
        button("No", "delete_no"),
    ]])
}

pub fn schedule_picker(options: &[TimeOption]) -> InlineKeyboardMarkup {
    picker(TIME_AT, options)
}

pub fn delete_picker(options: &[TimeOption]) -> InlineKeyboardMarkup {
    picker(DELTIME_AT, options)
}

fn picker(prefix: &str, options: &[TimeOption]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<_>> = options
        .chunks(2)
        .map(|pair| {
            pair.iter()
                .map(|o| button(o.label.clone(), format!("{prefix}{}", o.at.timestamp())))
                .collect()
        })
        .collect();
    rows.push(cancel_row());
    InlineKeyboardMarkup::new(rows)
}
