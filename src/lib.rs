/*!
OJT Portal: a role-based academic record server.

Admins manage users, departments, subjects and training schedules;
teachers record marks for the subjects assigned to them; students read
their own marks and reports.
*/
use time::{
    Date,
    format_description::FormatItem,
    macros::format_description,
    OffsetDateTime,
};

pub mod academic;
pub mod auth;
pub mod config;
pub mod inter;
pub mod marks;
pub mod store;
pub mod user;

/// Format of every date that crosses the wire or appears in an upload.
pub const DATE_FMT: &[FormatItem] = format_description!("[year]-[month]-[day]");

/// Today's date (UTC).
pub fn now() -> Date {
    OffsetDateTime::now_utc().date()
}

pub fn log_level_from_env() -> simplelog::LevelFilter {
    use simplelog::LevelFilter;

    let mut level_string = match std::env::var("LOG_LEVEL") {
        Err(_) => { return LevelFilter::Warn; },
        Ok(s) => s,
    };

    level_string.make_ascii_lowercase();
    match level_string.as_str() {
        "max" => LevelFilter::max(),
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Warn,
    }
}
