use owo_colors::OwoColorize;
use std::sync::OnceLock;
use supports_color::Stream;
use tracing_subscriber::EnvFilter;

use crate::command::ErrorCode;

static ANSI_ENABLED: OnceLock<bool> = OnceLock::new();

pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let ansi = detect_ansi();
    let _ = ANSI_ENABLED.set(ansi);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}

pub fn category_record() -> String {
    if ansi_enabled() {
        format!("{}", "RECORD".bright_cyan().bold())
    } else {
        "RECORD".to_string()
    }
}

pub fn category_dispatch() -> String {
    if ansi_enabled() {
        format!("{}", "DISPATCH".bright_green().bold())
    } else {
        "DISPATCH".to_string()
    }
}

pub fn category_error() -> String {
    if ansi_enabled() {
        format!("{}", "GL-ERROR".bright_red().bold())
    } else {
        "GL-ERROR".to_string()
    }
}

pub fn error_label(code: ErrorCode) -> String {
    let text = code.to_string();
    if !ansi_enabled() {
        return text;
    }

    match code {
        ErrorCode::OutOfMemory => format!("{}", text.bright_red()),
        ErrorCode::InvalidOperation => format!("{}", text.bright_magenta()),
        _ => format!("{}", text.bright_yellow()),
    }
}

fn ansi_enabled() -> bool {
    *ANSI_ENABLED.get_or_init(detect_ansi)
}

fn detect_ansi() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    supports_color::on_cached(Stream::Stdout).is_some()
}
