use std::io::IsTerminal;

use anstyle::{AnsiColor, Effects, Style};
use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

/// Human status lines go to stderr, so styling follows stderr.
pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(std::io::stderr().is_terminal())
}

pub(crate) fn resolve_output_style(stderr_is_tty: bool) -> OutputStyle {
    if stderr_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let (badge, badge_style) = match status {
                "ok" => ("[OK]", ok_style()),
                "warn" => ("[WARN]", warn_style()),
                "error" => ("[ERR]", error_style()),
                _ => ("[..]", Style::new()),
            };
            format!("{} {message}", colorize(badge_style, badge))
        }
    }
}

pub(crate) fn print_status(style: OutputStyle, status: &str, message: &str) {
    eprintln!("{}", render_status_line(style, status, message));
}

/// JSON for stdout, indented when `pretty` is set.
pub(crate) fn render_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    if pretty {
        serde_json::to_string_pretty(value).context("failed rendering JSON output")
    } else {
        serde_json::to_string(value).context("failed rendering JSON output")
    }
}

fn ok_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightGreen.into()))
        .effects(Effects::BOLD)
}

fn warn_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightYellow.into()))
        .effects(Effects::BOLD)
}

fn error_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightRed.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
