use std::{env, fs, path::PathBuf, process::ExitCode, time::Duration};

use quire_core::{
    config::{AddressingMode, LineSpacing, ViewMode},
    state, NavCommand, ReaderConfig, ReaderSession,
};
use tracing_appender::non_blocking::WorkerGuard;

const LOG_FILE: &str = "quire.log";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

struct Args {
    path: PathBuf,
    width: Option<usize>,
    height: Option<usize>,
    page: Option<usize>,
    chapter: Option<usize>,
    count: usize,
    mode: Option<AddressingMode>,
    spacing: Option<LineSpacing>,
    split: bool,
}

fn usage() -> &'static str {
    "usage: quire <file> [--width N] [--height N] [--page N] [--chapter N] [--count N] \
     [--mode dynamic|absolute] [--spacing compact|normal|relaxed] [--split]"
}

fn parse_args() -> Result<Args, String> {
    let mut args = env::args().skip(1);
    let mut parsed = Args {
        path: PathBuf::new(),
        width: None,
        height: None,
        page: None,
        chapter: None,
        count: 1,
        mode: None,
        spacing: None,
        split: false,
    };
    let mut path = None;
    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| format!("{name} needs a value"))
        };
        match arg.as_str() {
            "--width" => parsed.width = Some(number(&value("--width")?)?),
            "--height" => parsed.height = Some(number(&value("--height")?)?),
            "--page" => parsed.page = Some(number(&value("--page")?)?),
            "--chapter" => parsed.chapter = Some(number(&value("--chapter")?)?),
            "--count" => parsed.count = number(&value("--count")?)?.max(1),
            "--mode" => {
                parsed.mode = Some(match value("--mode")?.as_str() {
                    "dynamic" => AddressingMode::Dynamic,
                    "absolute" => AddressingMode::Absolute,
                    other => return Err(format!("unknown mode {other}")),
                })
            }
            "--spacing" => {
                parsed.spacing = Some(match value("--spacing")?.as_str() {
                    "compact" => LineSpacing::Compact,
                    "normal" => LineSpacing::Normal,
                    "relaxed" => LineSpacing::Relaxed,
                    other => return Err(format!("unknown spacing {other}")),
                })
            }
            "--split" => parsed.split = true,
            "-h" | "--help" => return Err(usage().to_string()),
            _ if path.is_none() && !arg.starts_with("--") => path = Some(PathBuf::from(&arg)),
            other => return Err(format!("unexpected argument {other}\n{}", usage())),
        }
    }
    parsed.path = path.ok_or_else(|| usage().to_string())?;
    Ok(parsed)
}

fn number(text: &str) -> Result<usize, String> {
    text.parse()
        .map_err(|_| format!("{text} is not a number"))
}

/// Log to a file in the cache directory; stdout carries the pages.
fn configure_logging() -> Option<WorkerGuard> {
    let log_dir = quire_core::config::cache_root()?;
    fs::create_dir_all(&log_dir).ok()?;
    let file_appender = tracing_appender::rolling::never(&log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;
    Some(guard)
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(2);
        }
    };
    let _log_guard = configure_logging();

    let mut config = ReaderConfig::load();
    if let Some(mode) = args.mode {
        config.page_numbering_mode = mode;
    }
    if let Some(spacing) = args.spacing {
        config.line_spacing = spacing;
    }
    if args.split {
        config.view_mode = ViewMode::Split;
    }

    let (term_w, term_h) = crossterm::terminal::size().unwrap_or((80, 24));
    let width = args.width.unwrap_or(term_w as usize);
    let height = args.height.unwrap_or(term_h as usize);

    let mut session = match ReaderSession::open(&args.path, config, width, height, |done, total| {
        tracing::debug!(done, total, "paginating");
    }) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("Failed to open {}: {err}", args.path.display());
            return ExitCode::FAILURE;
        }
    };

    let explicit = args.page.is_some() || args.chapter.is_some();
    if let (Some(dir), false) = (state::state_dir(), explicit) {
        session.remember_positions(dir);
    }
    if let Some(chapter) = args.chapter {
        session.navigate(NavCommand::Chapter(chapter.saturating_sub(1)));
    }
    if let Some(page) = args.page {
        // Pages are 1-based on the command line.
        for _ in 1..page {
            if !session.navigate(NavCommand::NextPage) {
                break;
            }
        }
    }

    for idx in 0..args.count {
        if idx > 0 && !session.navigate(NavCommand::NextPage) {
            break;
        }
        match session.render_plain() {
            Ok(rows) => {
                for row in rows {
                    println!("{row}");
                }
            }
            Err(err) => {
                eprintln!("Failed to render page: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Err(err) = session.close(SHUTDOWN_TIMEOUT) {
        tracing::warn!(error = %err, "cache writer did not finish");
    }
    ExitCode::SUCCESS
}
