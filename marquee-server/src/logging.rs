use std::{env, fmt::Display};

use colored::Colorize;
use log::{Level, LevelFilter};

/// Installs the global logger, showing workspace logs up to `level`.
/// Other crates only get to log warnings and errors.
pub fn init_logger(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(move |out, message, record| {
            let target = Target::from_target(record.target());
            let now = chrono::Local::now();

            out.finish(format_args!(
                "{:^5} {} {:^8} {}",
                badge(record.level()),
                now.format("%H:%M:%S").to_string().bright_black(),
                target,
                message
            ))
        })
        .filter(move |meta| {
            let target = Target::from_target(meta.target());
            is_enabled(&target, meta.level(), level)
        })
        .chain(std::io::stdout())
        .apply()
}

/// Reads the level of workspace logs from `MARQUEE_LOG`, defaulting to info.
pub fn level_from_env() -> LevelFilter {
    env::var("MARQUEE_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::Info)
}

fn is_enabled(target: &Target, level: Level, local: LevelFilter) -> bool {
    if target.is_local() {
        level <= local
    } else {
        level <= Level::Warn
    }
}

#[derive(Debug, PartialEq)]
enum Target {
    External(String),
    Server,
    Collab,
    Impls,
    Core,
}

impl Target {
    fn from_target(target: &str) -> Self {
        let module = target.split("::").next().unwrap_or_default();

        match module {
            "marquee_core" => Self::Core,
            "marquee_impls" => Self::Impls,
            "marquee_server" => Self::Server,
            "marquee_collab" => Self::Collab,
            other => Target::External(other.to_string()),
        }
    }

    fn is_local(&self) -> bool {
        !matches!(self, Self::External(_))
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            Target::External(x) => x.as_str().clear(),
            Target::Server => "SERVER".bright_green(),
            Target::Collab => "COLLAB".bright_purple(),
            Target::Impls => "IMPLS".bright_cyan(),
            Target::Core => "CORE".blue(),
        };

        Display::fmt(&result, f)
    }
}

fn badge(level: Level) -> String {
    match level {
        Level::Error => " ERR ".black().on_red().bold().to_string(),
        Level::Warn => " WRN ".black().on_yellow().bold().to_string(),
        Level::Info => " INF ".black().on_blue().bold().to_string(),
        Level::Debug => " DBG ".white().on_black().to_string(),
        Level::Trace => " TRC ".to_string(),
    }
}
