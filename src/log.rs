//! This module provides leveled logging to std out
use chrono::Local;

#[derive(PartialOrd, PartialEq)]
pub enum Level {
    Off,
    Fatal,
    Error,
    Warning,
    Info,
    Debug,
}

impl ToString for Level {
    fn to_string(&self) -> String {
        match self {
            Level::Off => "".to_string(),
            Level::Debug => "DEBUG".to_string(),
            Level::Info => "INFO".to_string(),
            Level::Warning => "WARN".to_string(),
            Level::Error => "ERROR".to_string(),
            Level::Fatal => "FATAL".to_string(),
        }
    }
}

// Global log Level
const LOGLEVEL: Level = Level::Info;

pub fn log(level: &Level, s: &str) {
    let dt = Local::now().to_rfc3339();
    match level {
        Level::Off => (),
        _ => println!("[{}] [{}] {}", dt, level.to_string(), s),
    }
}

pub fn debug(s: &str) {
    if Level::Debug <= LOGLEVEL {
        log(&Level::Debug, s);
    }
}

pub fn info(s: &str) {
    if Level::Info <= LOGLEVEL {
        log(&Level::Info, s);
    }
}

pub fn warn(s: &str) {
    if Level::Warning <= LOGLEVEL {
        log(&Level::Warning, s);
    }
}

pub fn error(s: &str) {
    if Level::Error <= LOGLEVEL {
        log(&Level::Error, s);
    }
}

pub fn fatal(s: &str) {
    if Level::Fatal <= LOGLEVEL {
        log(&Level::Fatal, s);
    }
}
