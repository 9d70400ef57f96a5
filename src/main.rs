//! Prints a line-oriented report of an ext2 image's structure.
//!
//! Exits 0 on success, 1 on bad invocation and 2 when the image is corrupt or
//! unsupported.

use std::env::VarError;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use ext2::report::{self, ReportSummary};
use ext2::{Ext2Error, FileDevice, FileSystem};

mod ansiterm;
mod logging;

const BAD_INVOCATION: u8 = 1;
const BAD_IMAGE: u8 = 2;

#[derive(Debug, PartialEq, Eq)]
struct Config {
    image_path: PathBuf,
    log_level: log::LevelFilter,
}

impl Config {
    /// Environment variable holding the log level: off, error, warn, info,
    /// debug or trace.
    const LOG_ENV: &'static str = "EXT2_INSPECT_LOG";

    const DEFAULT_LOG_LEVEL: log::LevelFilter = log::LevelFilter::Warn;

    fn from_env() -> Result<Self, String> {
        let args: Vec<String> = std::env::args().collect();
        Self::parse(&args, std::env::var(Self::LOG_ENV))
    }

    fn parse(args: &[String], log_env: Result<String, VarError>) -> Result<Self, String> {
        let image_path = match args {
            [_, image_path] => PathBuf::from(image_path),
            _ => {
                let program = args.first().map_or("ext2-inspect", String::as_str);
                return Err(format!("Usage: {program} <image_file>"));
            }
        };

        let log_level = match log_env {
            Ok(value) => value
                .parse()
                .map_err(|_| format!("{}: unknown log level {value:?}", Self::LOG_ENV))?,
            Err(VarError::NotPresent) => Self::DEFAULT_LOG_LEVEL,
            Err(VarError::NotUnicode(value)) => {
                return Err(format!("{}: unknown log level {value:?}", Self::LOG_ENV))
            }
        };

        Ok(Self {
            image_path,
            log_level,
        })
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(BAD_INVOCATION);
        }
    };
    if let Err(err) = logging::init(config.log_level) {
        eprintln!("failed to install logger: {err}");
        return ExitCode::from(BAD_INVOCATION);
    }

    let device = match FileDevice::open(&config.image_path) {
        Ok(device) => device,
        Err(err) => {
            eprintln!("{}: {err}", config.image_path.display());
            return ExitCode::from(BAD_INVOCATION);
        }
    };

    match run(device) {
        Ok(summary) if summary.skipped.is_empty() => ExitCode::SUCCESS,
        Ok(summary) => {
            log::error!(
                "{} corrupt entities left out of the report",
                summary.skipped.len()
            );
            ExitCode::from(BAD_IMAGE)
        }
        Err(err) => {
            let bold = ansiterm::BOLD;
            let clear = ansiterm::CLEAR_FORMAT;
            eprintln!("{bold}error:{clear} {err} ({:?})", err.kind());
            ExitCode::from(BAD_IMAGE)
        }
    }
}

fn run<R>(device: FileDevice<R>) -> Result<ReportSummary, Ext2Error>
where
    R: io::Read + io::Seek + std::fmt::Debug,
{
    let mut fs = FileSystem::open(device)?;

    let mut out = BufWriter::new(io::stdout().lock());
    let mut write_result = Ok(());
    let summary = report::generate(&mut fs, |record| {
        if write_result.is_ok() {
            write_result = writeln!(out, "{record}");
        }
    })?;
    write_result?;
    out.flush()?;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<String> {
        args.iter().map(|&arg| arg.to_owned()).collect()
    }

    #[test]
    fn exactly_one_image_path() {
        let config = Config::parse(&args(&["ext2-inspect", "disk.img"]), Err(VarError::NotPresent)).unwrap();
        assert_eq!(config.image_path, PathBuf::from("disk.img"));
        assert_eq!(config.log_level, log::LevelFilter::Warn);

        assert!(Config::parse(&args(&["ext2-inspect"]), Err(VarError::NotPresent)).is_err());
        assert!(Config::parse(&args(&["ext2-inspect", "a", "b"]), Err(VarError::NotPresent)).is_err());
        assert!(Config::parse(&[], Err(VarError::NotPresent)).is_err());
    }

    #[test]
    fn log_level_from_environment() {
        let argv = args(&["ext2-inspect", "disk.img"]);
        let config = Config::parse(&argv, Ok("debug".to_owned())).unwrap();
        assert_eq!(config.log_level, log::LevelFilter::Debug);
        let config = Config::parse(&argv, Ok("off".to_owned())).unwrap();
        assert_eq!(config.log_level, log::LevelFilter::Off);

        let err = Config::parse(&argv, Ok("loud".to_owned())).unwrap_err();
        assert!(err.contains("EXT2_INSPECT_LOG"));
    }
}
