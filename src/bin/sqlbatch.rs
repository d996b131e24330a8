use sqlbatch::config::{self, Config};
use sqlbatch::core::db::Params;
use sqlbatch::core::{DbError, Result};
use sqlbatch::fixture::DbFixture;
use std::fs;
use std::process::ExitCode;
use tracing::{error, info};

const USAGE: &str = "usage: sqlbatch [--config FILE] <database> <script.sql> [params.json]";

struct Args {
    config: Option<String>,
    database: String,
    script: String,
    params: Option<String>,
}

fn parse_args(args: &[String]) -> std::result::Result<Args, String> {
    let mut config = None;
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().ok_or("--config needs a file argument")?;
                config = Some(path.clone());
            }
            "--help" | "-h" => return Err(USAGE.to_string()),
            flag if flag.starts_with('-') && flag != "-" => {
                return Err(format!("unknown option `{}`\n{}", flag, USAGE));
            }
            _ => positional.push(arg.clone()),
        }
    }

    let mut positional = positional.into_iter();
    match (positional.next(), positional.next(), positional.next(), positional.next()) {
        (Some(database), Some(script), params, None) => Ok(Args {
            config,
            database,
            script,
            params,
        }),
        _ => Err(USAGE.to_string()),
    }
}

fn load_config(args: &Args) -> Result<Config> {
    match &args.config {
        Some(path) => config::load_config(path),
        None => config::load_default_config(),
    }
}

fn run(args: &Args, config: &Config) -> Result<()> {
    let script = fs::read_to_string(&args.script)?;
    let params = match &args.params {
        Some(path) => Some(Params::from_json_str(&fs::read_to_string(path)?)?),
        None => None,
    };

    let fixture = DbFixture::from_config(config, Some(&args.database))?;
    let mut batch = fixture.new_batch()?;

    let outcome = match &params {
        Some(params) => batch.exec_script_with(&script, params).map(Some),
        None => batch.exec_script(&script).map(|()| None),
    };

    match outcome {
        Ok(affected) => {
            batch.commit()?;
            match affected {
                Some(n) => info!(rows_affected = n, "script committed"),
                None => info!("script committed"),
            }
            Ok(())
        }
        Err(err) => {
            if batch.is_open() {
                if let Err(rollback_err) = batch.rollback() {
                    error!(error = %rollback_err, "rollback failed");
                }
            }
            Err(err)
        }
    }
}

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::from(2);
        }
    };

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    let level = match config.logging.tracing_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!(database = %args.database, script = %args.script, "starting sqlbatch");

    match run(&args, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn report(err: &DbError) {
    eprintln!("error {}: {}", err.code(), err);
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        eprintln!("  caused by: {}", cause);
        source = cause.source();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let args = parse_args(&strings(&["--config", "c.toml", "db.sqlite", "s.sql"])).unwrap();
        assert_eq!(args.config.as_deref(), Some("c.toml"));
        assert_eq!(args.database, "db.sqlite");
        assert_eq!(args.script, "s.sql");
        assert!(args.params.is_none());

        let args = parse_args(&strings(&["db.sqlite", "s.sql", "p.json"])).unwrap();
        assert_eq!(args.params.as_deref(), Some("p.json"));
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(parse_args(&strings(&["db.sqlite"])).is_err());
        assert!(parse_args(&strings(&["a", "b", "c", "d"])).is_err());
        assert!(parse_args(&strings(&["--verbose", "a", "b"])).is_err());
        assert!(parse_args(&strings(&["a", "b", "--config"])).is_err());
    }
}
