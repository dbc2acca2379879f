//! Vela host daemon.
//!
//! Loads plugins, watches directories, optionally listens on TCP addresses and
//! runs the event loop until SIGINT/SIGTERM. File and socket events are logged
//! through a handler observing the bus.
//!
//! # Usage
//!
//! ```bash
//! velad [--plugin PATH]... [--watch DIR]... [--listen ADDR]... [--log-format pretty|compact|json]
//! ```
//!
//! Settings may also come from the environment (or a `.env` file):
//! `VELA_PLUGINS` and `VELA_WATCH` (path lists), `VELA_LISTEN`
//! (comma-separated), `VELA_LOG_FORMAT`, `VELA_LOG` (target filter), plus the
//! runtime's own `VELA_*` tuning variables.

use std::path::PathBuf;
use std::process::ExitCode;

use serde_json::Value;
use vela_core_modules::{DefaultModules, RuntimeInfo, TracingFormat, TracingModule};
use vela_events::EventPattern;
use vela_runtime::{Runtime, RuntimeConfig, RuntimeError, ShutdownReport};
use vela_services::{FileMonitorModule, SocketModule};
use vela_system::module::ModuleGroup;

const USAGE: &str = "usage: velad [--plugin PATH]... [--watch DIR]... [--listen ADDR]... [--log-format pretty|compact|json]";

#[derive(Debug, Default, PartialEq)]
struct Options {
    plugins: Vec<PathBuf>,
    watch: Vec<PathBuf>,
    listen: Vec<String>,
    log_format: TracingFormat,
    log_filter: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Command {
    Run(Options),
    Help,
}

/// Reads options from the environment first, then the command line.
fn parse_args(
    args: impl IntoIterator<Item = String>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Command, String> {
    let mut options = Options::default();
    if let Some(paths) = env("VELA_PLUGINS") {
        options.plugins.extend(std::env::split_paths(&paths));
    }
    if let Some(paths) = env("VELA_WATCH") {
        options.watch.extend(std::env::split_paths(&paths));
    }
    if let Some(addresses) = env("VELA_LISTEN") {
        options.listen.extend(
            addresses
                .split(',')
                .map(str::trim)
                .filter(|address| !address.is_empty())
                .map(String::from),
        );
    }
    if let Some(format) = env("VELA_LOG_FORMAT") {
        options.log_format = format.parse()?;
    }
    options.log_filter = env("VELA_LOG").or_else(|| env("RUST_LOG"));

    let mut args = args.into_iter();
    while let Some(flag) = args.next() {
        let mut value = || args.next().ok_or_else(|| format!("{flag} needs a value"));
        match flag.as_str() {
            "--plugin" => options.plugins.push(value()?.into()),
            "--watch" => options.watch.push(value()?.into()),
            "--listen" => options.listen.push(value()?),
            "--log-format" => options.log_format = value()?.parse()?,
            "-h" | "--help" => return Ok(Command::Help),
            other => return Err(format!("unknown argument '{other}'")),
        }
    }
    Ok(Command::Run(options))
}

fn run(options: Options) -> Result<ShutdownReport, RuntimeError> {
    let config = RuntimeConfig::from_env()?;

    let mut logging = TracingModule::new().with_format(options.log_format);
    if let Some(filter) = &options.log_filter {
        logging = logging.with_env_filter(filter);
    }
    let monitor = options
        .watch
        .into_iter()
        .fold(FileMonitorModule::new(), FileMonitorModule::watch);

    let mut builder = Runtime::builder()
        .with_config(config)
        .add_modules(DefaultModules.build().disable::<TracingModule>().add(logging))
        .add_modules(monitor);
    if !options.listen.is_empty() {
        let sockets = options
            .listen
            .into_iter()
            .fold(SocketModule::new(), SocketModule::listen);
        builder = builder.add_modules(sockets);
    }
    for plugin in options.plugins {
        builder = builder.with_plugin(plugin);
    }
    let runtime = builder.build()?;

    let handlers = runtime.handlers();
    handlers.register("log-event", |ctx| async move {
        if let Some(event) = ctx.event() {
            tracing::info!(kind = event.kind(), payload = %event.payload(), "event");
        }
        Ok(Value::Null)
    })?;
    handlers.observe(EventPattern::prefix("file."), "log-event")?;
    handlers.observe(EventPattern::prefix("socket."), "log-event")?;

    if let Some(info) = runtime.with_server(|server| server.get_global::<RuntimeInfo>().cloned()) {
        tracing::info!(
            version = info.version,
            pid = info.pid,
            services = ?runtime.services().names(),
            "velad ready"
        );
    }
    runtime.run_event_loop_blocking()
}

#[expect(
    clippy::print_stderr,
    reason = "usage and startup errors are reported before logging may be installed"
)]
fn main() -> ExitCode {
    // A missing .env file is fine.
    dotenvy::dotenv().ok();

    let options = match parse_args(std::env::args().skip(1), |key| std::env::var(key).ok()) {
        Ok(Command::Run(options)) => options,
        Ok(Command::Help) => {
            eprintln!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("velad: {err}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(options) {
        Ok(report) => {
            tracing::info!(reason = %report.reason, elapsed = ?report.elapsed, "velad stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "velad failed");
            eprintln!("velad: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn flags_extend_environment() {
        let env = |key: &str| match key {
            "VELA_PLUGINS" => Some("/opt/a.so".to_string()),
            "VELA_LISTEN" => Some("127.0.0.1:7000, ".to_string()),
            "VELA_LOG_FORMAT" => Some("json".to_string()),
            _ => None,
        };
        let command = parse_args(
            args(&["--plugin", "/opt/b.so", "--watch", "/srv/inbox"]),
            env,
        )
        .unwrap();

        assert_eq!(
            command,
            Command::Run(Options {
                plugins: vec!["/opt/a.so".into(), "/opt/b.so".into()],
                watch: vec!["/srv/inbox".into()],
                listen: vec!["127.0.0.1:7000".to_string()],
                log_format: TracingFormat::Json,
                log_filter: None,
            })
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        let none = |_: &str| None;
        assert!(parse_args(args(&["--plugin"]), none).is_err());
        assert!(parse_args(args(&["--frobnicate"]), none).is_err());
        assert!(parse_args(args(&["--log-format", "xml"]), none).is_err());
        assert_eq!(parse_args(args(&["--help"]), none), Ok(Command::Help));
    }
}
