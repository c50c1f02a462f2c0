//! Purpose: `lifecall` CLI entry point: hosts one service call per process.
//! Role: Binary crate root; parses args, reads the request body, writes one response line.
//! Invariants: `call` writes exactly one JSON object on stdout, always carrying `Err`.
//! Invariants: Diagnostics and logs go to stderr; usage errors are JSON on stderr when piped.
//! Invariants: Process exit code is derived from `lifecall::to_exit_code`.
use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use lifecall::core::error::USAGE_EXIT_CODE;
use lifecall::log::init_tracing;
use lifecall::{Config, DeploymentMode, Dispatcher, ErrorCode, Failure, TracingSink, to_exit_code};
use serde_json::{Value, json};

mod services;

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            USAGE_EXIT_CODE
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Failure> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Failure::new(ErrorCode::SYSTEM)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let code = if err.kind() == ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand {
                    USAGE_EXIT_CODE
                } else {
                    0
                };
                return Ok(code);
            }
            _ => {
                return Err(Failure::new(ErrorCode::INVALID_INPUT)
                    .with_message(clap_error_summary(&err))
                    .with_field("hint", "Try `lifecall --help`."));
            }
        },
    };

    let mut config = Config::from_env()?;
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    if let Some(dir) = cli.dir {
        config.state_dir = dir;
    }

    match cli.command {
        Command::Call { service, input } => call(&service, input.as_deref(), config),
        Command::Services { json } => {
            list_services(json);
            Ok(0)
        }
        Command::Version => {
            emit_json(json!({
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "mode": config.mode.as_str(),
            }));
            Ok(0)
        }
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "lifecall", &mut io::stdout());
            Ok(0)
        }
    }
}

fn call(service: &str, input: Option<&str>, config: Config) -> Result<i32, Failure> {
    init_tracing();
    let body = read_body(input)?;
    let dispatcher = Dispatcher::new(config, Arc::new(TracingSink));

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let response = dispatcher.main(
        body.as_deref(),
        |_ctx| services::create(service, dispatcher.config()),
        &mut out,
    );
    let _ = out.flush();
    Ok(to_exit_code(response.outcome))
}

/// `None` for an interactive stdin or an empty body; the dispatcher treats
/// both as absent input.
fn read_body(input: Option<&str>) -> Result<Option<Vec<u8>>, Failure> {
    let bytes = match input {
        Some(path) if path != "-" => fs::read(path).map_err(|err| {
            Failure::new(ErrorCode::INVALID_INPUT)
                .with_message("failed to read input file")
                .with_field("path", path)
                .with_source(err)
        })?,
        _ => {
            let mut stdin = io::stdin();
            if stdin.is_terminal() {
                return Ok(None);
            }
            let mut buf = Vec::new();
            stdin.read_to_end(&mut buf).map_err(|err| {
                Failure::new(ErrorCode::INVALID_INPUT)
                    .with_message("failed to read stdin")
                    .with_source(err)
            })?;
            buf
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(bytes))
}

fn list_services(as_json: bool) {
    if as_json {
        let services: Vec<Value> = services::SERVICES
            .iter()
            .map(|info| json!({ "name": info.name, "about": info.about }))
            .collect();
        emit_json(json!({ "services": services }));
        return;
    }
    let width = services::SERVICES
        .iter()
        .map(|info| info.name.len())
        .max()
        .unwrap_or(0);
    for info in services::SERVICES {
        println!("{:width$}  {}", info.name, info.about);
    }
}

#[derive(Parser)]
#[command(
    name = "lifecall",
    version,
    about = "Run single-call JSON services with a fixed lifecycle",
    long_about = None,
    after_help = r#"EXAMPLES
  $ echo '{"msg":"hi"}' | lifecall call echo
  {"Err":0,"msg":"hi"}
  $ lifecall --mode local call counter --input req.json
  $ lifecall services

ERR CODES
  0 ok, 1 invalid input, 2 retry, 3 business failure, 100 system"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        help = "State directory for stateful services (default: $LIFECALL_DIR or ~/.lifecall)",
        value_hint = ValueHint::DirPath
    )]
    dir: Option<PathBuf>,
    #[arg(
        long,
        value_enum,
        help = "Deployment mode: local|staging|live (default: $LIFECALL_MODE or live)"
    )]
    mode: Option<ModeArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    #[value(alias = "dev")]
    Local,
    #[value(alias = "verbose")]
    Staging,
    #[value(aliases = ["production", "prod"])]
    Live,
}

impl From<ModeArg> for DeploymentMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Local => DeploymentMode::Local,
            ModeArg::Staging => DeploymentMode::Staging,
            ModeArg::Live => DeploymentMode::Live,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run one call; the request body is read from --input or stdin.
    Call {
        #[arg(help = "Service name (see `lifecall services`)")]
        service: String,
        #[arg(
            short = 'i',
            long,
            help = "Request body file, or - for stdin",
            value_hint = ValueHint::FilePath
        )]
        input: Option<String>,
    },
    /// List hosted services.
    Services {
        #[arg(long, help = "Emit JSON")]
        json: bool,
    },
    /// Print version info as JSON.
    Version,
    /// Generate shell completion scripts.
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn emit_json(value: Value) {
    let text = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    };
    println!(
        "{}",
        text.unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
    );
}

fn emit_error(err: &Failure) {
    let message = err.message().unwrap_or("usage error");
    let hint = err.fields().get("hint").and_then(Value::as_str);
    if io::stderr().is_terminal() {
        eprintln!("error: {message}");
        if let Some(hint) = hint {
            eprintln!("hint: {hint}");
        }
        return;
    }

    let mut error = json!({ "code": err.code(), "message": message });
    for (key, value) in err.fields() {
        error[key] = value.clone();
    }
    if let Some(source) = std::error::Error::source(err) {
        error["cause"] = Value::from(source.to_string());
    }
    let text = serde_json::to_string(&json!({ "error": error })).unwrap_or_else(|_| {
        "{\"error\":{\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{text}");
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
