use std::path::PathBuf;
use std::process;
use std::time::Duration;

use slotd::{SLOTD_VERSION, SchedulerConfig, ServerConfig, ViolationPolicy};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "\
Usage: slotd <num_clients> [options]

Arguments:
  <num_clients>           Number of client connections to accept before scheduling

Options:
  --host <addr>           Listen address [default: 0.0.0.0]
  --port <port>           Listen port [default: 9000]
  --nodes <path>          Node address table [default: eth_scheduler.txt]
  --guard-ms <ms>         Guard interval between grants [default: 700]
  --seed <n>              Seed arbitration for reproducible runs
  --isolate-violations    Drop a misbehaving client instead of stopping";

#[derive(Debug)]
struct Args {
    server: ServerConfig,
    scheduler: SchedulerConfig,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("{USAGE}");
            process::exit(1);
        }
    };

    init_tracing();
    info!("slotd {}", SLOTD_VERSION);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            process::exit(1);
        }
    };

    // The scheduler only returns on a fatal error.
    if let Err(e) = runtime.block_on(slotd::serve(args.server, args.scheduler)) {
        error!(error = %format!("{e:#}"), "Scheduler stopped");
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut server = ServerConfig::default();
    let mut scheduler = SchedulerConfig::new();
    let mut num_clients: Option<usize> = None;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                i += 1;
                server.host = args.get(i).ok_or("--host requires a value")?.clone();
            }
            "--port" => {
                i += 1;
                server.port = parse_value(args.get(i), "--port")?;
            }
            "--nodes" => {
                i += 1;
                server.node_table = PathBuf::from(args.get(i).ok_or("--nodes requires a value")?);
            }
            "--guard-ms" => {
                i += 1;
                let ms: u64 = parse_value(args.get(i), "--guard-ms")?;
                scheduler = scheduler.with_guard_interval(Duration::from_millis(ms));
            }
            "--seed" => {
                i += 1;
                scheduler = scheduler.with_seed(parse_value(args.get(i), "--seed")?);
            }
            "--isolate-violations" => {
                scheduler = scheduler.with_violation_policy(ViolationPolicy::Isolate);
            }
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => {
                if num_clients.is_some() {
                    return Err(format!("unexpected argument: {arg}"));
                }
                let n: usize = arg
                    .parse()
                    .map_err(|_| format!("invalid client count '{arg}'"))?;
                if n == 0 {
                    return Err("client count must be at least 1".to_string());
                }
                num_clients = Some(n);
            }
        }
        i += 1;
    }

    server.num_clients = num_clients.ok_or("missing required argument: <num_clients>")?;
    Ok(Args { server, scheduler })
}

fn parse_value<T: std::str::FromStr>(value: Option<&String>, flag: &str) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{flag} requires a value"))?;
    value
        .parse()
        .map_err(|_| format!("invalid value for {flag}: '{value}'"))
}

/// Initialize tracing with SLOTD_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("SLOTD_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        // Per-frame codec traces are only useful when asked for explicitly.
        let codec_level = if level == "trace" { "trace" } else { "off" };
        EnvFilter::new(format!(
            "slotd={level},slotd_server={level},slotd::bridge::codec={codec_level}"
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}
