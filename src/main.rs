//! mesh-node daemon entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load daemon settings, apply `-n`
//!   3. Init logger once (`-v` flags > env > settings)
//!   4. Build the option tree: `-o` options, `[options]`, then `meshnode.conf`
//!   5. Bring the network up; on failure tear down what was built and exit 1
//!   6. Wait for Ctrl-C, then tear down

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mesh_node::config::{self, ConfigTree, Layer};
use mesh_node::error::AppError;
use mesh_node::hooks::ScriptExecutor;
use mesh_node::logger;
use mesh_node::net::graph::ReachabilityLog;
use mesh_node::net::{NetContext, Network};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Optional file.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let mut settings = config::load(args.config_path.as_deref())?;
    if let Some(net) = &args.netname {
        settings.set_netname(net)?;
    }

    let effective_log_level = args.log_level.unwrap_or(settings.log_level.as_str());
    logger::init(
        effective_log_level,
        args.log_level.is_some(),
        settings.log_file.as_deref(),
    )?;

    let confbase = settings.confbase();
    info!(
        confbase = %confbase.display(),
        netname = settings.netname.as_deref().unwrap_or("-"),
        effective_log_level = %effective_log_level,
        "settings loaded"
    );

    let mut tree = ConfigTree::new();
    for option in args.options.iter().chain(&settings.options) {
        tree.add_option(option)?;
    }
    tree.read_file(&settings.server_config_path(), Layer::Server)?;

    let mut network = Network::new(
        NetContext::from_config(&settings),
        tree,
        Box::new(ScriptExecutor::new(&confbase)),
        Box::new(ReachabilityLog::default()),
    );

    if let Err(e) = network.bring_up() {
        error!(error = %e, "network setup failed");
        network.tear_down();
        return Err(e);
    }

    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrlc_token.cancel();
        }
    });

    shutdown.cancelled().await;
    network.tear_down();
    Ok(())
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
    netname: Option<String>,
    options: Vec<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut netname = None;
    let mut options = Vec::new();

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: mesh-node [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Daemon settings file (default: config/default.toml)");
                println!("  -n, --net <NETNAME>        Network to join (confbase is <config_dir>/<NETNAME>)");
                println!("  -o, --option <KEY=VALUE>   Node option, overrides meshnode.conf; repeatable");
                println!("  -v, -vv                    Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => config_path = Some(required_value(&mut iter, "-f/--config", "a path")),
            "-n" | "--net" => netname = Some(required_value(&mut iter, "-n/--net", "a network name")),
            "-o" | "--option" => options.push(required_value(&mut iter, "-o/--option", "KEY=VALUE")),
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            other => {
                eprintln!("error: unrecognised argument '{other}' (try --help)");
                std::process::exit(1);
            }
        }
    }

    CliArgs {
        log_level: logger::level_for_verbosity(verbosity),
        config_path,
        netname,
        options,
    }
}

fn required_value(iter: &mut impl Iterator<Item = String>, flag: &str, what: &str) -> String {
    match iter.next() {
        Some(value) => value,
        None => {
            eprintln!("error: {flag} requires {what}");
            std::process::exit(1);
        }
    }
}
