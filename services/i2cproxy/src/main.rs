//! I2C proxy service
//!
//! `i2cproxy -p <port> -b <bus>` serves commands on `port` and poll results
//! on `port + 1`.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use common::service_bootstrap::{print_settings, print_startup_banner, ServiceInfo};
use common::shutdown::cancel_on_signal;
use errors::{ProxyError, ProxyResult};
use i2cproxy::bootstrap::{self, Args, SERVICE_NAME};
use i2cproxy::{ProxyConfig, ProxyService};

fn main() -> ExitCode {
    let args = Args::parse();

    let code = match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if matches!(e, ProxyError::Logging(_)) {
                eprintln!("ERROR => {}", e);
            } else {
                error!("[{}] {}", e.error_code(), e);
            }
            ExitCode::FAILURE
        },
    };
    common::logging::shutdown();
    code
}

fn run(args: Args) -> ProxyResult<()> {
    let ports = args.ports()?;

    // Fork before any runtime thread exists
    if args.daemonize {
        bootstrap::daemonize(&args.log_path)?;
    }
    bootstrap::initialize_logging(&args)?;

    let service_info = ServiceInfo::new(
        SERVICE_NAME,
        env!("CARGO_PKG_VERSION"),
        "I2C register bus proxy with scheduled polling",
    );
    if !args.no_color && !args.daemonize {
        print_startup_banner(&service_info);
    }
    print_settings(&args.startup_settings(ports));

    let config = ProxyConfig::load(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let service = ProxyService::bind(&config, ports, args.bus, &args.backend())?;

        let cancel = CancellationToken::new();
        let signal_task = tokio::spawn(cancel_on_signal(cancel.clone()));

        let result = service.run(cancel.clone()).await;
        cancel.cancel();
        let _ = signal_task.await;
        info!("{} stopped", SERVICE_NAME);
        result
    })
}
