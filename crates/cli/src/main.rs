/*
 * dynamodb-copy binary.
 *
 * Usage:
 *   dynamodb-copy --source-table orders --destination-table orders_copy
 *
 * Operational limits can be overridden through COPY__* environment
 * variables, e.g. COPY__MAX_CONNECTIONS=50.
 */

use copy_common::{exit_codes, OperationalConfig, PlanningConfig};
use copy_worker::{wait_for_signal, InterruptSignal};
use dynamodb_copy::{Cli, DynamoDbBackend, Orchestrator};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_filter());

    let operational = match OperationalConfig::load() {
        Ok(operational) => operational,
        Err(e) => {
            eprintln!("dynamodb-copy: {}", e);
            return exit(e.exit_code());
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .thread_name("copy-io")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("dynamodb-copy: failed to start the async runtime: {}", e);
            return exit(exit_codes::FAILURE);
        }
    };

    let interrupt = InterruptSignal::new();
    runtime.spawn(wait_for_signal(interrupt.clone()));

    let mut orchestrator = Orchestrator::new(cli.to_config(), operational, PlanningConfig::default());
    let handle = runtime.handle().clone();
    let report = orchestrator.run(|source, destination| {
        Ok(DynamoDbBackend::connect(
            handle,
            source,
            destination,
            interrupt.clone(),
        ))
    });

    if let Some(error) = &report.error {
        eprintln!("dynamodb-copy: {}", error);
    }
    if cli.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("dynamodb-copy: failed to encode the job report: {}", e),
        }
    }

    runtime.shutdown_background();
    exit(report.exit_code)
}
