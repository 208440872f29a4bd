use std::sync::Arc;

use clap::{Parser, Subcommand};
use site_agent_core::backend::{BackendDriver, BaseBackendDriver, PassthroughUsernameManager, UnknownClient, UsernameManager};
use site_agent_core::config::AgentConfig;
use site_agent_core::control_plane::{ControlPlaneClient, WaldurRestClient};
use site_agent_core::events::BroadcastEventBus;
use site_agent_core::processors::{MembershipProcessor, OrderProcessor, ReportProcessor};
use site_agent_core::supervisor::{AgentSupervisor, OfferingHandle};
#[cfg(feature = "metrics")]
use site_agent_core::metrics;

/// Top-level CLI configuration for the binary. Any command line
/// flags should go in here.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the agent configuration document (`spec.md` §6).
    #[arg(long, short, global = true, env = "SITE_AGENT_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Command,

    /// Prometheus metrics server scrape port. Disabled by default.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,
}

/// List of subcommands for the binary. Clap will convert the
/// name of each enum variant to kebab-case for the CLI.
/// e.g. `ProcessOrders` becomes `process-orders`.
#[derive(Subcommand)]
enum Command {
    /// Runs the supervisor: every configured offering's three lanes, on
    /// their configured polling/event-driven cadence, until terminated.
    Run,
    /// Runs one pass of the order-reconciliation lane for every configured
    /// offering, then exits. Mirrors the original `agent_order_process.py`
    /// one-shot entry point.
    ProcessOrders,
    /// Runs one pass of the membership-sync lane for every configured
    /// offering, then exits. Mirrors `agent_membership_sync.py`.
    ProcessMemberships,
    /// Runs one pass of the usage-report lane for every configured
    /// offering, then exits. Mirrors `agent_report.py`.
    ProcessUsageReports,
}

struct OfferingRuntime {
    control: Arc<dyn ControlPlaneClient>,
    driver: Arc<dyn BackendDriver>,
    username_manager: Arc<dyn UsernameManager>,
}

/// Assembles the control-plane client and backend driver for one configured
/// offering. `spec.md` §9 leaves concrete backend construction to the
/// embedding binary; this crate ships no backend drivers of its own, so any
/// `backend_type` is served by [`UnknownClient`] wrapped in
/// [`BaseBackendDriver`] — a safe no-op driver suitable for reporting-only
/// or not-yet-implemented backends.
fn build_offering_runtime(
    offering: &site_agent_core::config::OfferingConfig,
    agent_config: &AgentConfig,
) -> site_agent_core::Result<OfferingRuntime> {
    let control = WaldurRestClient::with_user_agent(
        offering.api_url.clone(),
        offering.api_token.clone(),
        &agent_config.user_agent,
        agent_config.tls_verify,
    )?;

    let components = offering.backend_components.clone();
    let driver = BaseBackendDriver::new(
        offering.backend_type.clone(),
        format!("{}-", offering.backend_type),
        UnknownClient,
        components,
    );

    Ok(OfferingRuntime {
        control: Arc::new(control),
        driver: Arc::new(driver),
        username_manager: Arc::new(PassthroughUsernameManager),
    })
}

async fn process_orders_once(config: &AgentConfig) {
    for offering_config in &config.offerings {
        let runtime = match build_offering_runtime(offering_config, config) {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(offering = %offering_config.name, error = %err, "unable to build offering runtime");
                continue;
            }
        };
        let processor = OrderProcessor::new(
            offering_config.clone().into_offering(),
            runtime.control,
            runtime.driver,
            runtime.username_manager,
        );
        if let Err(err) = processor.process_offering().await {
            tracing::error!(offering = %offering_config.name, error = %err, "order processing pass failed");
        }
    }
}

async fn process_memberships_once(config: &AgentConfig) {
    for offering_config in &config.offerings {
        let runtime = match build_offering_runtime(offering_config, config) {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(offering = %offering_config.name, error = %err, "unable to build offering runtime");
                continue;
            }
        };
        let processor = MembershipProcessor::new(
            offering_config.clone().into_offering(),
            runtime.control,
            runtime.driver,
            runtime.username_manager,
        );
        if let Err(err) = processor.process_offering().await {
            tracing::error!(offering = %offering_config.name, error = %err, "membership sync pass failed");
        }
    }
}

async fn process_usage_reports_once(config: &AgentConfig) {
    for offering_config in &config.offerings {
        let runtime = match build_offering_runtime(offering_config, config) {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(offering = %offering_config.name, error = %err, "unable to build offering runtime");
                continue;
            }
        };
        let processor =
            ReportProcessor::new(offering_config.clone().into_offering(), runtime.control, runtime.driver);
        if let Err(err) = processor.process_offering().await {
            tracing::error!(offering = %offering_config.name, error = %err, "usage report pass failed");
        }
    }
}

async fn run_supervisor(config: AgentConfig) {
    let bus = Arc::new(BroadcastEventBus::default());
    let mut offerings = Vec::new();
    for offering_config in &config.offerings {
        let runtime = match build_offering_runtime(offering_config, &config) {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(offering = %offering_config.name, error = %err, "unable to build offering runtime, skipping");
                continue;
            }
        };
        let offering = offering_config.clone().into_offering();
        offerings.push(OfferingHandle {
            config: offering_config.clone(),
            order: Arc::new(OrderProcessor::new(
                offering.clone(),
                runtime.control.clone(),
                runtime.driver.clone(),
                runtime.username_manager.clone(),
            )),
            membership: Arc::new(MembershipProcessor::new(
                offering.clone(),
                runtime.control.clone(),
                runtime.driver.clone(),
                runtime.username_manager,
            )),
            report: Arc::new(ReportProcessor::new(offering, runtime.control, runtime.driver)),
        });
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let supervisor = AgentSupervisor::new(offerings, config.polling_periods.clone(), bus);

    tokio::select! {
        _ = supervisor.run(shutdown_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    }
}

/// Secondary entrypoint that runs the appropriate subcommand.
async fn run(cli: Cli) {
    #[cfg(feature = "metrics")]
    if let Some(metrics_port) = cli.metrics_port {
        tokio::spawn(metrics::run_server(metrics_port));
    }

    let contents = match std::fs::read_to_string(&cli.config) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::error!(path = %cli.config, error = %err, "unable to read configuration file");
            std::process::exit(1);
        }
    };
    let config = match AgentConfig::from_yaml(&contents) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Run => run_supervisor(config).await,
        Command::ProcessOrders => process_orders_once(&config).await,
        Command::ProcessMemberships => process_memberships_once(&config).await,
        Command::ProcessUsageReports => process_usage_reports_once(&config).await,
    }
}

/// Main entrypoint that sets up the environment before running the secondary entrypoint `run`.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Set the panic hook to exit the process with a non-zero exit code
    // when a panic occurs on any thread.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let cli = Cli::parse();
    run(cli).await;
}
