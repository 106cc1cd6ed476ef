use anyhow::Result;
use clap::Parser;
use ontap_agent::collectors::ZapiPerf;
use ontap_agent::config::Config;
use ontap_agent::matrix::Matrix;
use ontap_agent::ontap::ZapiClient;
use ontap_agent::plugins::ShelfPlugin;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/Default.toml")]
    config: String,

    /// ONTAP management address (overrides config)
    #[arg(long, env = "ONTAP_ADDR")]
    ontap_addr: Option<String>,

    /// ONTAP user name (overrides config)
    #[arg(long, env = "ONTAP_USERNAME")]
    ontap_username: Option<String>,

    /// ONTAP password (overrides config)
    #[arg(long, env = "ONTAP_PASSWORD")]
    ontap_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ONTAP agent v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(addr) = args.ontap_addr {
        config.ontap.addr = addr;
    }
    if let Some(username) = args.ontap_username {
        config.ontap.username = username;
    }
    if let Some(password) = args.ontap_password {
        config.ontap.password = secrecy::SecretString::new(password.into());
    }

    info!("Configuration loaded successfully");
    info!("ONTAP controller: {}", config.ontap.addr);
    info!(
        "Collecting object [{}] every {}s",
        config.collector.object, config.poller.data_interval_seconds
    );

    if let Err(e) = run(config).await {
        error!("Agent error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let client = Arc::new(ZapiClient::new(config.ontap.clone())?);
    let cluster = client.name().to_string();

    let mut collector = ZapiPerf::new(client.clone(), config.collector.clone())?;
    collector.set_global_label("datacenter", &config.poller.datacenter);
    collector.set_global_label("cluster", &cluster);

    let mut shelf = match &config.shelf {
        Some(template) => Some(ShelfPlugin::new(
            client.clone(),
            template,
            &config.poller.datacenter,
            &cluster,
        )?),
        None => None,
    };

    // the schema and instance caches must exist before the first data
    // poll; later refreshes are non-fatal and retried on their cadence
    collector.poll_counter().await?;
    collector.poll_instance().await?;

    let mut counter_tick = interval(Duration::from_secs(config.poller.counter_interval_seconds));
    let mut instance_tick = interval(Duration::from_secs(config.poller.instance_interval_seconds));
    let mut data_tick = interval(Duration::from_secs(config.poller.data_interval_seconds));
    // consume the immediate first tick of each interval
    counter_tick.tick().await;
    instance_tick.tick().await;
    data_tick.tick().await;

    loop {
        tokio::select! {
            _ = counter_tick.tick() => {
                if let Err(e) = collector.poll_counter().await {
                    warn!("counter poll failed: {}", e);
                }
            }
            _ = instance_tick.tick() => {
                if let Err(e) = collector.poll_instance().await {
                    warn!("instance poll failed: {}", e);
                }
            }
            _ = data_tick.tick() => {
                match collector.poll_data().await {
                    Ok(Some(matrix)) => log_matrix(&matrix),
                    Ok(None) => info!("no data emitted this cycle (baseline established)"),
                    Err(e) => warn!("data poll failed: {}", e),
                }
                if let Some(plugin) = shelf.as_mut() {
                    match plugin.run(collector.matrix_mut()).await {
                        Ok(matrices) => {
                            for matrix in &matrices {
                                log_matrix(matrix);
                            }
                        }
                        Err(e) => warn!("shelf poll failed: {}", e),
                    }
                }
            }
        }
    }
}

fn log_matrix(matrix: &Matrix) {
    let mut samples = 0usize;
    for (_, instance) in matrix.instances() {
        for (_, metric) in matrix.metrics() {
            if metric.is_exportable() && metric.value_f64(instance.slot()).is_some() {
                samples += 1;
            }
        }
    }
    info!(
        object = matrix.object(),
        metrics = matrix.metric_count(),
        instances = matrix.instance_count(),
        samples,
        "emitted matrix"
    );
}
