//! cfn-ami-lookup - CloudFormation latest-AMI custom resource handler

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cfn_ami_lookup::event::ResourceEvent;
use cfn_ami_lookup::resolver::Ec2ImageCatalog;
use cfn_ami_lookup::response::{HttpCallbackTransport, Notifier};
use cfn_ami_lookup::{handler, runtime};

/// CloudFormation custom resource handler that resolves the latest
/// Amazon Linux AMI for an architecture
#[derive(Parser, Debug)]
#[command(name = "cfn-ami-lookup", version, about, long_about = None)]
struct Cli {
    /// Handle a single event read from a JSON file, then exit
    ///
    /// Local testing escape hatch; the default mode polls the Lambda
    /// runtime interface for invocations.
    #[arg(long)]
    event_file: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let catalog = Ec2ImageCatalog::from_env()?;

    let mut notifier = Notifier::new(HttpCallbackTransport::new());
    if let Ok(log_stream) = std::env::var("AWS_LAMBDA_LOG_STREAM_NAME") {
        notifier = notifier.with_log_stream(log_stream);
    }

    match cli.event_file {
        Some(path) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| anyhow::anyhow!("failed to read event file {:?}: {}", path, e))?;
            let event: ResourceEvent = serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("failed to parse event file {:?}: {}", path, e))?;

            handler::handle_event(&event, &catalog, &notifier).await?;
            tracing::info!("event handled, exiting");
            Ok(())
        }
        None => {
            runtime::run(&catalog, &notifier).await?;
            Ok(())
        }
    }
}
