use clap::Parser;
use futures::TryStreamExt;
use kube::ResourceExt;
use kubemirror::k8s::client::ClientOptions;
use kubemirror::{ClusterMirror, MirrorConfig};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a kubeconfig file
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long)]
    context: Option<String>,

    /// Seconds between status reports
    #[arg(short, long, default_value_t = 30)]
    interval: u64,

    /// Follow the logs of this pod (`namespace/name`) instead of reporting status
    #[arg(long)]
    logs: Option<String>,

    /// Containers to follow with --logs
    #[arg(short, long, requires = "logs")]
    container: Vec<String>,
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kubemirror=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let args = Args::parse();
    let options = ClientOptions {
        kubeconfig: args.kubeconfig,
        context: args.context,
        ..ClientOptions::default()
    };
    let mirror = ClusterMirror::connect(&options, MirrorConfig::default()).await?;

    if let Some(target) = args.logs {
        let (namespace, pod) = target
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("--logs expects namespace/name, got {target}"))?;
        let mut logs = mirror.get_logs(namespace, pod, &args.container).await?;
        let mut stdout = std::io::stdout();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    logs.close();
                    break;
                }
                chunk = logs.try_next() => match chunk? {
                    Some(chunk) => stdout.write_all(&chunk.render())?,
                    None => break,
                },
            }
        }
        mirror.shutdown().await;
        return Ok(());
    }

    mirror.watch_pods(|change, pod| {
        info!("🐳 pod {} {}/{}", change, pod.namespace().unwrap_or_default(), pod.name_any());
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                for stats in mirror.stats()? {
                    info!(
                        "📊 {:<12} {:>6} entries  version {:<12} {:?}",
                        stats.kind.to_string(),
                        stats.entries,
                        stats.checkpoint.unwrap_or_default(),
                        stats.state
                    );
                }
            }
        }
    }

    mirror.shutdown().await;
    Ok(())
}
