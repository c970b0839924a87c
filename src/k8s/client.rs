// Client creation with kubeconfig selection and custom user-agent support for kube 2.x
use crate::error::Result as KmResult;
use hyper::http::{HeaderName, HeaderValue};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::PathBuf;
use tracing::{info, warn};

/// Environment variable that overrides the user-agent sent to the api server
pub const USER_AGENT_ENV: &str = "KUBEMIRROR_USER_AGENT";

/// Where to find the cluster and which identity to use.
///
/// All fields empty means "infer": in-cluster service account when running
/// inside a pod, otherwise the default kubeconfig.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Explicit kubeconfig file
    pub kubeconfig: Option<PathBuf>,
    /// Context to use instead of the kubeconfig's current one
    pub context: Option<String>,
    /// Cluster override inside the chosen kubeconfig
    pub cluster: Option<String>,
    /// User override inside the chosen kubeconfig
    pub user: Option<String>,
}

impl ClientOptions {
    const fn is_inferred(&self) -> bool {
        self.kubeconfig.is_none()
            && self.context.is_none()
            && self.cluster.is_none()
            && self.user.is_none()
    }

    fn kube_config_options(&self) -> KubeConfigOptions {
        KubeConfigOptions {
            context: self.context.clone(),
            cluster: self.cluster.clone(),
            user: self.user.clone(),
        }
    }
}

/// Resolve a kube `Config` from the given options
///
/// # Errors
///
/// Will return `Err` if no usable configuration can be found
pub async fn config(options: &ClientOptions) -> KmResult<Config> {
    if options.is_inferred() {
        return Ok(Config::infer().await?);
    }

    let kco = options.kube_config_options();
    let config = match &options.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            Config::from_custom_kubeconfig(kubeconfig, &kco).await?
        }
        None => Config::from_kubeconfig(&kco).await?,
    };
    Ok(config)
}

/// Add the user-agent header to a config.
///
/// `KUBEMIRROR_USER_AGENT` wins over `custom_user_agent`. Invalid header
/// values are logged and skipped so the kube default stays in place.
pub fn add_user_agent_header(config: &mut Config, custom_user_agent: Option<&str>) {
    let from_env = std::env::var(USER_AGENT_ENV).ok();
    let Some(user_agent) = from_env.as_deref().or(custom_user_agent) else {
        return;
    };

    match HeaderValue::from_str(user_agent) {
        Ok(header_value) => config
            .headers
            .push((HeaderName::from_static("user-agent"), header_value)),
        Err(e) => warn!("⚠️ Ignoring invalid user-agent {:?}: {}", user_agent, e),
    }
}

/// Create a new k8s client to interact with k8s cluster api
///
/// # Errors
///
/// Will return `Err` if the configuration cannot be resolved or the client cannot be built
pub async fn new(options: &ClientOptions, custom_user_agent: Option<&str>) -> KmResult<Client> {
    let mut config = config(options).await?;
    add_user_agent_header(&mut config, custom_user_agent);
    info!("☸️ kubernetes: targeting api server {}", config.cluster_url);

    let client = Client::try_from(config)?;

    Ok(client)
}
