use crate::errors::Result;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use kube::Client as KubeClient;
use kube::Config as KubeConfig;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use std::path::PathBuf;

pub const CLI_NAME: &str = "argocd-util";

pub const DEFAULT_DEX_BINARY: &str = "dex";
pub const DEFAULT_DEX_CONFIG_PATH: &str = "/tmp/dex.yaml";

#[derive(Parser, Debug)]
#[command(name = CLI_NAME, about = "argocd-util has internal tools used by Argo CD")]
pub struct Cli {

    /// Set the logging level. One of: debug|info|warn|error
    #[arg(long, global = true, default_value = "info", value_parser = ["debug", "info", "warn", "error"])]
    pub loglevel: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {

    /// Runs dex generating a config using settings from the Argo CD configmap and secret
    Rundex(RunDexArgs),

    /// Generates a dex config from Argo CD settings
    Gendexcfg(GenDexCfgArgs),

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
pub struct RunDexArgs {

    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Name or path of the dex executable
    #[arg(long, default_value = DEFAULT_DEX_BINARY)]
    pub dex_binary: PathBuf,

    /// Where the generated dex config is written before launching dex
    #[arg(long, default_value = DEFAULT_DEX_CONFIG_PATH)]
    pub dex_config_path: PathBuf,
}

#[derive(Args, Debug)]
pub struct GenDexCfgArgs {

    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Output to the specified file instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

/*
 * kubectl-like flags to reach the cluster holding the Argo CD settings.
 */
#[derive(Args, Debug, Default)]
pub struct ClusterArgs {

    /// Path to a kube config. Only required if out-of-cluster
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// The name of the kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// The name of the kubeconfig cluster to use
    #[arg(long)]
    pub cluster: Option<String>,

    /// The name of the kubeconfig user to use
    #[arg(long)]
    pub user: Option<String>,

    /// If present, the namespace scope for this CLI request
    #[arg(short, long)]
    pub namespace: Option<String>,
}

impl ClusterArgs {

    fn options(&self) -> KubeConfigOptions {
	KubeConfigOptions{
	    context: self.context.clone(),
	    cluster: self.cluster.clone(),
	    user: self.user.clone(),
	}
    }

    fn has_overrides(&self) -> bool {
	self.context.is_some() || self.cluster.is_some() || self.user.is_some()
    }

    /*
     * An explicit kubeconfig wins, then the default kubeconfig when any
     * override is given, otherwise whatever kube infers (in-cluster first).
     */
    pub async fn config(&self) -> Result<KubeConfig> {
	let config = match &self.kubeconfig {
	    Some(path) => KubeConfig::from_custom_kubeconfig(Kubeconfig::read_from(path)?, &self.options()).await?,
	    None if self.has_overrides() => KubeConfig::from_kubeconfig(&self.options()).await?,
	    None => KubeConfig::infer().await?,
	};
	Ok(config)
    }

    pub async fn connect(&self) -> Result<(KubeClient, String)> {
	let config = self.config().await?;
	let namespace = self.namespace(&config);

	log::debug!("connecting to {} (namespace {})", config.cluster_url, namespace);
	Ok((KubeClient::try_from(config)?, namespace))
    }

    pub fn namespace(&self, config: &KubeConfig) -> String {
	match &self.namespace {
	    Some(namespace) => namespace.clone(),
	    None => config.default_namespace.clone(),
	}
    }
}
