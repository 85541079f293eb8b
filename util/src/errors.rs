use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {

    /* encapsulate a kube-rust error */
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("unable to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("unable to infer cluster configuration: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),

    #[error("settings error: {0}")]
    Settings(#[from] argocd_settings::Error),

    #[error("render error: {0}")]
    Render(#[from] argocd_dex::Error),

    #[error("unable to launch `{program}`: {source}")]
    Launch {
	program: String,
	#[source]
	source: io::Error,
    },

    #[error("unable to stop dex: {0}")]
    Shutdown(#[source] io::Error),

    #[error("unable to write {}: {source}", path.display())]
    WriteConfig {
	path: PathBuf,
	#[source]
	source: io::Error,
    },

    #[error("dex is already running")]
    AlreadyRunning,

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("{0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
