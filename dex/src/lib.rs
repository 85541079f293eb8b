/*
 * argocd-dex - renders the configuration of the dex OIDC provider out of the
 * Argo CD settings.
 */

pub mod errors;
pub use errors::Error;

pub mod config;
pub use config::generate_dex_config_yaml;
pub use config::ARGOCD_CLIENT_APP_ID;
pub use config::ARGOCD_CLI_CLIENT_APP_ID;
