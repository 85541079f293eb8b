/*
 * argocd-settings - the Argo CD settings store (argocd-cm ConfigMap and
 * argocd-secret Secret) as seen by the dex tooling: snapshots, a kube backed
 * manager and change notifications.
 */

pub mod errors;
pub use errors::Error;

pub mod settings;
pub use settings::ArgoCdSettings;
pub use settings::SETTINGS_CONFIGMAP_NAME;
pub use settings::SETTINGS_SECRET_NAME;

pub mod source;
pub use source::ChangeSignals;
pub use source::Notifier;
pub use source::SettingsSource;

pub mod manager;
pub use manager::SettingsManager;
