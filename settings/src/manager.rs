use crate::errors::Error;
use crate::settings::ArgoCdSettings;
use crate::settings::SETTINGS_CONFIGMAP_NAME;
use crate::settings::SETTINGS_SECRET_NAME;
use crate::source::ChangeSignals;
use crate::source::Notifier;
use crate::source::SettingsSource;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap as KubeConfigMap;
use k8s_openapi::api::core::v1::Secret as KubeSecret;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher as kube_watcher;
use kube::runtime::watcher::Config as KubeWatcherConfig;
use log;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

enum SettingsUpdate {
    ConfigMap(KubeConfigMap),
    Secret(KubeSecret),
}

/*
 * SettingsCache holds the last known settings together with the subscribers
 * to notify whenever an update is accepted.
 */
#[derive(Clone, Default)]
struct SettingsCache {
    settings: Arc<RwLock<ArgoCdSettings>>,
    notifier: Notifier,
}

impl SettingsCache {

    fn store(&self, settings: ArgoCdSettings) {
	*self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    fn snapshot(&self) -> ArgoCdSettings {
	self.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn subscribe(&self) -> ChangeSignals {
	self.notifier.subscribe()
    }

    /*
     * A secret without server.secretkey is dropped: the cache keeps its
     * previous values and nobody is notified.
     */
    fn apply(&self, update: SettingsUpdate) {
	{
	    let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);

	    match update {
		SettingsUpdate::ConfigMap(configmap) => {
		    log::debug!("received an update for configmap {}", SETTINGS_CONFIGMAP_NAME);
		    settings.update_from_configmap(&configmap);
		},
		SettingsUpdate::Secret(secret) => {
		    log::debug!("received an update for secret {}", SETTINGS_SECRET_NAME);
		    if let Err(err) = settings.update_from_secret(&secret) {
			log::error!("ignoring secret update: {}", err);
			return;
		    }
		},
	    }
	}

	self.notifier.notify();
    }
}

/*
 * SettingsManager reads the Argo CD settings out of k8s and keeps a cached
 * copy up to date by watching argocd-cm and argocd-secret. Every applied
 * update is forwarded to the subscribers.
 */
#[derive(Clone)]
pub struct SettingsManager {
    namespace: String,

    configmap_api: KubeApi<KubeConfigMap>,
    secret_api: KubeApi<KubeSecret>,

    cache: SettingsCache,
}

impl SettingsManager {

    /*
     * Fetches the settings straight from the API server and refreshes the
     * cache with them.
     */
    pub async fn get_settings(&self) -> Result<ArgoCdSettings, Error> {
	let configmap = match self.configmap_api.get_opt(SETTINGS_CONFIGMAP_NAME).await? {
	    Some(configmap) => configmap,
	    None => return Err(self.missing("ConfigMap", SETTINGS_CONFIGMAP_NAME)),
	};
	let secret = match self.secret_api.get_opt(SETTINGS_SECRET_NAME).await? {
	    Some(secret) => secret,
	    None => return Err(self.missing("Secret", SETTINGS_SECRET_NAME)),
	};

	let settings = ArgoCdSettings::from_resources(&configmap, &secret)?;
	self.cache.store(settings.clone());
	Ok(settings)
    }

    /*
     * start_notifier spawns the watchers feeding the settings cache. The task
     * ends when the token is cancelled.
     */
    pub fn start_notifier(&self, token: CancellationToken) -> JoinHandle<()> {
	let mgr = self.clone();

	tokio::spawn(async move {
	    log::info!("watching {} and {} in namespace {}", SETTINGS_CONFIGMAP_NAME, SETTINGS_SECRET_NAME, mgr.namespace);

	    tokio::select! {
		_ = mgr.watch() => {},
		_ = token.cancelled() => {},
	    }
	    log::debug!("settings notifier stopped");
	})
    }

    async fn watch(&self) {
	let configmaps = kube_watcher(self.configmap_api.clone(), by_name(SETTINGS_CONFIGMAP_NAME))
	    .default_backoff()
	    .applied_objects()
	    .map(|res| res.map(SettingsUpdate::ConfigMap));
	let secrets = kube_watcher(self.secret_api.clone(), by_name(SETTINGS_SECRET_NAME))
	    .default_backoff()
	    .applied_objects()
	    .map(|res| res.map(SettingsUpdate::Secret));

	futures::stream::select(configmaps, secrets)
	    .for_each(|update| {
		match update {
		    Ok(update) => self.cache.apply(update),
		    Err(err) => log::error!("settings watcher failed: {}", err),
		}

		futures::future::ready(())
	    })
	    .await
    }

    fn missing(&self, kind: &'static str, name: &str) -> Error {
	Error::MissingResource{
	    kind: kind,
	    namespace: self.namespace.clone(),
	    name: name.to_string(),
	}
    }

    pub fn namespace(&self) -> &str {
	&self.namespace
    }

    pub fn new(kube_client: KubeClient, namespace: &str) -> Self {
	Self{
	    namespace: namespace.to_string(),

	    /* k8s internal references */
	    configmap_api: KubeApi::namespaced(kube_client.clone(), namespace),
	    secret_api: KubeApi::namespaced(kube_client.clone(), namespace),

	    cache: SettingsCache::default(),
	}
    }
}

impl SettingsSource for SettingsManager {
    type Snapshot = ArgoCdSettings;

    fn snapshot(&self) -> Result<ArgoCdSettings, Error> {
	Ok(self.cache.snapshot())
    }

    fn subscribe(&self) -> ChangeSignals {
	self.cache.subscribe()
    }
}

fn by_name(name: &str) -> KubeWatcherConfig {
    KubeWatcherConfig::default().fields(&format!("metadata.name={}", name))
}
