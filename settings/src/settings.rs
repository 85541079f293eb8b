use crate::errors::Error;

use k8s_openapi::api::core::v1::ConfigMap as KubeConfigMap;
use k8s_openapi::api::core::v1::Secret as KubeSecret;
use log;
use openssl::base64;
use openssl::sha;
use std::collections::BTreeMap;

pub const SETTINGS_CONFIGMAP_NAME: &str = "argocd-cm";
pub const SETTINGS_SECRET_NAME: &str = "argocd-secret";

const SETTING_URL_KEY: &str = "url";
const SETTING_DEX_CONFIG_KEY: &str = "dex.config";
const SETTING_SERVER_SIGNATURE_KEY: &str = "server.secretkey";

/*
 * ArgoCdSettings is a point-in-time snapshot of the settings store.
 *
 *   kind: ConfigMap
 *   metadata:
 *     name: argocd-cm
 *   data:
 *     url: https://argocd.example.com
 *     dex.config: |
 *       connectors:
 *       - type: github
 *         [ ... ]
 */
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArgoCdSettings {

    // externally facing base URL of Argo CD
    pub url: String,

    // raw YAML of the user supplied dex configuration
    pub dex_config: String,

    // key used to sign tokens, the oauth2 client secret derives from it
    pub server_signature: Vec<u8>,

    // every key of argocd-secret, available for $key substitution
    pub secrets: BTreeMap<String, String>,
}

impl ArgoCdSettings {

    pub fn from_resources(configmap: &KubeConfigMap, secret: &KubeSecret) -> Result<Self, Error> {
	let mut settings = ArgoCdSettings::default();

	settings.update_from_configmap(configmap);
	settings.update_from_secret(secret)?;
	Ok(settings)
    }

    pub fn update_from_configmap(&mut self, configmap: &KubeConfigMap) {
	let data = configmap.data.clone().unwrap_or_default();

	self.url = data.get(SETTING_URL_KEY).cloned().unwrap_or_default();
	self.dex_config = data.get(SETTING_DEX_CONFIG_KEY).cloned().unwrap_or_default();
    }

    /*
     * The secret must carry server.secretkey, otherwise the settings are left
     * untouched.
     */
    pub fn update_from_secret(&mut self, secret: &KubeSecret) -> Result<(), Error> {
	let data = secret.data.clone().unwrap_or_default();

	let signature = match data.get(SETTING_SERVER_SIGNATURE_KEY) {
	    Some(signature) => signature.0.clone(),
	    None => {
		let name = secret.metadata.name.clone().unwrap_or_else(|| SETTINGS_SECRET_NAME.to_string());
		return Err(Error::MissingKey{ key: SETTING_SERVER_SIGNATURE_KEY, name: name });
	    }
	};

	self.server_signature = signature;
	self.secrets = data.iter()
	    .map(|(key, value)| (key.clone(), String::from_utf8_lossy(&value.0).into_owned()))
	    .collect();
	Ok(())
    }

    /*
     * Dex is configured when we know our own URL and dex.config holds a
     * non-empty mapping.
     */
    pub fn is_dex_configured(&self) -> bool {
	if self.url.is_empty() || self.dex_config.trim().is_empty() {
	    return false;
	}

	match serde_yaml::from_str::<serde_yaml::Value>(&self.dex_config) {
	    Ok(serde_yaml::Value::Mapping(cfg)) => !cfg.is_empty(),
	    Ok(_) => {
		log::warn!("invalid dex yaml config: expected a mapping");
		false
	    },
	    Err(err) => {
		log::warn!("invalid dex yaml config: {}", err);
		false
	    },
	}
    }

    pub fn issuer_url(&self) -> String {
	format!("{}/api/dex", self.url)
    }

    pub fn redirect_url(&self) -> String {
	format!("{}/auth/callback", self.url)
    }

    pub fn dex_redirect_url(&self) -> String {
	format!("{}/api/dex/callback", self.url)
    }

    /*
     * URL-safe base64 of sha256(server.secretkey), truncated to 40 chars.
     */
    pub fn oauth2_client_secret(&self) -> String {
	let digest = sha::sha256(&self.server_signature);
	let encoded: String = base64::encode_block(&digest)
	    .chars()
	    .map(|c| match c {
		'+' => '-',
		'/' => '_',
		c => c,
	    })
	    .collect();

	encoded.chars().take(40).collect()
    }
}
