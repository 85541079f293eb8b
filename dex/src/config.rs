use crate::errors::Error;

use argocd_settings::ArgoCdSettings;
use log;
use serde::Serialize;
use serde_yaml::Mapping;
use serde_yaml::Value;
use std::collections::BTreeMap;

pub const ARGOCD_CLIENT_APP_ID: &str = "argo-cd";
pub const ARGOCD_CLIENT_APP_NAME: &str = "Argo CD";
pub const ARGOCD_CLI_CLIENT_APP_ID: &str = "argo-cd-cli";
pub const ARGOCD_CLI_CLIENT_APP_NAME: &str = "Argo CD CLI";

const DEX_HTTP_ADDR: &str = "0.0.0.0:5556";
const DEX_GRPC_ADDR: &str = "0.0.0.0:5557";

#[derive(Debug, Serialize)]
struct StaticClient {
    id: &'static str,

    name: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<String>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    public: bool,

    #[serde(rename = "redirectURIs")]
    redirect_uris: Vec<String>,
}

/*
 * Connector types that call back into dex and therefore need to be told
 * where dex lives.
 */
fn needs_redirect_uri(connector_type: &str) -> bool {
    matches!(connector_type, "oidc" | "saml" | "microsoft" | "linkedin" | "gitlab" | "github" | "bitbucket-cloud")
}

fn mapping(entries: Vec<(&str, Value)>) -> Value {
    let mut map = Mapping::new();
    for (key, value) in entries {
	map.insert(Value::from(key), value);
    }
    Value::Mapping(map)
}

/*
 * Replace every string starting with `$` by the argocd-secret value it names.
 * Unknown references are kept verbatim.
 *
 *   connectors:
 *   - type: github
 *     config:
 *       clientSecret: $dex.github.clientSecret
 */
fn replace_secrets(value: &mut Value, secrets: &BTreeMap<String, String>) {
    match value {
	Value::String(s) => {
	    if let Some(secret) = s.strip_prefix('$').and_then(|key| secrets.get(key)) {
		*s = secret.clone();
	    }
	},
	Value::Sequence(seq) => {
	    for item in seq.iter_mut() {
		replace_secrets(item, secrets);
	    }
	},
	Value::Mapping(map) => {
	    for (_, item) in map.iter_mut() {
		replace_secrets(item, secrets);
	    }
	},
	Value::Tagged(tagged) => replace_secrets(&mut tagged.value, secrets),
	_ => {},
    }
}

fn static_clients(settings: &ArgoCdSettings) -> Result<Vec<Value>, Error> {
    let argocd = StaticClient{
	id: ARGOCD_CLIENT_APP_ID,
	name: ARGOCD_CLIENT_APP_NAME,
	secret: Some(settings.oauth2_client_secret()),
	public: false,
	redirect_uris: vec![settings.redirect_url()],
    };
    let argocd_cli = StaticClient{
	id: ARGOCD_CLI_CLIENT_APP_ID,
	name: ARGOCD_CLI_CLIENT_APP_NAME,
	secret: None,
	public: true,
	redirect_uris: vec![String::from("http://localhost")],
    };

    Ok(vec![
	serde_yaml::to_value(argocd).map_err(Error::Serialize)?,
	serde_yaml::to_value(argocd_cli).map_err(Error::Serialize)?,
    ])
}

fn set_connector_redirects(connectors: &mut Value, redirect: &str) -> Result<(), Error> {
    let connectors = match connectors {
	Value::Sequence(connectors) => connectors,
	other => return Err(Error::MalformedConnector(format!("connectors must be a list, got: {:?}", other))),
    };

    for connector in connectors.iter_mut() {
	let connector = match connector {
	    Value::Mapping(connector) => connector,
	    other => return Err(Error::MalformedConnector(format!("connector must be a mapping, got: {:?}", other))),
	};

	let connector_type = match connector.get("type").and_then(Value::as_str) {
	    Some(connector_type) => connector_type.to_string(),
	    None => return Err(Error::MalformedConnector(format!("connector without a type: {:?}", connector))),
	};
	if !needs_redirect_uri(&connector_type) {
	    continue;
	}

	match connector.entry(Value::from("config")).or_insert(Value::Mapping(Mapping::new())) {
	    Value::Mapping(config) => {
		config.insert(Value::from("redirectURI"), Value::from(redirect));
	    },
	    other => {
		let errmsg = format!("config of {} connector must be a mapping, got: {:?}", connector_type, other);
		return Err(Error::MalformedConnector(errmsg));
	    }
	}
    }

    Ok(())
}

/*
 * Generates the dex configuration out of the Argo CD settings. An empty
 * result means dex is not configured and should not run.
 */
pub fn generate_dex_config_yaml(settings: &ArgoCdSettings) -> Result<Vec<u8>, Error> {
    if !settings.is_dex_configured() {
	return Ok(Vec::new());
    }

    let mut dex_cfg: Mapping = serde_yaml::from_str(&settings.dex_config).map_err(Error::InvalidDexConfig)?;

    dex_cfg.insert(Value::from("issuer"), Value::from(settings.issuer_url()));
    dex_cfg.insert(Value::from("storage"), mapping(vec![("type", Value::from("memory"))]));
    dex_cfg.insert(Value::from("web"), mapping(vec![("http", Value::from(DEX_HTTP_ADDR))]));
    dex_cfg.insert(Value::from("grpc"), mapping(vec![("addr", Value::from(DEX_GRPC_ADDR))]));
    dex_cfg.insert(Value::from("oauth2"), mapping(vec![("skipApprovalScreen", Value::from(true))]));

    let mut clients = static_clients(settings)?;
    if let Some(Value::Sequence(user_clients)) = dex_cfg.get("staticClients") {
	clients.extend(user_clients.iter().cloned());
    }
    dex_cfg.insert(Value::from("staticClients"), Value::Sequence(clients));

    if let Some(connectors) = dex_cfg.get_mut("connectors") {
	set_connector_redirects(connectors, &settings.dex_redirect_url())?;
    } else {
	log::debug!("dex.config has no connectors");
    }

    let mut dex_cfg = Value::Mapping(dex_cfg);
    replace_secrets(&mut dex_cfg, &settings.secrets);

    let rendered = serde_yaml::to_string(&dex_cfg).map_err(Error::Serialize)?;
    Ok(rendered.into_bytes())
}
