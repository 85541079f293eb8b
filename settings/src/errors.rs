use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {

    /* encapsulate a kube-rust error */
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{kind} {namespace}/{name} not found")]
    MissingResource {
	kind: &'static str,
	namespace: String,
	name: String,
    },

    #[error("{key} not found in secret {name}")]
    MissingKey {
	key: &'static str,
	name: String,
    },
}
