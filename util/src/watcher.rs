use crate::errors::Error;
use crate::errors::Result;

use argocd_settings::ChangeSignals;
use argocd_settings::SettingsSource;
use log;
use tokio_util::sync::CancellationToken;

/*
 * RenderedConfig is the configuration handed to the supervised program. An
 * empty rendering means the program is disabled.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedConfig(Vec<u8>);

impl RenderedConfig {

    pub fn is_disabled(&self) -> bool {
	self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
	&self.0
    }
}

impl From<Vec<u8>> for RenderedConfig {
    fn from(bytes: Vec<u8>) -> Self {
	RenderedConfig(bytes)
    }
}

pub trait Renderer<S> {
    fn render(&self, snapshot: &S) -> Result<RenderedConfig>;
}

impl<S, E, F> Renderer<S> for F
where
    F: Fn(&S) -> std::result::Result<Vec<u8>, E>,
    E: Into<Error>,
{
    fn render(&self, snapshot: &S) -> Result<RenderedConfig> {
	self(snapshot).map(RenderedConfig::from).map_err(Into::into)
    }
}

/*
 * ChangeWatcher turns change notifications from a settings source into
 * renderings that actually differ from the last applied one.
 */
pub struct ChangeWatcher<S: SettingsSource, R: Renderer<S::Snapshot>> {
    source: S,
    renderer: R,
    signals: ChangeSignals,
}

impl<S: SettingsSource, R: Renderer<S::Snapshot>> ChangeWatcher<S, R> {

    /*
     * Subscribes right away: anything that changes after this point wakes
     * the watcher up, including changes racing with the first render.
     */
    pub fn new(source: S, renderer: R) -> Self {
	let signals = source.subscribe();

	Self{
	    source: source,
	    renderer: renderer,
	    signals: signals,
	}
    }

    pub fn render(&self) -> Result<RenderedConfig> {
	let snapshot = self.source.snapshot()?;
	self.renderer.render(&snapshot)
    }

    /*
     * Suspends until the next change signal. Returns false if the token was
     * cancelled first.
     */
    pub async fn wait_for_next_signal(&mut self, token: &CancellationToken) -> Result<bool> {
	tokio::select! {
	    _ = token.cancelled() => Ok(false),
	    signal = self.signals.recv() => match signal {
		Some(()) => Ok(true),
		None => Err(Error::Subscription(String::from("settings notifier went away"))),
	    },
	}
    }

    /*
     * Waits until the rendering differs from last_applied and returns it, or
     * None once the token is cancelled.
     */
    pub async fn next_change(&mut self, last_applied: &RenderedConfig, token: &CancellationToken) -> Result<Option<RenderedConfig>> {
	loop {
	    if !self.wait_for_next_signal(token).await? {
		return Ok(None);
	    }

	    let rendered = self.render()?;
	    if rendered != *last_applied {
		return Ok(Some(rendered));
	    }
	    log::info!("dex config unmodified");
	}
    }
}
