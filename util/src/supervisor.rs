use crate::errors::Result;
use crate::process::Launcher;
use crate::process::ProcessSupervisor;
use crate::watcher::ChangeWatcher;
use crate::watcher::RenderedConfig;
use crate::watcher::Renderer;

use argocd_settings::SettingsSource;
use log;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoopState {

    /* dex is disabled, nothing is running */
    Idle,

    /* dex has been launched with the last applied config */
    Supervising,
}

/*
 * SupervisionLoop keeps dex running with the configuration rendered from the
 * current settings:
 *
 *  1. render the current settings, start dex unless the rendering is empty
 *  2. wait for a settings change and render again
 *  3. same bytes as before: nothing to do
 *  4. otherwise stop dex (waiting for it to exit), then start it again with
 *     the new rendering unless it is empty
 *
 * Every failure ends the loop, nothing is retried.
 */
pub struct SupervisionLoop<S, R, L>
where
    S: SettingsSource,
    R: Renderer<S::Snapshot>,
    L: Launcher,
{
    watcher: ChangeWatcher<S, R>,
    process: ProcessSupervisor<L>,

    last_applied: RenderedConfig,
    state: LoopState,
}

impl<S, R, L> SupervisionLoop<S, R, L>
where
    S: SettingsSource,
    R: Renderer<S::Snapshot>,
    L: Launcher,
{

    pub fn new(source: S, renderer: R, process: ProcessSupervisor<L>) -> Self {
	Self{
	    watcher: ChangeWatcher::new(source, renderer),
	    process: process,

	    last_applied: RenderedConfig::default(),
	    state: LoopState::Idle,
	}
    }

    /*
     * Runs until the token is cancelled, then stops dex gracefully. A fatal
     * error takes dex down too before it is returned.
     */
    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
	let result = self.supervise(&token).await;

	if result.is_err() && self.process.is_running() {
	    log::warn!("stopping dex after a fatal error");
	    if let Err(err) = self.process.stop_and_wait().await {
		log::error!("unable to stop dex: {}", err);
	    }
	    self.state = LoopState::Idle;
	}
	result
    }

    async fn supervise(&mut self, token: &CancellationToken) -> Result<()> {
	let initial = self.watcher.render()?;
	self.apply(initial)?;

	loop {
	    match self.watcher.next_change(&self.last_applied, token).await? {
		Some(rendered) => {
		    log::info!("dex config modified. restarting dex");
		    self.process.stop_and_wait().await?;
		    self.state = LoopState::Idle;
		    self.apply(rendered)?;
		},
		None => {
		    log::info!("shutting down dex supervision ({:?})", self.state);
		    self.process.stop_and_wait().await?;
		    self.state = LoopState::Idle;
		    return Ok(());
		},
	    }
	}
    }

    /*
     * Must only be called with no process running.
     */
    fn apply(&mut self, rendered: RenderedConfig) -> Result<()> {
	debug_assert!(!self.process.is_running());

	if rendered.is_disabled() {
	    log::info!("dex is not configured");
	} else {
	    log::debug!("{}", String::from_utf8_lossy(rendered.as_bytes()));
	    self.process.start(rendered.as_bytes())?;
	    self.state = LoopState::Supervising;
	    log::debug!("dex is {:?} with {}", self.process.state(), self.process.config_path().display());
	}

	self.last_applied = rendered;
	Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use argocd_settings::ChangeSignals;
    use argocd_settings::Notifier;
    use std::fs;
    use std::future::Future;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
	Start(u32, String),
	StopRequested(u32),
	Stopped(u32),
    }

    #[derive(Clone, Default)]
    struct Recorder {
	events: Arc<Mutex<Vec<Event>>>,
	live: Arc<AtomicUsize>,
	max_live: Arc<AtomicUsize>,
    }

    impl Recorder {
	fn events(&self) -> Vec<Event> {
	    self.events.lock().unwrap().clone()
	}

	fn starts(&self) -> usize {
	    self.events().iter().filter(|e| matches!(e, Event::Start(..))).count()
	}
    }

    #[derive(Clone, Default)]
    struct RecordingLauncher {
	recorder: Recorder,
	next_id: u32,
    }

    impl Launcher for RecordingLauncher {
	type Child = u32;

	fn launch(&mut self, config_path: &Path) -> Result<u32> {
	    self.next_id += 1;
	    let config = fs::read_to_string(config_path).unwrap();
	    let live = self.recorder.live.fetch_add(1, Ordering::SeqCst) + 1;
	    self.recorder.max_live.fetch_max(live, Ordering::SeqCst);
	    self.recorder.events.lock().unwrap().push(Event::Start(self.next_id, config));
	    Ok(self.next_id)
	}

	async fn terminate(&mut self, child: u32) -> Result<()> {
	    self.recorder.events.lock().unwrap().push(Event::StopRequested(child));
	    // the child takes a while to go away
	    tokio::time::sleep(Duration::from_millis(10)).await;
	    self.recorder.live.fetch_sub(1, Ordering::SeqCst);
	    self.recorder.events.lock().unwrap().push(Event::Stopped(child));
	    Ok(())
	}
    }

    #[derive(Clone, Default)]
    struct MemorySource {
	value: Arc<Mutex<String>>,
	notifier: Notifier,
    }

    impl MemorySource {
	fn set(&self, value: &str) {
	    *self.value.lock().unwrap() = value.to_string();
	}

	fn publish(&self, value: &str) {
	    self.set(value);
	    self.notifier.notify();
	}
    }

    impl SettingsSource for MemorySource {
	type Snapshot = String;

	fn snapshot(&self) -> std::result::Result<String, argocd_settings::Error> {
	    Ok(self.value.lock().unwrap().clone())
	}

	fn subscribe(&self) -> ChangeSignals {
	    self.notifier.subscribe()
	}
    }

    struct Harness {
	source: MemorySource,
	recorder: Recorder,
	renders: Arc<AtomicUsize>,
	token: CancellationToken,
	_dir: tempfile::TempDir,
    }

    /*
     * Builds a loop over an in-memory source whose snapshot renders to
     * itself, and drives it concurrently with the given scenario.
     */
    async fn run_scenario<F, Fut>(initial: &str, scenario: F) -> (Result<()>, Recorder)
    where
	F: FnOnce(Arc<Harness>) -> Fut,
	Fut: Future<Output = ()>,
    {
	let dir = tempfile::tempdir().unwrap();
	let source = MemorySource::default();
	source.set(initial);

	let launcher = RecordingLauncher::default();
	let recorder = launcher.recorder.clone();
	let renders = Arc::new(AtomicUsize::new(0));
	let counter = renders.clone();
	let renderer = move |s: &String| -> Result<Vec<u8>> {
	    counter.fetch_add(1, Ordering::SeqCst);
	    Ok(s.as_bytes().to_vec())
	};

	let process = ProcessSupervisor::new(launcher, dir.path().join("dex.yaml"));
	let supervision = SupervisionLoop::new(source.clone(), renderer, process);
	let harness = Arc::new(Harness{
	    source: source,
	    recorder: recorder.clone(),
	    renders: renders,
	    token: CancellationToken::new(),
	    _dir: dir,
	});

	let token = harness.token.clone();
	let driver = {
	    let harness = harness.clone();
	    async move {
		scenario(harness.clone()).await;
		harness.token.cancel();
	    }
	};

	let (result, ()) = tokio::join!(supervision.run(token), driver);
	(result, recorder)
    }

    async fn wait_until(what: &str, cond: impl Fn() -> bool) {
	let waited = tokio::time::timeout(Duration::from_secs(5), async {
	    while !cond() {
		tokio::time::sleep(Duration::from_millis(1)).await;
	    }
	}).await;
	assert!(waited.is_ok(), "timed out waiting for {}", what);
    }

    async fn wait_renders(h: &Harness, n: usize) {
	wait_until(&format!("{} renders", n), || h.renders.load(Ordering::SeqCst) >= n).await;
    }

    #[tokio::test]
    async fn test_example_scenario() {
	let (result, recorder) = run_scenario("issuer: https://x\n", |h| async move {
	    wait_renders(&h, 1).await;

	    h.source.publish("issuer: https://x\n");
	    wait_renders(&h, 2).await;

	    h.source.publish("");
	    wait_until("dex to stop", || h.recorder.events().contains(&Event::Stopped(1))).await;

	    h.source.publish("issuer: https://y\n");
	    wait_until("second dex", || h.recorder.starts() == 2).await;
	}).await;

	result.unwrap();
	assert_eq!(recorder.events(), vec![
	    Event::Start(1, String::from("issuer: https://x\n")),
	    Event::StopRequested(1),
	    Event::Stopped(1),
	    Event::Start(2, String::from("issuer: https://y\n")),
	    // cancellation
	    Event::StopRequested(2),
	    Event::Stopped(2),
	]);
    }

    #[tokio::test]
    async fn test_identical_renderings_start_once() {
	let (result, recorder) = run_scenario("issuer: https://x\n", |h| async move {
	    for n in 2..6 {
		wait_renders(&h, n - 1).await;
		h.source.publish("issuer: https://x\n");
	    }
	    wait_renders(&h, 5).await;
	}).await;

	result.unwrap();
	assert_eq!(recorder.starts(), 1);
    }

    #[tokio::test]
    async fn test_coalesced_burst_without_change() {
	let (result, recorder) = run_scenario("issuer: https://x\n", |h| async move {
	    wait_renders(&h, 1).await;

	    for _ in 0..10 {
		h.source.notifier.notify();
	    }
	    wait_renders(&h, 2).await;
	    tokio::time::sleep(Duration::from_millis(20)).await;

	    let renders = h.renders.load(Ordering::SeqCst);
	    assert!(renders >= 2 && renders <= 11, "unexpected render count {}", renders);
	    assert_eq!(h.recorder.starts(), 1);
	}).await;

	result.unwrap();
	assert_eq!(recorder.starts(), 1);
    }

    #[tokio::test]
    async fn test_stop_completes_before_restart() {
	let (result, recorder) = run_scenario("issuer: https://x\n", |h| async move {
	    wait_renders(&h, 1).await;

	    h.source.publish("issuer: https://y\n");
	    wait_until("restart", || h.recorder.starts() == 2).await;
	}).await;

	result.unwrap();
	let events = recorder.events();
	let stopped = events.iter().position(|e| *e == Event::Stopped(1)).unwrap();
	let restarted = events.iter().position(|e| matches!(e, Event::Start(2, _))).unwrap();
	assert!(stopped < restarted);
	assert_eq!(recorder.max_live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_toggling_between_idle_and_supervising() {
	let (result, recorder) = run_scenario("", |h| async move {
	    wait_renders(&h, 1).await;
	    assert_eq!(h.recorder.starts(), 0);

	    for (i, value) in ["a: 1\n", "", "a: 2\n", ""].iter().enumerate() {
		h.source.publish(value);
		wait_renders(&h, i + 2).await;
		// let any stop/start in flight settle
		tokio::time::sleep(Duration::from_millis(20)).await;
		let live = h.recorder.live.load(Ordering::SeqCst);
		assert_eq!(live, if value.is_empty() { 0 } else { 1 });
	    }
	}).await;

	result.unwrap();
	assert_eq!(recorder.starts(), 2);
	assert_eq!(recorder.max_live.load(Ordering::SeqCst), 1);
	assert_eq!(recorder.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_config_file_matches_running_process() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("dex.yaml");
	let source = MemorySource::default();
	source.set("issuer: https://x\n");

	let renderer = |s: &String| -> Result<Vec<u8>> { Ok(s.as_bytes().to_vec()) };
	let process = ProcessSupervisor::new(RecordingLauncher::default(), &path);
	let mut supervision = SupervisionLoop::new(source.clone(), renderer, process);

	let initial = supervision.watcher.render().unwrap();
	supervision.apply(initial).unwrap();
	assert_eq!(supervision.state, LoopState::Supervising);
	assert_eq!(fs::read_to_string(&path).unwrap(), "issuer: https://x\n");
    }

    #[tokio::test]
    async fn test_render_failure_is_fatal_and_stops_dex() {
	let dir = tempfile::tempdir().unwrap();
	let source = MemorySource::default();
	source.set("a: 1\n");

	let renderer = |s: &String| -> Result<Vec<u8>> {
	    match s.as_str() {
		"broken" => Err(Error::Render(argocd_dex::Error::MalformedConnector(String::from("broken")))),
		s => Ok(s.as_bytes().to_vec()),
	    }
	};
	let launcher = RecordingLauncher::default();
	let recorder = launcher.recorder.clone();
	let process = ProcessSupervisor::new(launcher, dir.path().join("dex.yaml"));
	let supervision = SupervisionLoop::new(source.clone(), renderer, process);

	let publisher = async {
	    wait_until("dex to start", || recorder.starts() == 1).await;
	    source.publish("broken");
	};
	let (result, ()) = tokio::join!(supervision.run(CancellationToken::new()), publisher);

	match result {
	    Err(Error::Render(_)) => {},
	    other => panic!("unexpected result: {:?}", other),
	}
	assert_eq!(recorder.starts(), 1);
	assert_eq!(recorder.live.load(Ordering::SeqCst), 0);
	assert_eq!(recorder.events().last(), Some(&Event::Stopped(1)));
    }
}
