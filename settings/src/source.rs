use crate::errors::Error;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/*
 * Receiving side of a change subscription. Each receiver is backed by a
 * channel of depth 1: a pending signal absorbs any further one, so a
 * subscriber sees at least one signal per change, not one signal per change.
 */
pub type ChangeSignals = mpsc::Receiver<()>;

/*
 * A SettingsSource hands out snapshots of the current settings and change
 * subscriptions. Consumers should subscribe before taking the first snapshot
 * so no change is lost in between.
 */
pub trait SettingsSource {
    type Snapshot;

    fn snapshot(&self) -> Result<Self::Snapshot, Error>;

    fn subscribe(&self) -> ChangeSignals;
}

/*
 * Notifier fans a unit signal out to every subscriber without ever blocking
 * the producer.
 */
#[derive(Clone, Default)]
pub struct Notifier {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<()>>>>,
}

impl Notifier {

    pub fn new() -> Self {
	Self::default()
    }

    pub fn subscribe(&self) -> ChangeSignals {
	let (tx, rx) = mpsc::channel(1);

	self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).push(tx);
	rx
    }

    /*
     * Full channels already have a wake-up pending, closed ones belong to
     * subscribers that went away and are dropped.
     */
    pub fn notify(&self) {
	let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);

	subscribers.retain(|tx| match tx.try_send(()) {
	    Ok(()) => true,
	    Err(TrySendError::Full(())) => true,
	    Err(TrySendError::Closed(())) => false,
	});
	log::debug!("notified {} settings subscriber(s)", subscribers.len());
    }

    pub fn subscribers(&self) -> usize {
	self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
