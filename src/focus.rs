use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Lost,
    LostTransient,
    LostTransientDuck,
    Gained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FocusState {
    #[default]
    None,
    Granted,
    Ducked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusRequest {
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FocusGain {
    #[default]
    Gain,
    Transient,
    TransientMayDuck,
}

impl FocusGain {
    fn displacement(self) -> FocusChange {
        match self {
            Self::Gain => FocusChange::Lost,
            Self::Transient => FocusChange::LostTransient,
            Self::TransientMayDuck => FocusChange::LostTransientDuck,
        }
    }
}

#[derive(Clone)]
pub struct FocusListener(Arc<dyn Fn(FocusChange) + Send + Sync>);

impl FocusListener {
    pub fn new(listener: impl Fn(FocusChange) + Send + Sync + 'static) -> Self {
        Self(Arc::new(listener))
    }

    pub fn notify(&self, change: FocusChange) {
        (self.0)(change);
    }
}

impl fmt::Debug for FocusListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FocusListener")
    }
}

pub trait AudioFocusArbiter: Send {
    fn subscribe(&mut self, listener: FocusListener);
    fn request_focus(&mut self) -> FocusRequest;
    fn abandon_focus(&mut self);
}

#[derive(Debug, Default)]
pub struct ExclusiveFocus {
    held: bool,
}

impl ExclusiveFocus {
    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl AudioFocusArbiter for ExclusiveFocus {
    fn subscribe(&mut self, _listener: FocusListener) {}

    fn request_focus(&mut self) -> FocusRequest {
        self.held = true;
        FocusRequest::Granted
    }

    fn abandon_focus(&mut self) {
        self.held = false;
    }
}

#[derive(Debug)]
struct Holder {
    client: u64,
    suspended: bool,
}

#[derive(Debug, Default)]
struct BrokerState {
    next_client: u64,
    holders: Vec<Holder>,
    listeners: Vec<(u64, FocusListener)>,
    locked: bool,
}

impl BrokerState {
    fn listeners_for(&self, client: u64) -> Vec<FocusListener> {
        self.listeners
            .iter()
            .filter(|(owner, _)| *owner == client)
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FocusBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl FocusBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn client(&self, name: impl Into<String>) -> BrokerClient {
        let mut state = self.lock();
        state.next_client += 1;
        BrokerClient {
            id: state.next_client,
            name: name.into(),
            gain: FocusGain::Gain,
            broker: self.clone(),
        }
    }

    /// While locked every request is denied, like during a phone call.
    pub fn set_locked(&self, locked: bool) {
        self.lock().locked = locked;
    }

    pub fn holder_count(&self) -> usize {
        self.lock().holders.len()
    }

    fn request(&self, client: u64, gain: FocusGain) -> FocusRequest {
        let notifications = {
            let mut state = self.lock();
            if state.locked {
                return FocusRequest::Denied;
            }

            state.holders.retain(|holder| holder.client != client);

            let mut displaced = Vec::new();
            match gain {
                FocusGain::Gain => {
                    displaced.extend(state.holders.drain(..).map(|holder| holder.client));
                }
                FocusGain::Transient | FocusGain::TransientMayDuck => {
                    if let Some(top) = state.holders.last_mut() {
                        top.suspended = true;
                        displaced.push(top.client);
                    }
                }
            }

            state.holders.push(Holder {
                client,
                suspended: false,
            });

            displaced
                .into_iter()
                .flat_map(|owner| state.listeners_for(owner))
                .collect::<Vec<_>>()
        };

        let change = gain.displacement();
        for listener in notifications {
            listener.notify(change);
        }
        FocusRequest::Granted
    }

    fn abandon(&self, client: u64) {
        let notifications = {
            let mut state = self.lock();
            let was_top = state
                .holders
                .last()
                .is_some_and(|holder| holder.client == client);
            state.holders.retain(|holder| holder.client != client);
            if !was_top {
                return;
            }

            match state.holders.last_mut() {
                Some(next) if next.suspended => {
                    next.suspended = false;
                    let owner = next.client;
                    state.listeners_for(owner)
                }
                _ => Vec::new(),
            }
        };

        for listener in notifications {
            listener.notify(FocusChange::Gained);
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerClient {
    id: u64,
    name: String,
    gain: FocusGain,
    broker: FocusBroker,
}

impl BrokerClient {
    pub fn with_gain(mut self, gain: FocusGain) -> Self {
        self.gain = gain;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request(&self) -> FocusRequest {
        let result = self.broker.request(self.id, self.gain);
        debug!(client = %self.name, gain = ?self.gain, ?result, "focus requested");
        result
    }

    pub fn abandon(&self) {
        debug!(client = %self.name, "focus abandoned");
        self.broker.abandon(self.id);
    }
}

impl AudioFocusArbiter for BrokerClient {
    fn subscribe(&mut self, listener: FocusListener) {
        self.broker.lock().listeners.push((self.id, listener));
    }

    fn request_focus(&mut self) -> FocusRequest {
        self.request()
    }

    fn abandon_focus(&mut self) {
        self.abandon();
    }
}
