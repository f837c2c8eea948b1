use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use parley_core::state::LifecycleState;

type Observer = Arc<dyn Fn(LifecycleState) + Send + Sync>;

/// The process-wide generation lifecycle.
///
/// Observers run after the new state is stored and outside the state lock,
/// so they may read the state back (or change it) without deadlocking.
/// They only fire when the state actually changes.
#[derive(Default)]
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
    observers: RwLock<Vec<Observer>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn is_idle(&self) -> bool {
        self.current() == LifecycleState::Idle
    }

    pub fn is_processing(&self) -> bool {
        self.current() == LifecycleState::Processing
    }

    pub fn subscribe(&self, observer: impl Fn(LifecycleState) + Send + Sync + 'static) {
        self.observers.write().push(Arc::new(observer));
    }

    /// Move to `next`. Returns whether the state changed.
    pub fn change_to(&self, next: LifecycleState) -> bool {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, next)
        };
        if previous == next {
            return false;
        }
        debug!(from = %previous, to = %next, "lifecycle transition");
        self.notify(next);
        true
    }

    /// Atomically move from `from` to `to`. Fails without side effects when
    /// the current state is not `from`.
    pub fn try_transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        {
            let mut state = self.state.lock();
            if *state != from {
                return false;
            }
            *state = to;
        }
        if from != to {
            debug!(from = %from, to = %to, "lifecycle transition");
            self.notify(to);
        }
        true
    }

    fn notify(&self, state: LifecycleState) {
        let observers: Vec<Observer> = self.observers.read().clone();
        for observer in observers {
            observer(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder(lsm: &Lifecycle) -> Arc<Mutex<Vec<LifecycleState>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        lsm.subscribe(move |s| sink.lock().push(s));
        seen
    }

    #[test]
    fn starts_idle() {
        let lsm = Lifecycle::new();
        assert!(lsm.is_idle());
        assert!(!lsm.is_processing());
    }

    #[test]
    fn observers_fire_only_on_change() {
        let lsm = Lifecycle::new();
        let seen = recorder(&lsm);

        assert!(lsm.change_to(LifecycleState::Processing));
        assert!(!lsm.change_to(LifecycleState::Processing));
        assert!(lsm.change_to(LifecycleState::Speaking));
        assert!(lsm.change_to(LifecycleState::Idle));
        assert!(!lsm.change_to(LifecycleState::Idle));

        assert_eq!(
            *seen.lock(),
            vec![LifecycleState::Processing, LifecycleState::Speaking, LifecycleState::Idle]
        );
    }

    #[test]
    fn observer_sees_committed_state() {
        let lsm = Arc::new(Lifecycle::new());
        let observed = Arc::new(Mutex::new(None));
        let (lsm2, slot) = (lsm.clone(), observed.clone());
        lsm.subscribe(move |_| *slot.lock() = Some(lsm2.current()));

        lsm.change_to(LifecycleState::Error);
        assert_eq!(*observed.lock(), Some(LifecycleState::Error));
    }

    #[test]
    fn try_transition_is_conditional() {
        let lsm = Lifecycle::new();
        let seen = recorder(&lsm);

        assert!(lsm.try_transition(LifecycleState::Idle, LifecycleState::Processing));
        assert!(!lsm.try_transition(LifecycleState::Idle, LifecycleState::Processing));
        assert!(lsm.is_processing());
        assert_eq!(*seen.lock(), vec![LifecycleState::Processing]);
    }

    #[test]
    fn concurrent_admission_admits_exactly_one() {
        let lsm = Arc::new(Lifecycle::new());
        let admitted = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let lsm = lsm.clone();
                let admitted = admitted.clone();
                std::thread::spawn(move || {
                    if lsm.try_transition(LifecycleState::Idle, LifecycleState::Processing) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }
}
