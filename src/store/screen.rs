//! Mounted floor screen: subscribes a [`FloorStore`] to the shared bus and
//! runs the effects its reducers emit.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use super::floor::{Effect, FloorStore};
use crate::bus::{Bus, Subscription};
use crate::map::{FloorLayout, MapView, RenderFrame, Size};
use crate::models::FloorKey;

// ---

/// Where alert effects end up: vibration motor, modal, notification centre.
pub trait AlertSurface: Send + Sync {
    fn perform(&self, effect: &Effect);
}

type SharedStore = Arc<Mutex<FloorStore>>;

fn lock(store: &SharedStore) -> MutexGuard<'_, FloorStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One floor's screen for as long as it is mounted.
///
/// Dropping it unsubscribes from the bus but leaves the connection running
/// for any other screen.
pub struct FloorScreen {
    // ---
    store: SharedStore,
    view: MapView,
    subscription: Subscription,
}

impl FloorScreen {
    // ---
    pub fn mount(bus: &Bus, layout: FloorLayout, cooldown: Duration, surface: Arc<dyn AlertSurface>) -> FloorScreen {
        // ---
        let floor = layout.floor;
        let store: SharedStore = Arc::new(Mutex::new(FloorStore::new(floor, cooldown)));

        let sink = Arc::clone(&store);
        let subscription = bus.ensure_connected().subscribe(move |envelope| {
            let Some(msg) = envelope.message() else {
                return;
            };
            // effects run after the store is unlocked
            let effects = lock(&sink).apply(msg);
            for effect in &effects {
                surface.perform(effect);
            }
        });

        info!(floor = %floor, "screen mounted");
        FloorScreen {
            store,
            view: MapView::new(layout, bus.clone()),
            subscription,
        }
    }

    pub fn floor(&self) -> FloorKey {
        self.view.floor()
    }

    /// Read the current floor state.
    pub fn with_store<T>(&self, f: impl FnOnce(&FloorStore) -> T) -> T {
        f(&lock(&self.store))
    }

    pub fn dismiss_alert(&self) {
        lock(&self.store).dismiss_alert();
    }

    pub fn view(&self) -> &MapView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut MapView {
        &mut self.view
    }

    pub fn render(&self, container: Size) -> RenderFrame {
        self.view.render(container, &lock(&self.store))
    }

    pub fn unmount(self) {
        debug!(floor = %self.floor(), id = ?self.subscription.id(), "screen unmounted");
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::bus::{BusConfig, QueuePolicy};
    use crate::map::Calibration;
    use crate::models::{PlanarPoint, Xy};

    #[derive(Default)]
    struct Recorder {
        effects: Mutex<Vec<Effect>>,
    }

    impl AlertSurface for Recorder {
        fn perform(&self, effect: &Effect) {
            self.effects.lock().unwrap().push(effect.clone());
        }
    }

    fn offline_bus() -> Bus {
        Bus::new(BusConfig {
            label: "shared".into(),
            url: "ws://127.0.0.1:9".into(),
            reconnect_delay: Duration::from_millis(10),
            policy: QueuePolicy::Buffer,
        })
    }

    fn layout(floor: FloorKey) -> FloorLayout {
        FloorLayout {
            floor,
            manifest: PlanarPoint::from_pairs(&[[2.0, 1.0], [6.0, 1.0]]),
            calibration: Calibration::new(-32.0, 52.5, -38.0, 39.0),
            image_size: None,
        }
    }

    #[test]
    fn test_two_screens_share_one_bus() {
        // ---
        let bus = offline_bus();
        let recorder = Arc::new(Recorder::default());

        let f4 = FloorScreen::mount(&bus, layout(FloorKey::F4), Duration::from_secs(3), recorder.clone());
        let b1 = FloorScreen::mount(&bus, layout(FloorKey::B1), Duration::from_secs(3), recorder.clone());
        assert_eq!(bus.subscriber_count(), 2);

        bus.dispatch(r#"{"floor":"4F","snapped_list":[[2,1]],"best_path":[[2,1],[6,1]]}"#);
        bus.dispatch(r#"{"kind":"fire_alert","floor":"4F","confidence":0.8}"#);
        bus.dispatch("not json");

        assert_eq!(f4.with_store(|s| s.current()), Some(Xy::new(2.0, 1.0)));
        assert_eq!(b1.with_store(|s| s.current()), None, "other floor untouched");
        assert!(f4.with_store(|s| s.active_alert().is_some()));
        assert_eq!(recorder.effects.lock().unwrap().len(), 3);

        let frame = f4.render(Size::new(300.0, 300.0));
        assert_eq!(frame.polyline, "120.71,148.05 134.91,148.05");

        f4.dismiss_alert();
        assert!(f4.with_store(|s| s.active_alert().is_none()));

        f4.unmount();
        assert_eq!(bus.subscriber_count(), 1);
        drop(b1);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.is_closed(), "unmount leaves the connection alone");
    }

    #[test]
    fn test_graph_edits_go_through_shared_bus() {
        // ---
        let bus = offline_bus();
        let mut screen = FloorScreen::mount(
            &bus,
            layout(FloorKey::F4),
            Duration::from_secs(3),
            Arc::new(Recorder::default()),
        );

        screen.view_mut().delete_node("(2,1)");
        assert_eq!(screen.view().points().len(), 1);
        assert_eq!(bus.pending(), 1);
    }
}
