//! Per-floor map view: node graph editing with undo, calibration tuning and
//! the render frame handed to whatever draws the screen.

use tracing::{debug, info};

use super::transform::{marker_size, polyline, Calibration, DrawBox, Edge, Pixel, Size};
use crate::bus::Bus;
use crate::models::{FloorKey, PlanarPoint};
use crate::store::FloorStore;

/// Intrinsic image size assumed until the real one is known.
pub const DEFAULT_IMAGE_SIZE: Size = Size { w: 1000.0, h: 1000.0 };

pub const DEFAULT_STEP: f64 = 0.5;

// ---

/// Static description of one floor's map.
#[derive(Debug, Clone)]
pub struct FloorLayout {
    // ---
    pub floor: FloorKey,
    /// Full node set as shipped with the app.
    pub manifest: Vec<PlanarPoint>,
    pub calibration: Calibration,
    /// Intrinsic floor plan size, if already resolved.
    pub image_size: Option<Size>,
}

impl FloorLayout {
    /// Layout whose calibration is the manifest's bounding box plus `pad`.
    pub fn fitted(floor: FloorKey, manifest: Vec<PlanarPoint>, pad: f64) -> Option<FloorLayout> {
        let calibration = Calibration::from_points(&manifest, pad)?;
        Some(FloorLayout {
            floor,
            manifest,
            calibration,
            image_size: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeMarker {
    pub id: String,
    pub pixel: Pixel,
}

/// Everything needed to draw one frame of a floor screen.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFrame {
    // ---
    pub draw: DrawBox,
    pub marker_size: f64,
    pub nodes: Vec<NodeMarker>,
    /// Hazard markers, snapped to whole pixels.
    pub hazards: Vec<Pixel>,
    pub current: Option<Pixel>,
    /// `points` attribute of the route polyline; empty when there is no route.
    pub polyline: String,
}

pub struct MapView {
    // ---
    floor: FloorKey,
    bus: Bus,
    manifest: Vec<PlanarPoint>,
    points: Vec<PlanarPoint>,
    undo: Vec<PlanarPoint>,
    calibration: Calibration,
    step: f64,
    locked: bool,
    image: Size,
}

impl MapView {
    // ---
    pub fn new(layout: FloorLayout, bus: Bus) -> MapView {
        // ---
        MapView {
            floor: layout.floor,
            bus,
            points: layout.manifest.clone(),
            manifest: layout.manifest,
            undo: Vec::new(),
            calibration: layout.calibration.sanitized(),
            step: DEFAULT_STEP,
            locked: false,
            image: layout.image_size.unwrap_or(DEFAULT_IMAGE_SIZE),
        }
    }

    pub fn floor(&self) -> FloorKey {
        self.floor
    }

    pub fn points(&self) -> &[PlanarPoint] {
        &self.points
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Record the floor plan's intrinsic size once it has been decoded.
    pub fn set_image_size(&mut self, size: Size) {
        self.image = size;
    }

    /// Remove a node locally and ask the server to drop it from the graph.
    ///
    /// Returns `false`, publishing nothing, if no node has that id.
    pub fn delete_node(&mut self, id: &str) -> bool {
        // ---
        let Some(idx) = self.points.iter().position(|p| p.id == id) else {
            debug!(floor = %self.floor, node = id, "delete of unknown node ignored");
            return false;
        };

        let removed = self.points.remove(idx);
        self.bus.delete_node(self.floor, &removed.id);
        self.undo.push(removed);
        true
    }

    /// Re-add the most recently deleted node.
    pub fn undo(&mut self) -> Option<&PlanarPoint> {
        // ---
        let restored = self.undo.pop()?;
        self.bus.restore_node(self.floor, &restored.id);
        self.points.push(restored);
        self.points.last()
    }

    /// Put back every node from the manifest and clear the undo history.
    pub fn restore_all(&mut self) {
        // ---
        self.undo.clear();
        self.points = self.manifest.clone();
        self.bus.restore_graph(self.floor);
        info!(floor = %self.floor, nodes = self.points.len(), "graph restored");
    }

    /// Move one calibration bound by `delta`. Ignored while locked.
    pub fn bump(&mut self, edge: Edge, delta: f64) -> bool {
        // ---
        if self.locked {
            return false;
        }
        self.calibration = self.calibration.bumped(edge, delta);
        true
    }

    /// Move one bound by `steps` increments of the current step.
    pub fn nudge(&mut self, edge: Edge, steps: i32) -> bool {
        self.bump(edge, self.step * f64::from(steps))
    }

    pub fn set_step(&mut self, step: f64) {
        if step.is_finite() && step > 0.0 {
            self.step = step;
        }
    }

    pub fn set_calibration(&mut self, calibration: Calibration) -> bool {
        // ---
        if self.locked {
            return false;
        }
        self.calibration = calibration.sanitized();
        true
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn render(&self, container: Size, store: &FloorStore) -> RenderFrame {
        // ---
        let draw = DrawBox::contain(container, self.image);
        let cal = &self.calibration;

        RenderFrame {
            draw,
            marker_size: marker_size(&draw),
            nodes: self
                .points
                .iter()
                .map(|p| NodeMarker {
                    id: p.id.clone(),
                    pixel: cal.to_pixel(p.xy(), &draw),
                })
                .collect(),
            hazards: store
                .hazards()
                .iter()
                .map(|h| cal.to_pixel(*h, &draw).rounded())
                .collect(),
            current: store.current().map(|c| cal.to_pixel(c, &draw)),
            polyline: polyline(store.path(), cal, &draw),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use std::time::Duration;

    use super::*;
    use crate::bus::{BusConfig, QueuePolicy};
    use crate::models::{Inbound, Outbound, Xy};

    fn offline_bus() -> Bus {
        // no runtime in a plain #[test], so nothing connects and all sends queue
        Bus::new(BusConfig {
            label: "test".into(),
            url: "ws://127.0.0.1:9".into(),
            reconnect_delay: Duration::from_millis(10),
            policy: QueuePolicy::Buffer,
        })
    }

    fn layout4() -> FloorLayout {
        FloorLayout {
            floor: FloorKey::F4,
            manifest: PlanarPoint::from_pairs(&[[2.0, 1.0], [6.0, 1.0], [10.0, 1.0]]),
            calibration: Calibration::new(-32.0, 52.5, -38.0, 39.0),
            image_size: None,
        }
    }

    fn sent(bus: &Bus) -> Vec<serde_json::Value> {
        bus.pending_messages()
            .iter()
            .filter_map(|m| serde_json::from_str(m).ok())
            .collect()
    }

    #[test]
    fn test_delete_undo_restore() {
        // ---
        let bus = offline_bus();
        let mut view = MapView::new(layout4(), bus.clone());

        assert!(view.delete_node("(6,1)"));
        assert!(!view.delete_node("(99,99)"), "unknown id");
        assert_eq!(view.points().len(), 2);
        assert_eq!(view.undo_depth(), 1);

        let restored = view.undo().map(|p| p.id.clone());
        assert_eq!(restored.as_deref(), Some("(6,1)"));
        assert_eq!(view.points().len(), 3);
        assert!(view.undo().is_none(), "undo stack empty");

        view.delete_node("(2,1)");
        view.delete_node("(10,1)");
        view.restore_all();
        assert_eq!(view.points(), layout4().manifest.as_slice());
        assert_eq!(view.undo_depth(), 0);

        let kinds: Vec<String> = sent(&bus)
            .iter()
            .filter_map(|v| v["kind"].as_str().map(str::to_string))
            .collect();
        assert_eq!(
            kinds,
            ["delete_node", "restore_node", "delete_node", "delete_node", "restore_graph"]
        );

        let first: Outbound = Outbound::DeleteNode {
            floor: FloorKey::F4,
            node: "(6,1)".into(),
        };
        assert_eq!(sent(&bus)[0], serde_json::to_value(&first).unwrap());
    }

    #[test]
    fn test_bump_respects_lock_and_guard() {
        // ---
        let mut view = MapView::new(layout4(), offline_bus());

        assert!(view.nudge(Edge::X0, 2));
        assert_eq!(view.calibration().x0, -31.0);

        view.lock();
        assert!(!view.bump(Edge::X0, 10.0));
        assert!(!view.set_calibration(Calibration::new(0.0, 1.0, 0.0, 1.0)));
        assert_eq!(view.calibration().x0, -31.0);

        view.unlock();
        // dragging y1 below y0 collapses to the epsilon guard
        view.bump(Edge::Y1, -200.0);
        let cal = view.calibration();
        assert!(cal.y1 > cal.y0);

        view.set_step(0.0);
        assert_eq!(view.step(), DEFAULT_STEP, "non-positive step rejected");
        view.set_step(0.25);
        assert_eq!(view.step(), 0.25);
    }

    #[test]
    fn test_render_frame() {
        // ---
        let view = MapView::new(layout4(), offline_bus());
        let mut store = FloorStore::new(FloorKey::F4, Duration::from_millis(3000));
        store.apply_at(
            &Inbound::Position {
                floor: FloorKey::F4,
                current: Some(Xy::new(2.0, 1.0)),
                path: Some(vec![Xy::new(2.0, 1.0), Xy::new(6.0, 1.0)]),
            },
            0,
        );
        store.apply_at(
            &Inbound::Hazard {
                floor: FloorKey::F4,
                node: Xy::new(6.0, 1.0),
                active: true,
            },
            0,
        );

        let frame = view.render(Size::new(300.0, 300.0), &store);

        assert_eq!(
            frame.draw,
            DrawBox {
                off_x: 0.0,
                off_y: 0.0,
                draw_w: 300.0,
                draw_h: 300.0,
                scale: 0.3,
            }
        );
        assert_eq!(frame.marker_size, 6.25);
        assert_eq!(frame.nodes.len(), 3);
        assert_eq!(frame.polyline, "120.71,148.05 134.91,148.05");
        assert_eq!(frame.hazards, vec![Pixel { left: 135.0, top: 148.0 }]);

        let current = frame.current.unwrap();
        assert!((current.left - 120.710).abs() < 0.01);
        assert!((current.top - 148.052).abs() < 0.01);
    }

    #[test]
    fn test_fitted_layout_letterboxed() {
        // ---
        assert!(FloorLayout::fitted(FloorKey::B1, Vec::new(), 1.0).is_none(), "empty manifest");

        let manifest = PlanarPoint::from_pairs(&[[0.0, 0.0], [10.0, 5.0]]);
        let layout = FloorLayout::fitted(FloorKey::B1, manifest, 1.0).unwrap();
        assert_eq!(layout.calibration, Calibration::new(-1.0, 11.0, -1.0, 6.0));

        let mut view = MapView::new(layout, offline_bus());
        let store = FloorStore::new(FloorKey::B1, Duration::from_millis(3000));

        // default square image fills the square container
        let frame = view.render(Size::new(400.0, 400.0), &store);
        assert!((frame.draw.draw_h - 400.0).abs() < 1e-9);

        // a 2:1 plan is letterboxed top and bottom
        view.set_image_size(Size::new(2000.0, 1000.0));
        let frame = view.render(Size::new(400.0, 400.0), &store);
        assert!((frame.draw.scale - 0.2).abs() < 1e-9);
        assert!((frame.draw.draw_w - 400.0).abs() < 1e-9);
        assert!((frame.draw.draw_h - 200.0).abs() < 1e-9);
        assert!((frame.draw.off_y - 100.0).abs() < 1e-9);
        assert_eq!(frame.draw.off_x, 0.0);
        assert!((frame.marker_size - 400.0 / 48.0).abs() < 1e-9);

        let far = &frame.nodes[1].pixel;
        assert!((far.left - 400.0 * 11.0 / 12.0).abs() < 1e-6);
        assert!((far.top - (100.0 + 200.0 / 7.0)).abs() < 1e-6);
        for node in &frame.nodes {
            assert!(frame.draw.contains(node.pixel), "{} outside the plan", node.id);
        }
    }

    #[test]
    fn test_render_before_layout() {
        // ---
        let view = MapView::new(layout4(), offline_bus());
        let store = FloorStore::new(FloorKey::F4, Duration::from_millis(3000));

        let frame = view.render(Size::default(), &store);
        assert_eq!(frame.draw, DrawBox::EMPTY);
        assert_eq!(frame.marker_size, 5.0);
        assert!(frame.polyline.is_empty());
        assert!(frame.current.is_none());
    }
}
