mod picker;

pub use picker::SeedPicker;

/// Mouse state sampled once per window tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointerState {
    /// Cursor position in image pixels, `None` while outside the image
    pub position: Option<(f32, f32)>,
    pub left_down: bool,
}

/// Accumulates the seed points clicked during one picking session
#[derive(Debug, Default)]
pub struct ClickSession {
    points: Vec<(u32, u32)>,
    was_down: bool,
}

impl ClickSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample; a point is recorded on each left-button press
    ///
    /// Returns the recorded point, if this sample produced one.
    pub fn observe(&mut self, state: PointerState) -> Option<(u32, u32)> {
        let pressed = state.left_down && !self.was_down;
        self.was_down = state.left_down;

        if !pressed {
            return None;
        }

        let (x, y) = state.position?;
        let point = (x.max(0.0) as u32, y.max(0.0) as u32);
        self.points.push(point);
        Some(point)
    }

    pub fn points(&self) -> &[(u32, u32)] {
        &self.points
    }

    pub fn into_points(self) -> Vec<(u32, u32)> {
        self.points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f32, y: f32, left_down: bool) -> PointerState {
        PointerState {
            position: Some((x, y)),
            left_down,
        }
    }

    #[test]
    fn records_once_per_press() {
        let mut session = ClickSession::new();

        assert_eq!(session.observe(at(10.0, 20.0, true)), Some((10, 20)));
        assert_eq!(session.observe(at(11.0, 21.0, true)), None);
        assert_eq!(session.observe(at(11.0, 21.0, false)), None);
        assert_eq!(session.observe(at(30.7, 40.2, true)), Some((30, 40)));

        assert_eq!(session.into_points(), vec![(10, 20), (30, 40)]);
    }

    #[test]
    fn press_outside_image_is_ignored() {
        let mut session = ClickSession::new();
        let outside = PointerState {
            position: None,
            left_down: true,
        };

        assert_eq!(session.observe(outside), None);
        // Dragging back in while still held is not a new press
        assert_eq!(session.observe(at(5.0, 5.0, true)), None);
        assert!(session.points().is_empty());
    }
}
