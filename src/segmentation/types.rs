use crate::frames::FrameSequence;
use anyhow::Result;
use ndarray::{Array2, Array3};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

/// Identifies one tracked object across frames (also picks its overlay colour)
pub type ObjectId = u32;

/// Boolean segmentation mask, shape (height, width)
pub type Mask = Array2<bool>;

/// frame index -> object id -> mask
pub type SegmentMap = BTreeMap<usize, BTreeMap<ObjectId, Mask>>;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("click label must be 0 (negative) or 1 (positive), got {0}")]
pub struct LabelError(pub i64);

/// Whether a click marks foreground or background
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointLabel {
    Negative,
    Positive,
}

impl PointLabel {
    /// Label value the mask decoder expects
    pub fn as_f32(self) -> f32 {
        match self {
            PointLabel::Negative => 0.0,
            PointLabel::Positive => 1.0,
        }
    }
}

impl TryFrom<i64> for PointLabel {
    type Error = LabelError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PointLabel::Negative),
            1 => Ok(PointLabel::Positive),
            other => Err(LabelError(other)),
        }
    }
}

/// A labelled click in frame pixel coordinates, written `X,Y,LABEL` on the command line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickPoint {
    pub x: f32,
    pub y: f32,
    pub label: PointLabel,
}

impl FromStr for ClickPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, label] = parts.as_slice() else {
            return Err(format!("expected X,Y,LABEL, got {:?}", s));
        };

        let x = parse_coordinate("x", x)?;
        let y = parse_coordinate("y", y)?;
        let label = label
            .parse::<i64>()
            .map_err(|e| format!("bad label {:?}: {}", label, e))?;
        let label = PointLabel::try_from(label).map_err(|e| e.to_string())?;

        Ok(Self { x, y, label })
    }
}

/// An (x0, y0, x1, y1) box in frame pixels, written `X0,Y0,X1,Y1` on the command line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox(pub [f32; 4]);

impl FromStr for BoundingBox {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x0, y0, x1, y1] = parts.as_slice() else {
            return Err(format!("expected X0,Y0,X1,Y1, got {:?}", s));
        };

        Ok(Self([
            parse_coordinate("x0", x0)?,
            parse_coordinate("y0", y0)?,
            parse_coordinate("x1", x1)?,
            parse_coordinate("y1", y1)?,
        ]))
    }
}

fn parse_coordinate(name: &str, value: &str) -> Result<f32, String> {
    let parsed = value
        .parse::<f32>()
        .map_err(|e| format!("bad {} {:?}: {}", name, value, e))?;
    if !parsed.is_finite() {
        return Err(format!("{} must be finite, got {:?}", name, value));
    }
    Ok(parsed)
}

/// Raw predictor output for one frame
///
/// `mask_logits` has shape (objects, height, width), aligned with `object_ids`.
#[derive(Debug, Clone)]
pub struct FrameMasks {
    pub frame_index: usize,
    pub object_ids: Vec<ObjectId>,
    pub mask_logits: Array3<f32>,
}

/// Lazy, forward-only sequence of per-frame predictor outputs
pub type Propagation<'a> = Box<dyn Iterator<Item = Result<FrameMasks>> + 'a>;

/// Trait for promptable video segmentation models
///
/// Implementations own the model; the per-video state is handed back to the
/// caller so one model can serve several sessions.
pub trait VideoPredictor {
    type State;

    /// Bind a fresh inference state to an ordered frame sequence
    fn init_state(&mut self, frames: &FrameSequence) -> Result<Self::State>;

    /// Add labelled clicks for one object on one frame
    ///
    /// Returns the masks of every object prompted on that frame.
    fn add_new_points(
        &mut self,
        state: &mut Self::State,
        frame_index: usize,
        object_id: ObjectId,
        points: &[[f32; 2]],
        labels: &[PointLabel],
    ) -> Result<FrameMasks>;

    /// Propagate the prompted masks through the video, yielding frames in order
    ///
    /// The sequence is not restartable once exhausted.
    fn propagate_in_video<'a>(&'a mut self, state: &'a mut Self::State) -> Result<Propagation<'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_click_point() {
        let point: ClickPoint = "210, 350,1".parse().unwrap();
        assert_eq!(
            point,
            ClickPoint {
                x: 210.0,
                y: 350.0,
                label: PointLabel::Positive
            }
        );
    }

    #[test]
    fn rejects_bad_label() {
        assert!("1,2,3".parse::<ClickPoint>().is_err());
        assert_eq!(PointLabel::try_from(-1), Err(LabelError(-1)));
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!("1,2".parse::<ClickPoint>().is_err());
        assert!("1,2,1,0".parse::<ClickPoint>().is_err());
    }

    #[test]
    fn rejects_non_finite_coordinates() {
        assert!("nan,1,1".parse::<ClickPoint>().is_err());
        assert!("inf,0,1".parse::<ClickPoint>().is_err());
        assert!("0,-inf,0".parse::<ClickPoint>().is_err());
        assert!("0,1,2,NaN".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn parses_bounding_box() {
        let bbox: BoundingBox = "10, 20,110,220".parse().unwrap();
        assert_eq!(bbox, BoundingBox([10.0, 20.0, 110.0, 220.0]));
        assert!("1,2,3".parse::<BoundingBox>().is_err());
    }
}
