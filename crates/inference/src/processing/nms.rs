use super::post::Candidate;
use std::fmt;
use std::str::FromStr;

/// Guards the IoU division when both boxes are degenerate.
const IOU_EPSILON: f32 = 1e-6;

/// Whether overlapping boxes of different classes suppress each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsMode {
    #[default]
    PerClass,
    Agnostic,
}

impl FromStr for NmsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "per-class" | "perclass" | "class" => Ok(NmsMode::PerClass),
            "agnostic" | "class-agnostic" => Ok(NmsMode::Agnostic),
            other => Err(format!("unknown NMS mode '{}'", other)),
        }
    }
}

impl fmt::Display for NmsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NmsMode::PerClass => f.write_str("per-class"),
            NmsMode::Agnostic => f.write_str("agnostic"),
        }
    }
}

/// Intersection over union of two center-format boxes.
#[inline]
pub fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let (ax1, ay1, ax2, ay2) = a.corners();
    let (bx1, by1, bx2, by2) = b.corners();

    let iw = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
    let ih = (ay2.min(by2) - ay1.max(by1)).max(0.0);
    let inter = iw * ih;

    let union = a.w * a.h + b.w * b.h - inter;
    inter / (union + IOU_EPSILON)
}

/// Greedy NMS with reusable scratch space.
#[derive(Debug, Default)]
pub struct Nms {
    order: Vec<usize>,
    removed: Vec<bool>,
}

impl Nms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push the indices of surviving `candidates` into `keep`, highest
    /// confidence first. Equal confidences keep anchor order.
    pub fn run(
        &mut self,
        candidates: &[Candidate],
        iou_threshold: f32,
        mode: NmsMode,
        keep: &mut Vec<usize>,
    ) {
        keep.clear();

        self.order.clear();
        self.order.extend(0..candidates.len());
        self.order.sort_by(|&a, &b| {
            candidates[b]
                .confidence
                .total_cmp(&candidates[a].confidence)
                .then(candidates[a].anchor.cmp(&candidates[b].anchor))
        });

        self.removed.clear();
        self.removed.resize(candidates.len(), false);

        for (pos, &i) in self.order.iter().enumerate() {
            if self.removed[i] {
                continue;
            }
            keep.push(i);

            let current = &candidates[i];
            for &j in &self.order[pos + 1..] {
                if self.removed[j] {
                    continue;
                }
                if mode == NmsMode::PerClass && candidates[j].class_id != current.class_id {
                    continue;
                }
                if iou(current, &candidates[j]) > iou_threshold {
                    self.removed[j] = true;
                }
            }
        }
    }
}

/// One-shot convenience around [`Nms::run`].
pub fn non_max_suppression(
    candidates: &[Candidate],
    iou_threshold: f32,
    mode: NmsMode,
) -> Vec<usize> {
    let mut keep = Vec::new();
    Nms::new().run(candidates, iou_threshold, mode, &mut keep);
    keep
}
