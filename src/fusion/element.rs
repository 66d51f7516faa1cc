//! Element records and bounding-box geometry.

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in screen pixels (`right`/`bottom` exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    /// Create a new bounding box.
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top).max(0)
    }

    /// Area in square pixels. Inverted boxes have zero area.
    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    /// Center point, rounded towards the top-left.
    pub fn center(&self) -> (i32, i32) {
        (
            self.left + self.width() / 2,
            self.top + self.height() / 2,
        )
    }

    /// Whether `other` lies entirely inside this box.
    pub fn contains(&self, other: &Bounds) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    /// Overlapping region, if it has a positive area.
    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        let overlap = Bounds::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!overlap.is_empty()).then_some(overlap)
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.intersection(other).is_some()
    }

    /// Intersection-over-union, always within `[0, 1]`.
    ///
    /// Zero-area boxes have an IoU of 0 with everything, themselves included.
    pub fn iou(&self, other: &Bounds) -> f64 {
        if self.is_empty() || other.is_empty() {
            return 0.0;
        }
        let inter = self.intersection(other).map(|b| b.area()).unwrap_or(0);
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            return 0.0;
        }
        (inter as f64 / union as f64).clamp(0.0, 1.0)
    }
}

/// Coarse element type, used for id prefixes and prompt rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Button,
    Input,
    #[default]
    Text,
    Image,
    Toggle,
    List,
    Container,
}

impl ElementKind {
    /// Prefix used when building element ids.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Button => "btn",
            Self::Input => "input",
            Self::Text => "text",
            Self::Image => "img",
            Self::Toggle => "toggle",
            Self::List => "list",
            Self::Container => "view",
        }
    }

    /// Best-effort mapping from a platform widget class name.
    pub fn from_class_name(class_name: &str) -> Self {
        let short = class_name.rsplit('.').next().unwrap_or(class_name);
        let lower = short.to_ascii_lowercase();
        if lower.contains("edittext") || lower.contains("input") || lower.contains("textfield") {
            Self::Input
        } else if lower.contains("switch") || lower.contains("checkbox") || lower.contains("toggle")
            || lower.contains("radio")
        {
            Self::Toggle
        } else if lower.contains("button") {
            Self::Button
        } else if lower.contains("image") {
            Self::Image
        } else if lower.contains("recycler") || lower.contains("listview") || lower.contains("scroll")
        {
            Self::List
        } else if lower.contains("layout")
            || (lower.contains("view") && !lower.contains("textview")) {
            Self::Container
        } else {
            Self::Text
        }
    }
}

/// Where an element's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// The platform UI tree.
    Structured,
    /// Visual text recognition only.
    Recognized,
    /// A structured element whose blank text was filled from recognition.
    Merged,
}

/// Interactivity flags reported for an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Interactivity {
    pub clickable: bool,
    pub editable: bool,
    pub scrollable: bool,
    pub checkable: bool,
    pub checked: bool,
}

impl Interactivity {
    pub fn is_interactive(&self) -> bool {
        self.clickable || self.editable || self.scrollable || self.checkable
    }
}

/// An element as produced by the screen state provider, before fusion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UiElement {
    #[serde(default)]
    pub kind: ElementKind,
    #[serde(default)]
    pub text: String,
    pub bounds: Bounds,
    #[serde(default)]
    pub flags: Interactivity,
}

impl UiElement {
    pub fn new(kind: ElementKind, text: impl Into<String>, bounds: Bounds) -> Self {
        Self {
            kind,
            text: text.into(),
            bounds,
            flags: Interactivity::default(),
        }
    }

    pub fn clickable(mut self) -> Self {
        self.flags.clickable = true;
        self
    }

    pub fn editable(mut self) -> Self {
        self.flags.editable = true;
        self
    }

    pub fn scrollable(mut self) -> Self {
        self.flags.scrollable = true;
        self
    }
}

/// A fused element with a snapshot-unique id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub id: String,
    pub kind: ElementKind,
    pub text: String,
    pub bounds: Bounds,
    pub flags: Interactivity,
    pub provenance: Provenance,
}

impl ElementRecord {
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn is_interactive(&self) -> bool {
        self.flags.is_interactive()
    }

    /// One-line rendering for planner prompts.
    pub fn describe(&self) -> String {
        let mut flags = Vec::new();
        if self.flags.clickable {
            flags.push("clickable");
        }
        if self.flags.editable {
            flags.push("editable");
        }
        if self.flags.scrollable {
            flags.push("scrollable");
        }
        if self.flags.checkable {
            flags.push(if self.flags.checked { "checked" } else { "unchecked" });
        }
        let b = &self.bounds;
        format!(
            "[{}] {} \"{}\" @[{},{},{},{}]{}",
            self.id,
            self.kind.tag(),
            self.text.trim(),
            b.left,
            b.top,
            b.right,
            b.bottom,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            }
        )
    }
}
