use napoli_core::{Breadcrumb, DrillItem};

const DEFAULT_DRILL_SCOPE: &str = "vendas";

/// Breadcrumb trail of the insights view. The overview root is fixed, so the
/// stack is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewStack {
    frames: Vec<Breadcrumb>,
}

impl Default for ViewStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewStack {
    pub fn new() -> Self {
        Self {
            frames: vec![Breadcrumb::root()],
        }
    }

    pub fn frames(&self) -> &[Breadcrumb] {
        &self.frames
    }

    pub fn current(&self) -> &Breadcrumb {
        // frames always holds the root
        &self.frames[self.frames.len() - 1]
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn at_root(&self) -> bool {
        self.frames.len() == 1
    }

    /// Pushes a frame for `item` when it is drillable or the view is still
    /// at the overview. Returns whether the stack changed.
    pub fn drill_down(&mut self, item: &DrillItem) -> bool {
        if !item.drillable && !self.current().is_overview() {
            return false;
        }
        let id = item.id.clone().unwrap_or_else(|| item.name.clone());
        let label = item.label.clone().unwrap_or_else(|| item.name.clone());
        let scope = item
            .id
            .clone()
            .unwrap_or_else(|| DEFAULT_DRILL_SCOPE.to_string());
        self.frames.push(Breadcrumb { id, label, scope });
        true
    }

    pub fn back(&mut self) -> bool {
        if self.at_root() {
            return false;
        }
        self.frames.pop();
        true
    }

    /// Truncates to `index + 1` frames. Out of range or the current frame is
    /// a no-op.
    pub fn jump_to(&mut self, index: usize) -> bool {
        if index >= self.frames.len().saturating_sub(1) {
            return false;
        }
        self.frames.truncate(index + 1);
        true
    }

    pub fn trail(&self) -> String {
        self.frames
            .iter()
            .map(|frame| frame.label.as_str())
            .collect::<Vec<_>>()
            .join(" > ")
    }
}
