/// A position in the code cache that jumps may reference before it
/// is known.
///
/// Each forward jump records a [`LabelUse`]; binding the label gives
/// the back-patcher everything it needs. Labels are also the "link"
/// objects carried by deferred exception requests.
#[derive(Debug, Clone, Default)]
pub struct Label {
    /// Resolved offset in the code buffer, once bound.
    pub value: Option<usize>,
    /// Forward references waiting for the label to be bound.
    pub uses: Vec<LabelUse>,
}

/// A forward reference: where the displacement field of a branch
/// was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelUse {
    /// Offset of the displacement field in the code buffer.
    pub offset: usize,
    pub kind: RelocKind,
}

/// Relocation types for label back-patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// 32-bit displacement relative to the end of the field.
    Rel32,
}

impl Label {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a forward reference to this label.
    pub fn add_use(&mut self, offset: usize, kind: RelocKind) {
        self.uses.push(LabelUse { offset, kind });
    }

    /// Mark the label as placed at `offset`.
    pub fn set_value(&mut self, offset: usize) {
        self.value = Some(offset);
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.value.is_some()
    }

    /// Whether there are references that still need patching.
    pub fn has_pending_uses(&self) -> bool {
        !self.uses.is_empty()
    }

    /// Remove and return the recorded references.
    pub fn take_uses(&mut self) -> Vec<LabelUse> {
        std::mem::take(&mut self.uses)
    }
}
