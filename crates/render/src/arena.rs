use bumpalo::Bump;

/// Per-frame scratch memory. Everything a [`crate::CullingEngine`] returns
/// borrows from here; [`FrameArena::reset`] frees it all at frame end.
#[derive(Debug, Default)]
pub struct FrameArena {
    bump: Bump,
}

impl FrameArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bump: Bump::with_capacity(bytes),
        }
    }

    pub fn reset(&mut self) {
        self.bump.reset();
    }

    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }

    pub fn bump(&self) -> &Bump {
        &self.bump
    }
}
