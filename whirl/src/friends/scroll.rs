//! Scroll anchoring across history prepends.
//!
//! Older messages are inserted above the viewport. To keep the messages the
//! user was looking at in place, the view captures its offset and total
//! content height before the load and shifts the offset by the height
//! growth afterwards.

/// Viewport position captured before older history is prepended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    offset: f64,
    height: f64,
}

impl ScrollAnchor {
    /// Record the scroll offset and total content height.
    #[must_use]
    pub const fn capture(offset: f64, height: f64) -> Self {
        Self { offset, height }
    }

    /// Offset that keeps the same content anchored once the content has
    /// grown to `new_height`.
    #[must_use]
    pub fn restore(self, new_height: f64) -> f64 {
        (self.offset + (new_height - self.height)).max(0.0)
    }
}
