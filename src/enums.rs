/// How hard the decoder tries to recover samples from a damaged or
/// non-standard stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryPolicy {
    /// Stop at the first malformed element, never scan for pixel data.
    Strict,
    /// Resynchronize on malformed elements and fall back to the pixel data
    /// locator when no samples were decoded.
    #[default]
    Tolerant,
    /// Like `Tolerant`, additionally treats headerless buffers as raw pixel
    /// data and guesses the bit depth when it is unknown. The bit depth
    /// guess can misclassify bright 8-bit data as 16-bit.
    Heuristic,
}

impl RecoveryPolicy {
    pub fn resyncs(self) -> bool {
        !matches!(self, RecoveryPolicy::Strict)
    }

    pub fn uses_locator(self) -> bool {
        !matches!(self, RecoveryPolicy::Strict)
    }

    pub fn guesses(self) -> bool {
        matches!(self, RecoveryPolicy::Heuristic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Processor {
    #[default]
    CPU,
    GPU,
}
