use bitflags::bitflags;

bitflags! {
    /// Options for [`TreeSequence::dump`](crate::TreeSequence::dump).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DumpOptions: u32 {
        /// Byte-shuffle and deflate every dataset chunk at the maximum
        /// ratio. Checksums are written regardless.
        const COMPRESS = 1;
    }
}

bitflags! {
    /// Options for
    /// [`TreeSequence::tree_diff_iterator`](crate::TreeSequence::tree_diff_iterator).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TreeDiffOptions: u32 {
        /// Pace the stream by consecutive breakpoint pairs instead of
        /// by distinct local trees. Breakpoints that do not change the
        /// tree yield span-only steps.
        const ALL_BREAKPOINTS = 1;
    }
}
