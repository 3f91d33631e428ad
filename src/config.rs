//! Tuning knobs for a walk.

/// Largest distance from a function entry still attributed to that function.
pub const MAX_FUNCTION_SIZE_BYTES: usize = 1_000_000;

/// Bytes of a `char *` argument shown before eliding the rest.
pub const STRING_PREVIEW_BYTES: usize = 25;

/// Entries of a `char **` argument shown before eliding the rest.
pub const ARRAY_PREVIEW_ENTRIES: usize = 3;

/// Walks deeper than this are treated as a corrupted chain.
pub const MAX_FRAMES: usize = 64;

/// The C runtime function that calls `main`; the walk stops there.
pub const DEFAULT_ENTRY_WRAPPER: &str = "__libc_start_main";

#[derive(Debug, Clone)]
pub struct TraceOptions {
    pub(crate) max_frames: usize,
    pub(crate) max_function_size: usize,
    pub(crate) string_preview: usize,
    pub(crate) array_preview: usize,
    pub(crate) entry_wrapper: String,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            max_frames: MAX_FRAMES,
            max_function_size: MAX_FUNCTION_SIZE_BYTES,
            string_preview: STRING_PREVIEW_BYTES,
            array_preview: ARRAY_PREVIEW_ENTRIES,
            entry_wrapper: DEFAULT_ENTRY_WRAPPER.to_string(),
        }
    }
}

impl TraceOptions {
    /// Give up on the walk after this many frames.
    ///
    /// Defaults to [`MAX_FRAMES`].
    pub fn max_frames(mut self, frames: usize) -> Self {
        self.max_frames = frames;
        self
    }

    /// Bound used by the resolver when attributing an address to the nearest
    /// preceding function entry.
    ///
    /// Defaults to [`MAX_FUNCTION_SIZE_BYTES`].
    pub fn max_function_size(mut self, bytes: usize) -> Self {
        self.max_function_size = bytes;
        self
    }

    pub fn string_preview(mut self, bytes: usize) -> Self {
        self.string_preview = bytes;
        self
    }

    pub fn array_preview(mut self, entries: usize) -> Self {
        self.array_preview = entries;
        self
    }

    /// Name of the function whose frame ends the walk. That frame itself is
    /// not printed.
    pub fn entry_wrapper(mut self, name: impl Into<String>) -> Self {
        self.entry_wrapper = name.into();
        self
    }
}
