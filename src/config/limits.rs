//! System limits and capacity configuration

/// Document limits.
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 4 * 1024 * 1024; // 4 MiB

/// Timer limits. Every delay is clamped to at least this value so a
/// self-rescheduling zero-delay timer still advances the clock.
pub const MIN_TIMER_DELAY_MS: u64 = 1;

/// Animation frames.
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;

/// JS runtime limits.
pub const DEFAULT_LOOP_ITERATION_LIMIT: u64 = 50_000_000;
pub const DEFAULT_RECURSION_LIMIT: usize = 1_024;

/// Console capture.
pub const DEFAULT_MAX_CONSOLE_ENTRIES: usize = 512;
pub const MAX_CONSOLE_MESSAGE_CHARS: usize = 4_096;

/// Elements kept alive while unattached (created by script or removed).
pub const MAX_DETACHED_ELEMENTS: usize = 1_024;

/// Default viewport before the host reports a size.
pub const DEFAULT_VIEWPORT: (u32, u32) = (1280, 720);

/// Canvas defaults used by the DPR sizer when attributes are absent.
pub const CANVAS_DEFAULT_WIDTH: u32 = 300;
pub const CANVAS_DEFAULT_HEIGHT: u32 = 150;
