/// Application name
pub const APP_NAME: &str = "palaver";

/// Messages requested per backward page (initial load and lazy load)
pub const DEFAULT_PAGE_SIZE: u32 = 14;

/// Messages requested per forward catch-up fetch
pub const DEFAULT_CATCH_UP_BATCH: u32 = 100;

/// Results kept by a search
pub const DEFAULT_SEARCH_PAGE_SIZE: u32 = 10;

/// Messages scanned when a stream has no topic listing
pub const DEFAULT_TOPIC_SCAN_DEPTH: u32 = 1000;

/// Recent direct messages inspected for the conversations sidebar
pub const DEFAULT_RECENT_DM_LIMIT: u32 = 20;

/// Physical lines shown by the chat window before the surface reports a size
pub const DEFAULT_WINDOW_HEIGHT: usize = 14;

/// Lines moved by a page-up / page-down key
pub const DEFAULT_PAGE_SCROLL: usize = 10;

/// Distance (in lines) from the top of history that triggers a prefetch
pub const DEFAULT_PREFETCH_THRESHOLD: usize = 2;

/// Catch-up poll cadence in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Presence refresh cadence in milliseconds
pub const DEFAULT_PRESENCE_INTERVAL_MS: u64 = 2_000;

/// Notification bar blink cadence in milliseconds
pub const DEFAULT_BLINK_INTERVAL_MS: u64 = 700;

/// Delay before resubscribing after the push channel drops, in milliseconds
pub const DEFAULT_LISTENER_BACKOFF_MS: u64 = 5_000;

/// Pause between background history pages, in milliseconds
pub const DEFAULT_PREFETCH_DELAY_MS: u64 = 500;

/// Unread count from which the notification bar uses the "high" style
pub const UNREAD_HIGH_THRESHOLD: u32 = 10;

/// Number of distinct sender colour classes
pub const SENDER_STYLE_BUCKETS: u8 = 8;
