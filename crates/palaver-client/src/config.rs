//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a session can start with zero
//! configuration. Invalid values are logged and ignored.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use palaver_shared::constants::*;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Messages per backward page.
    /// Env: `PALAVER_PAGE_SIZE`
    pub page_size: u32,

    /// Messages per forward catch-up.
    /// Env: `PALAVER_CATCH_UP_BATCH`
    pub catch_up_batch: u32,

    /// Results kept by a search.
    /// Env: `PALAVER_SEARCH_PAGE_SIZE`
    pub search_page_size: u32,

    /// Catch-up cadence.
    /// Env: `PALAVER_POLL_INTERVAL_MS`
    pub poll_interval: Duration,

    /// Presence and roster refresh cadence.
    /// Env: `PALAVER_PRESENCE_INTERVAL_MS`
    pub presence_interval: Duration,

    /// Notification bar blink cadence.
    /// Env: `PALAVER_BLINK_INTERVAL_MS`
    pub blink_interval: Duration,

    /// Pause before resubscribing to the event channel.
    /// Env: `PALAVER_LISTENER_BACKOFF_MS`
    pub listener_backoff: Duration,

    /// Whether older history keeps loading in the background after a
    /// conversation is opened.
    /// Env: `PALAVER_PREFETCH_HISTORY` (true/false)
    pub prefetch_history: bool,

    /// Pause between background history pages.
    /// Env: `PALAVER_PREFETCH_DELAY_MS`
    pub prefetch_delay: Duration,

    /// Lines from the top of loaded history at which scrolling requests
    /// another page.
    /// Env: `PALAVER_PREFETCH_THRESHOLD`
    pub prefetch_threshold: usize,

    /// Lines moved by page-up / page-down.
    /// Env: `PALAVER_PAGE_SCROLL`
    pub page_scroll: usize,

    /// Initial chat window height, until the surface reports its size.
    /// Env: `PALAVER_WINDOW_HEIGHT`
    pub window_height: usize,

    /// Direct messages inspected for the conversations sidebar.
    /// Env: `PALAVER_RECENT_DM_LIMIT`
    pub recent_dm_limit: u32,

    /// Messages scanned when a stream has no topic listing.
    /// Env: `PALAVER_TOPIC_SCAN_DEPTH`
    pub topic_scan_depth: u32,

    /// Base URL used to absolutize uploaded-file links.
    /// Env: `PALAVER_REALM_URL`
    pub realm_url: Option<String>,

    /// Short names shown in the notification bar.
    /// Env: `PALAVER_STREAM_ABBREVIATIONS` (`Stream Name=ABBR,Other=OT`)
    pub stream_abbreviations: HashMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            catch_up_batch: DEFAULT_CATCH_UP_BATCH,
            search_page_size: DEFAULT_SEARCH_PAGE_SIZE,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            presence_interval: Duration::from_millis(DEFAULT_PRESENCE_INTERVAL_MS),
            blink_interval: Duration::from_millis(DEFAULT_BLINK_INTERVAL_MS),
            listener_backoff: Duration::from_millis(DEFAULT_LISTENER_BACKOFF_MS),
            prefetch_history: true,
            prefetch_delay: Duration::from_millis(DEFAULT_PREFETCH_DELAY_MS),
            prefetch_threshold: DEFAULT_PREFETCH_THRESHOLD,
            page_scroll: DEFAULT_PAGE_SCROLL,
            window_height: DEFAULT_WINDOW_HEIGHT,
            recent_dm_limit: DEFAULT_RECENT_DM_LIMIT,
            topic_scan_depth: DEFAULT_TOPIC_SCAN_DEPTH,
            realm_url: None,
            stream_abbreviations: HashMap::new(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        set_positive(&lookup, "PALAVER_PAGE_SIZE", &mut config.page_size);
        set_positive(&lookup, "PALAVER_CATCH_UP_BATCH", &mut config.catch_up_batch);
        set_positive(&lookup, "PALAVER_SEARCH_PAGE_SIZE", &mut config.search_page_size);
        set_period(&lookup, "PALAVER_POLL_INTERVAL_MS", &mut config.poll_interval);
        set_period(&lookup, "PALAVER_PRESENCE_INTERVAL_MS", &mut config.presence_interval);
        set_period(&lookup, "PALAVER_BLINK_INTERVAL_MS", &mut config.blink_interval);
        set_period(&lookup, "PALAVER_LISTENER_BACKOFF_MS", &mut config.listener_backoff);
        set_millis(&lookup, "PALAVER_PREFETCH_DELAY_MS", &mut config.prefetch_delay);
        set_parsed(&lookup, "PALAVER_PREFETCH_THRESHOLD", &mut config.prefetch_threshold);
        set_positive(&lookup, "PALAVER_PAGE_SCROLL", &mut config.page_scroll);
        set_positive(&lookup, "PALAVER_WINDOW_HEIGHT", &mut config.window_height);
        set_positive(&lookup, "PALAVER_RECENT_DM_LIMIT", &mut config.recent_dm_limit);
        set_positive(&lookup, "PALAVER_TOPIC_SCAN_DEPTH", &mut config.topic_scan_depth);

        if let Some(val) = lookup("PALAVER_PREFETCH_HISTORY") {
            config.prefetch_history = val != "false" && val != "0";
        }

        if let Some(url) = lookup("PALAVER_REALM_URL") {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                config.realm_url = Some(url.to_string());
            }
        }

        if let Some(raw) = lookup("PALAVER_STREAM_ABBREVIATIONS") {
            config.stream_abbreviations = parse_abbreviations(&raw);
        }

        config
    }
}

fn set_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
        }
    }
}

/// Like [`set_parsed`], but zero is rejected as well.
fn set_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr + Default + PartialEq + Copy,
{
    let previous = *slot;
    set_parsed(lookup, key, slot);
    if *slot == T::default() {
        tracing::warn!(key, "Value must be positive, using default");
        *slot = previous;
    }
}

fn set_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut Duration) {
    let mut millis = slot.as_millis() as u64;
    set_parsed(lookup, key, &mut millis);
    *slot = Duration::from_millis(millis);
}

/// Interval between runs of a periodic task; must not be zero.
fn set_period(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut Duration) {
    let mut millis = slot.as_millis() as u64;
    set_positive(lookup, key, &mut millis);
    *slot = Duration::from_millis(millis);
}

/// Parse `Name=ABBR` pairs separated by commas.
fn parse_abbreviations(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, abbr) = pair.split_once('=')?;
            let (name, abbr) = (name.trim(), abbr.trim());
            if name.is_empty() || abbr.is_empty() {
                tracing::warn!(pair, "Skipping malformed stream abbreviation");
                return None;
            }
            Some((name.to_string(), abbr.to_string()))
        })
        .collect()
}
