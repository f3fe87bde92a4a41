//! Turning store content, unread counters and the roster into styled lines.
//!
//! Nothing here touches a lock: every function works on snapshots.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;

use palaver_net::{PresenceGroups, RecentConversation};
use palaver_shared::constants::{SENDER_STYLE_BUCKETS, UNREAD_HIGH_THRESHOLD};
use palaver_shared::{ConversationKey, Message, UserProfile};
use palaver_store::{Entry, StoreSnapshot, UnreadSnapshot};

use crate::config::ClientConfig;
use crate::context::ActiveContext;
use crate::viewport::Layout;

pub const EMPTY_PLACEHOLDER: &str = "[No messages to display]";
const SIDEBAR_WIDTH: usize = 24;

// ---------------------------------------------------------------------------
// Styled text
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    Plain,
    System,
    Header,
    /// One of the sender colour buckets
    Sender(u8),
    SidebarTitle,
    Highlight,
    Online,
    Away,
    Offline,
    UnreadCount,
    UnreadCountHigh,
    NoUnread,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Span {
    pub style: Style,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Line {
    pub spans: Vec<Span>,
}

impl Line {
    pub fn styled(style: Style, text: impl Into<String>) -> Self {
        Self {
            spans: vec![Span {
                style,
                text: text.into(),
            }],
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::styled(Style::Plain, text)
    }

    pub fn blank() -> Self {
        Self::default()
    }

    pub fn push(&mut self, style: Style, text: impl Into<String>) {
        self.spans.push(Span {
            style,
            text: text.into(),
        });
    }

    /// Unstyled text of the line.
    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }
}

/// Stable colour bucket for a sender name.
pub fn sender_style(name: &str) -> Style {
    let digest = blake3::hash(name.as_bytes());
    Style::Sender(digest.as_bytes()[0] % SENDER_STYLE_BUCKETS)
}

// ---------------------------------------------------------------------------
// Message bodies
// ---------------------------------------------------------------------------

struct Patterns {
    breaks: Regex,
    item: Regex,
    image: Regex,
    anchor: Regex,
    tag: Regex,
    entity: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        breaks: Regex::new(r"(?i)<br\s*/?>|</?(p|pre|div|blockquote|ul|ol|h[1-6])\b[^>]*>|</li>")
            .expect("valid regex"),
        item: Regex::new(r"(?i)<li\b[^>]*>").expect("valid regex"),
        image: Regex::new(r"(?i)<img\b[^>]*>").expect("valid regex"),
        anchor: Regex::new(r#"(?is)<a\b[^>]*?href\s*=\s*"([^"]*)"[^>]*>(.*?)</a>"#)
            .expect("valid regex"),
        tag: Regex::new(r"<[^>]*>").expect("valid regex"),
        entity: Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("valid regex"),
    })
}

fn decode_entity(caps: &Captures<'_>) -> String {
    let name = &caps[1];
    let decoded = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
    } else if let Some(dec) = name.strip_prefix('#') {
        dec.parse::<u32>().ok().and_then(char::from_u32)
    } else {
        match name {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => None,
        }
    };
    decoded.map_or_else(|| caps[0].to_string(), String::from)
}

// ---------------------------------------------------------------------------
// Formatter
// ---------------------------------------------------------------------------

/// Formats snapshots into lines. Built once from the client configuration.
#[derive(Debug, Clone, Default)]
pub struct Formatter {
    realm_url: Option<String>,
    abbreviations: HashMap<String, String>,
}

impl Formatter {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            realm_url: config.realm_url.clone(),
            abbreviations: config.stream_abbreviations.clone(),
        }
    }

    /// Flatten a rendered message body into plain text lines.
    ///
    /// Line and paragraph breaks become newlines, links are shown as
    /// `text (href)`, images are dropped and entities decoded. Runs of blank
    /// lines collapse into one; the result always has at least one line.
    pub fn body_lines(&self, raw: &str) -> Vec<String> {
        let p = patterns();

        let text = p.image.replace_all(raw, "");
        let text = p.anchor.replace_all(&text, |caps: &Captures<'_>| {
            let href = self.absolutize(&caps[1]);
            let label = p.tag.replace_all(&caps[2], "");
            let label = label.trim();
            if label.is_empty() || label == href {
                href
            } else {
                format!("{label} ({href})")
            }
        });
        let text = p.item.replace_all(&text, "\n• ");
        let text = p.breaks.replace_all(&text, "\n");
        let text = p.tag.replace_all(&text, "");
        let text = p.entity.replace_all(&text, decode_entity);

        let mut lines: Vec<String> = Vec::new();
        for raw_line in text.split('\n') {
            let line = raw_line.split_whitespace().collect::<Vec<_>>().join(" ");
            let previous_blank = lines.last().map_or(true, |l| l.is_empty());
            if line.is_empty() && previous_blank {
                continue;
            }
            lines.push(line);
        }
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        if lines.is_empty() {
            lines.push(String::new());
        }
        lines
    }

    fn absolutize(&self, href: &str) -> String {
        match &self.realm_url {
            Some(realm) if href.starts_with("/user_uploads") => format!("{realm}{href}"),
            _ => href.to_string(),
        }
    }

    /// Short name of a stream for the notification bar.
    pub fn stream_label<'a>(&'a self, stream: &'a str) -> &'a str {
        self.abbreviations
            .get(stream)
            .map_or(stream, String::as_str)
    }

    // -----------------------------------------------------------------------
    // Chat window
    // -----------------------------------------------------------------------

    /// Title line of the chat window.
    pub fn header(&self, context: &ActiveContext, users: &[UserProfile]) -> Option<Line> {
        let text = match context {
            ActiveContext::Idle => return None,
            ActiveContext::Conversation(ConversationKey::StreamTopic { stream, topic: None }) => {
                return Some(Line::styled(
                    Style::System,
                    format!(
                        "[System]: Viewing ALL topics in stream: {stream} \
                         (Read-only, pick a topic to send a message)"
                    ),
                ));
            }
            ActiveContext::Conversation(ConversationKey::StreamTopic {
                stream,
                topic: Some(topic),
            }) => format!("#{stream} > {topic}"),
            ActiveContext::Conversation(ConversationKey::DirectMessage(participants)) => {
                format!(
                    "Direct message with {}",
                    display_names(participants.emails(), users)
                )
            }
            ActiveContext::Search(query) => format!("Search results for \"{query}\""),
        };
        Some(Line::styled(Style::Header, text))
    }

    /// Lay out the whole conversation for the viewport.
    pub fn layout(
        &self,
        context: &ActiveContext,
        snapshot: &StoreSnapshot,
        users: &[UserProfile],
    ) -> Layout {
        let mut lines = Vec::new();
        let mut ends = Vec::with_capacity(snapshot.entries.len());

        if let Some(header) = self.header(context, users) {
            lines.push(header);
            lines.push(Line::blank());
        }
        if snapshot.real_len() == 0 {
            lines.push(Line::styled(Style::System, EMPTY_PLACEHOLDER));
        }
        let preamble = lines.len();

        for (key, entry) in &snapshot.entries {
            match entry {
                Entry::Message(message) => self.push_message(&mut lines, message),
                Entry::Notice(notice) => {
                    lines.push(Line::styled(
                        Style::System,
                        format!("[System]: {}", notice.text),
                    ));
                }
            }
            lines.push(Line::blank());
            ends.push((*key, lines.len()));
        }

        Layout::new(lines, ends, preamble)
    }

    fn push_message(&self, lines: &mut Vec<Line>, message: &Message) {
        let body = self.body_lines(&message.body);
        let mut rest = body.into_iter();

        let mut first = Line::styled(
            sender_style(&message.sender_display_name),
            format!("[{}]", message.sender_display_name),
        );
        first.push(Style::Plain, format!(": {}", rest.next().unwrap_or_default()));
        lines.push(first);

        for line in rest {
            lines.push(Line::plain(format!("    {line}")));
        }
    }

    // -----------------------------------------------------------------------
    // Notification bar
    // -----------------------------------------------------------------------

    /// One line listing every conversation with unread messages.
    ///
    /// Counts are emphasized only while `blink_on`, so they pulse.
    pub fn notification_bar(
        &self,
        unread: &UnreadSnapshot,
        users: &[UserProfile],
        blink_on: bool,
    ) -> Line {
        if unread.is_empty() {
            return Line::styled(Style::NoUnread, "No unread messages");
        }

        let mut line = Line::default();
        for (idx, (key, count)) in unread.entries.iter().enumerate() {
            if idx > 0 {
                line.push(Style::Plain, " | ");
            }
            let label = match key {
                ConversationKey::StreamTopic { stream, topic } => match topic {
                    Some(topic) => format!("{}:{topic}", self.stream_label(stream)),
                    None => self.stream_label(stream).to_string(),
                },
                ConversationKey::DirectMessage(participants) => {
                    display_names(participants.emails(), users)
                }
            };
            line.push(Style::Plain, format!("{label} "));

            let count_style = match (blink_on, *count >= UNREAD_HIGH_THRESHOLD) {
                (false, _) => Style::Plain,
                (true, false) => Style::UnreadCount,
                (true, true) => Style::UnreadCountHigh,
            };
            line.push(count_style, format!("({count})"));
        }
        line
    }

    // -----------------------------------------------------------------------
    // Sidebars
    // -----------------------------------------------------------------------

    /// Recent direct conversations followed by the stream list.
    pub fn conversations_sidebar(
        &self,
        recent: &[RecentConversation],
        streams: &[String],
        unread: &UnreadSnapshot,
        current_stream: Option<&str>,
    ) -> Vec<Line> {
        let mut lines = vec![Line::styled(Style::SidebarTitle, "─── DMs ───")];
        if recent.is_empty() {
            lines.push(Line::plain("No DMs found!"));
        }
        for conversation in recent {
            lines.push(sidebar_entry(
                &conversation.label,
                unread.count(&conversation.key),
                false,
            ));
        }

        lines.push(Line::blank());
        lines.push(Line::styled(Style::SidebarTitle, "─── Streams ───"));
        if streams.is_empty() {
            lines.push(Line::plain("No streams found!"));
        }
        let mut sorted: Vec<&String> = streams.iter().collect();
        sorted.sort_by_key(|s| s.to_lowercase());
        for stream in sorted {
            lines.push(sidebar_entry(
                &format!("#{stream}"),
                unread.stream_total(stream),
                current_stream == Some(stream.as_str()),
            ));
        }
        lines
    }

    pub fn presence_sidebar(&self, groups: &PresenceGroups) -> Vec<Line> {
        let mut lines = Vec::new();
        let sections = [
            ("Online", Style::Online, &groups.online),
            ("Away", Style::Away, &groups.away),
            ("Offline", Style::Offline, &groups.offline),
        ];
        for (title, style, names) in sections {
            if !lines.is_empty() {
                lines.push(Line::blank());
            }
            lines.push(Line::styled(
                Style::SidebarTitle,
                format!("─── {title} ({}) ───", names.len()),
            ));
            for name in names {
                let mut line = Line::styled(style, "● ");
                line.push(Style::Plain, truncate(name, SIDEBAR_WIDTH - 2));
                lines.push(line);
            }
        }
        lines
    }

    /// Transient status line shown under the chat window.
    pub fn status_line(&self, status: &str) -> Line {
        Line::styled(Style::Status, status)
    }
}

fn sidebar_entry(label: &str, unread: u32, highlighted: bool) -> Line {
    let style = if highlighted {
        Style::Highlight
    } else {
        Style::Plain
    };
    if unread == 0 {
        return Line::styled(style, truncate(label, SIDEBAR_WIDTH));
    }
    let suffix = format!(" ({unread})");
    let room = SIDEBAR_WIDTH.saturating_sub(suffix.chars().count());
    let mut line = Line::styled(style, truncate(label, room));
    let count_style = if unread >= UNREAD_HIGH_THRESHOLD {
        Style::UnreadCountHigh
    } else {
        Style::UnreadCount
    };
    line.push(count_style, suffix);
    line
}

/// Shorten to `max` characters, marking the cut with an ellipsis.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Comma-joined display names for `emails`, falling back to the email.
pub fn display_names(emails: &[String], users: &[UserProfile]) -> String {
    emails
        .iter()
        .map(|email| {
            users
                .iter()
                .find(|u| &u.email == email)
                .map_or(email.as_str(), |u| u.display_name.as_str())
        })
        .collect::<Vec<_>>()
        .join(", ")
}
