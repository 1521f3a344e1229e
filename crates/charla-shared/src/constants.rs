/// Prefix of the per-user welcome conversation id (`seed_<uid>`)
pub const SEED_ID_PREFIX: &str = "seed_";

/// Prefix of the deterministic direct-conversation id (`dm_<a>_<b>`)
pub const PAIR_ID_PREFIX: &str = "dm_";

/// Participant id of the bot on the other side of the welcome conversation
pub const BOT_USER_ID: &str = "BOT";

/// Title and preview of the welcome conversation
pub const SEED_TITLE: &str = "Test chat";
pub const SEED_PREVIEW: &str = "Welcome to the test chat!";

/// Display name used when a profile cannot be resolved
pub const FALLBACK_DISPLAY_NAME: &str = "User";

/// Notification bodies for messages without text
pub const ATTACHMENT_MARKER: &str = "📷 Image";
pub const NEW_MESSAGE_MARKER: &str = "New message";

/// Remote push defaults for missing fields
pub const PUSH_DEFAULT_TITLE: &str = "New message";
pub const PUSH_DEFAULT_BODY: &str = "You have a new message";

/// Notice rendered when the push gateway dropped pending messages
pub const MESSAGES_LOST_TITLE: &str = "Messages lost";
pub const MESSAGES_LOST_BODY: &str =
    "Some messages may have been lost. Open the app to sync.";

/// Push payload `type` values
pub const PUSH_TYPE_CHAT_MESSAGE: &str = "chat_message";
pub const PUSH_TYPE_SYSTEM: &str = "system_notification";

/// Milliseconds in one day
pub const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Default local session lifetime in days
pub const DEFAULT_SESSION_MAX_DAYS: u32 = 30;

/// Age after which a locally stored push token is considered stale (30 days)
pub const TOKEN_MAX_AGE_MILLIS: i64 = 30 * DAY_MILLIS;

/// Platform reported alongside push tokens
pub const PLATFORM: &str = "rust";
