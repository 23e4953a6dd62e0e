//! Protocol and timing defaults.

/// Fixed delay between reconnection attempts, in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Upper bound on a single connection attempt, in milliseconds.
///
/// Equal to [`DEFAULT_RECONNECT_DELAY_MS`] unless configured otherwise.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = DEFAULT_RECONNECT_DELAY_MS;

/// How long a correlated request waits for its response, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Primary admin endpoint used when nothing else is configured.
pub const DEFAULT_PRIMARY_URL: &str = "ws://127.0.0.1:8000/ws/admin";

/// Host used for the secondary link when the fetched config omits it.
pub const DEFAULT_SECONDARY_HOST: &str = "127.0.0.1";

/// Port used for the secondary link when the fetched config omits it.
pub const DEFAULT_SECONDARY_PORT: u16 = 8001;

/// Path segment identifying an admin endpoint.
pub const ADMIN_PATH: &str = "/ws/admin";

/// Path segment identifying the push-event (chat) endpoint.
pub const CHAT_PATH: &str = "/ws/chat";

/// Action name of the configuration fetch request.
pub const GET_CONFIG_ACTION: &str = "get_config";
