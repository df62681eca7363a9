use std::time::Duration;

/// Let's Encrypt production directory, the default ACME endpoint.
pub const LETS_ENCRYPT_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";

pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// First delay between ACME order status polls; backs off from here.
pub const ACME_POLL_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Total time an order may spend polling before it counts as timed out.
pub const ACME_POLL_TIMEOUT: Duration = Duration::from_secs(300);

/// Attempts against the CA before a transport failure becomes terminal.
pub const ACME_RETRY_ATTEMPTS: u32 = 3;
pub const ACME_RETRY_BACKOFF: Duration = Duration::from_secs(2);
pub const ACME_RETRY_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Reconnect backoff for the Marathon event stream.
pub const EVENT_BACKOFF_MIN: Duration = Duration::from_millis(100);
pub const EVENT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Delay before the first renewal sweep after startup.
pub const RENEWAL_STARTUP_GRACE: Duration = Duration::from_secs(60);

/// How long shutdown waits for an in-flight reconciliation pass.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);
