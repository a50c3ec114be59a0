use std::time::Duration;

/// What to do when the key counter passes `IdempotencyKey::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyExhaustion {
    /// Refuse further requests with `AckError::KeySpaceExhausted`.
    #[default]
    Fail,
    /// Restart at 1 and forget every handled key of this processor.
    Wrap,
}

/// Controls resend, caching and duplicate handling of a request processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Re-enqueue an unanswered request every `resend_interval`.
    pub resend_packet: bool,
    /// How long a waiter sleeps before resending.
    pub resend_interval: Duration,
    /// Keep sent responses so a repeated request can be answered from cache.
    pub use_cache: bool,
    /// Entries older than this are dropped by `update_cache`.
    pub cache_expiry: Duration,
    /// Drop every repeated request outright.
    pub discard_repeated: bool,
    /// A repeat within this window of the cached response gets the cached response again.
    pub ignore_repeat_window: Duration,
    /// A repeat later than this after the cached response is processed as new.
    pub key_timeout: Duration,
    /// Run the service again for a repeated key instead of dropping it.
    pub allow_reprocess_repeated: bool,
    pub key_exhaustion: KeyExhaustion,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            resend_packet: true,
            resend_interval: Duration::from_millis(1000),
            use_cache: true,
            cache_expiry: Duration::from_secs(60),
            discard_repeated: false,
            ignore_repeat_window: Duration::from_secs(5),
            key_timeout: Duration::from_secs(30),
            allow_reprocess_repeated: false,
            key_exhaustion: KeyExhaustion::Fail,
        }
    }
}
