//! Captcha widget bootstrap with a load watchdog.
//!
//! The host embeds the captcha widget and forwards its callbacks here.
//! Each widget instance owns its own callback pair; nothing is registered
//! globally, so several login forms can coexist.
//!
//! A watchdog flags the load as failed if the widget does not report ready
//! within [`CAPTCHA_LOAD_TIMEOUT`], letting the login flow fall back to the
//! portal's legacy captcha.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// How long the widget gets to report ready before the fallback path opens.
pub const CAPTCHA_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

// ─────────────────────────────────────────────────────────────────────────────
// CaptchaWidget
// ─────────────────────────────────────────────────────────────────────────────

/// Callback invoked when the widget yields a solved token.
pub type TokenCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Callback invoked when a previously issued token expires.
pub type ExpiredCallback = Box<dyn Fn() + Send + Sync>;

/// Per-instance captcha widget state.
pub struct CaptchaWidget {
    on_token: TokenCallback,
    on_expired: ExpiredCallback,
    /// Solved token, held until consumed, expired, or reset.
    token: Mutex<Option<String>>,
    loaded: AtomicBool,
    load_failed: AtomicBool,
    /// Cancels the pending watchdog, if any.
    watchdog: Mutex<Option<CancellationToken>>,
    load_timeout: Duration,
}

impl CaptchaWidget {
    pub fn new(on_token: TokenCallback, on_expired: ExpiredCallback) -> Arc<Self> {
        Arc::new(Self {
            on_token,
            on_expired,
            token: Mutex::new(None),
            loaded: AtomicBool::new(false),
            load_failed: AtomicBool::new(false),
            watchdog: Mutex::new(None),
            load_timeout: CAPTCHA_LOAD_TIMEOUT,
        })
    }

    #[cfg(test)]
    fn with_timeout(
        on_token: TokenCallback,
        on_expired: ExpiredCallback,
        load_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            on_token,
            on_expired,
            token: Mutex::new(None),
            loaded: AtomicBool::new(false),
            load_failed: AtomicBool::new(false),
            watchdog: Mutex::new(None),
            load_timeout,
        })
    }

    /// Arms the load watchdog. Called when the host starts loading the
    /// widget; if `notify_loaded` does not arrive within the timeout, the
    /// load is flagged as failed.
    pub async fn begin_load(self: &Arc<Self>) {
        let token = CancellationToken::new();
        {
            let mut watchdog = self.watchdog.lock().await;
            if let Some(old) = watchdog.replace(token.clone()) {
                old.cancel();
            }
        }

        let widget = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(widget.load_timeout) => {
                    warn!("[CAPTCHA] Widget did not load in time, enabling fallback");
                    widget.load_failed.store(true, Ordering::SeqCst);
                }
            }
        });
    }

    /// Host reports the widget finished loading.
    pub async fn notify_loaded(&self) {
        self.loaded.store(true, Ordering::SeqCst);
        self.load_failed.store(false, Ordering::SeqCst);
        if let Some(token) = self.watchdog.lock().await.take() {
            token.cancel();
        }
        info!("[CAPTCHA] Widget loaded");
    }

    /// Host forwards a solved token from the widget.
    pub async fn notify_token(&self, token: &str) {
        {
            let mut held = self.token.lock().await;
            *held = Some(token.to_string());
        }
        (self.on_token)(token);
    }

    /// Host forwards the widget's token-expired signal.
    pub async fn notify_expired(&self) {
        {
            let mut held = self.token.lock().await;
            *held = None;
        }
        (self.on_expired)();
    }

    /// Currently held solved token, if any.
    pub async fn token(&self) -> Option<String> {
        self.token.lock().await.clone()
    }

    /// True when the watchdog expired before the widget loaded.
    pub fn load_failed(&self) -> bool {
        self.load_failed.load(Ordering::SeqCst)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Clears the held token and re-arms the watchdog for a fresh load.
    pub async fn reset(self: &Arc<Self>) {
        {
            let mut held = self.token.lock().await;
            *held = None;
        }
        self.loaded.store(false, Ordering::SeqCst);
        self.load_failed.store(false, Ordering::SeqCst);
        self.begin_load().await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
