use std::env;
use std::time::Duration;

/// What happens when someone cancels an appointment whose active payment
/// already succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaidCancellation {
    /// Cancel anyway; refund eligibility is reported by `refund_on_cancel`.
    Allow,
    /// Refuse with `CancellationForbidden`.
    Forbid,
}

impl PaidCancellation {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Some(PaidCancellation::Allow),
            "forbid" => Some(PaidCancellation::Forbid),
            _ => None,
        }
    }
}

/// Operator-tunable scheduling rules.
#[derive(Clone, Debug)]
pub struct Policy {
    pub max_reschedules: u32,
    pub user_reschedule_resets_status: bool,
    pub admin_reschedule_resets_status: bool,
    pub user_paid_cancellation: PaidCancellation,
    pub admin_paid_cancellation: PaidCancellation,
    pub refund_on_cancel: bool,
    pub pending_grace: chrono::Duration,
    pub max_bulk_days: i64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_reschedules: 2,
            user_reschedule_resets_status: true,
            admin_reschedule_resets_status: false,
            user_paid_cancellation: PaidCancellation::Allow,
            admin_paid_cancellation: PaidCancellation::Forbid,
            refund_on_cancel: false,
            pending_grace: chrono::Duration::hours(3),
            max_bulk_days: 366,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    /// Business timezone as a fixed offset from UTC.
    pub business_utc_offset_minutes: i32,
    pub currency: String,
    pub policy: Policy,
    pub sweep_interval: Duration,
    pub store_timeout: Duration,
    pub request_timeout: Duration,
    pub payment_gateway_url: String,
    pub payment_gateway_key: String,
    pub payment_gateway_secret: String,
    pub payment_webhook_secret: String,
    pub notify_webhook_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Policy::default();
        let policy = Policy {
            max_reschedules: env_parse("MAX_RESCHEDULES").unwrap_or(defaults.max_reschedules),
            user_reschedule_resets_status: env_bool("USER_RESCHEDULE_RESETS_STATUS")
                .unwrap_or(defaults.user_reschedule_resets_status),
            admin_reschedule_resets_status: env_bool("ADMIN_RESCHEDULE_RESETS_STATUS")
                .unwrap_or(defaults.admin_reschedule_resets_status),
            user_paid_cancellation: env::var("USER_PAID_CANCELLATION")
                .ok()
                .and_then(|v| PaidCancellation::parse(&v))
                .unwrap_or(defaults.user_paid_cancellation),
            admin_paid_cancellation: env::var("ADMIN_PAID_CANCELLATION")
                .ok()
                .and_then(|v| PaidCancellation::parse(&v))
                .unwrap_or(defaults.admin_paid_cancellation),
            refund_on_cancel: env_bool("REFUND_ON_CANCEL").unwrap_or(defaults.refund_on_cancel),
            pending_grace: env_parse::<i64>("PENDING_GRACE_MINUTES")
                .filter(|minutes| *minutes > 0)
                .and_then(chrono::Duration::try_minutes)
                .unwrap_or(defaults.pending_grace),
            max_bulk_days: env_parse("MAX_BULK_DAYS").unwrap_or(defaults.max_bulk_days),
        };

        Self {
            port: env_parse("PORT").unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "slotbook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            business_utc_offset_minutes: env_parse("BUSINESS_UTC_OFFSET_MINUTES").unwrap_or(0),
            currency: env::var("CURRENCY").unwrap_or_else(|_| "USD".to_string()),
            policy,
            sweep_interval: Duration::from_secs(env_parse("SWEEP_INTERVAL_SECS").unwrap_or(300)),
            store_timeout: Duration::from_millis(env_parse("STORE_TIMEOUT_MS").unwrap_or(5000)),
            request_timeout: Duration::from_millis(
                env_parse("REQUEST_TIMEOUT_MS").unwrap_or(10_000),
            ),
            payment_gateway_url: env::var("PAYMENT_GATEWAY_URL").unwrap_or_default(),
            payment_gateway_key: env::var("PAYMENT_GATEWAY_KEY").unwrap_or_default(),
            payment_gateway_secret: env::var("PAYMENT_GATEWAY_SECRET").unwrap_or_default(),
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").unwrap_or_default(),
        }
    }

    pub fn business_offset(&self) -> anyhow::Result<chrono::FixedOffset> {
        chrono::FixedOffset::east_opt(self.business_utc_offset_minutes * 60).ok_or_else(|| {
            anyhow::anyhow!(
                "BUSINESS_UTC_OFFSET_MINUTES out of range: {}",
                self.business_utc_offset_minutes
            )
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().and_then(|v| match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}
