use std::env;
use std::sync::LazyLock;

macro_rules! define_env_vars {
    (@fallback $env_name:expr) => {
        panic!("Missing required environment variable: {}", $env_name)
    };
    (@fallback $env_name:expr, $default:expr) => {
        String::from($default)
    };
    ($(($name:ident, $env_name:expr, $type:ty $(, $default:expr)?)),* $(,)?) => {
        $(
            pub static $name: LazyLock<$type> = LazyLock::new(|| {
                let val = match env::var($env_name) {
                    Ok(val) => val,
                    Err(_) => define_env_vars!(@fallback $env_name $(, $default)?),
                };
                val.parse::<$type>().unwrap_or_else(|_| {
                    panic!(
                        "Failed to parse environment variable {} with value '{}' as {}",
                        $env_name,
                        val,
                        stringify!($type)
                    )
                })
            });
        )*

        /// Force initialization of all environment variables at startup
        /// Call this early in main() to fail fast if any env vars are missing
        pub fn check_env() {
            $(
                let _ = *$name;
            )*
        }
    };
}

// A fourth element is the default used when the variable is unset
define_env_vars!(
    (REDIS_URL, "REDIS_URL", String),
    (MESSAGES_CHANNEL, "MESSAGES_CHANNEL", String, "messages:published"),
    (TOTAL_SLOTS, "TOTAL_SLOTS", usize, "16"),
    (REPLICA_COUNT, "REPLICA_COUNT", usize, "2"),
    (
        HEARTBEAT_INTERVAL_MILLIS,
        "HEARTBEAT_INTERVAL_MILLIS",
        u64,
        "1000"
    ),
    (
        ALLOWED_MISSED_HEARTBEATS,
        "ALLOWED_MISSED_HEARTBEATS",
        u32,
        "3"
    ),
    (LEASE_TTL_SECONDS, "LEASE_TTL_SECONDS", u64, "60"),
    (
        METRICS_REPORT_PERIOD_SECONDS,
        "METRICS_REPORT_PERIOD_SECONDS",
        u64,
        "5"
    ),
    (STORE_TIMEOUT_MILLIS, "STORE_TIMEOUT_MILLIS", u64, "2000"),
    (MAX_IN_FLIGHT_MESSAGES, "MAX_IN_FLIGHT_MESSAGES", usize, "64"),
    (
        MAX_PROCESSING_DELAY_MILLIS,
        "MAX_PROCESSING_DELAY_MILLIS",
        u64,
        "100"
    ),
);
