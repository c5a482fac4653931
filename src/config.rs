// src/config.rs
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub operator_api_key: String,
    pub radius: RadiusConfig,
    pub sms: SmsConfig,
    pub sweeps: SweepConfig,
}

#[derive(Debug, Clone)]
pub struct RadiusConfig {
    /// Address the NAS fleet must point authentication and accounting at;
    /// the compliance worker audits against this.
    pub server_ip: String,
    /// Default NAS CoA/Disconnect port when a router record omits one.
    pub coa_port: u16,
    /// Bounded per-target timeout for CoA/Disconnect round trips.
    pub request_timeout_ms: u64,
    /// Hours an active service may overrun its expiry before the sweep
    /// suspends it.
    pub grace_hours: i64,
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub gateway_url: String,
    pub api_key: String,
    pub sender_id: String,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub expiry_secs: u64,
    pub provisioning_secs: u64,
    pub compliance_secs: u64,
    pub dunning_secs: u64,
    pub burst_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv::dotenv().ok();

        Ok(Config {
            environment: env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "production".to_string()),
            host: env::var("HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "9100".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            operator_api_key: env::var("OPERATOR_API_KEY")?,
            radius: RadiusConfig {
                server_ip: env::var("RADIUS_SERVER_IP")
                    .unwrap_or_else(|_| "127.0.0.1".to_string()),
                coa_port: parse_or("RADIUS_COA_PORT", 3799)?,
                request_timeout_ms: parse_or("RADIUS_TIMEOUT_MS", 5000)?,
                grace_hours: parse_or("ENTITLEMENT_GRACE_HOURS", 0)?,
            },
            sms: SmsConfig {
                gateway_url: env::var("SMS_GATEWAY_URL").unwrap_or_default(),
                api_key: env::var("SMS_API_KEY").unwrap_or_default(),
                sender_id: env::var("SMS_SENDER_ID")
                    .unwrap_or_else(|_| "UPEPO".to_string()),
            },
            sweeps: SweepConfig {
                expiry_secs: parse_or("SWEEP_EXPIRY_SECS", 300)?,
                provisioning_secs: parse_or("SWEEP_PROVISIONING_SECS", 30)?,
                compliance_secs: parse_or("SWEEP_COMPLIANCE_SECS", 900)?,
                dunning_secs: parse_or("SWEEP_DUNNING_SECS", 14400)?,
                burst_secs: parse_or("SWEEP_BURST_SECS", 60)?,
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, T::Err> {
    match env::var(key) {
        Ok(v) => v.parse(),
        Err(_) => Ok(default),
    }
}
