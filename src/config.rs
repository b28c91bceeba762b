use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    /// How long an empty room is kept around before the sweeper
    /// collects it (allows a same-identity reconnect to rejoin).
    pub room_ttl_seconds: u64,
    /// No traffic (including pings) within this window counts as a
    /// disconnect.
    pub heartbeat_timeout_seconds: u64,
    pub audit_buffer_capacity: usize,
    pub audit_sink_url: Option<String>,
    pub clinical_sink_url: Option<String>,
    pub transcript_sink_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::MissingJwtSecret)?,
            jwt_expiry_seconds: env::var("JWT_EXPIRY_SECONDS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .unwrap_or(900),
            room_ttl_seconds: env::var("ROOM_TTL_SECONDS")
                .unwrap_or_else(|_| "7200".to_string())
                .parse()
                .unwrap_or(7200),
            heartbeat_timeout_seconds: env::var("HEARTBEAT_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            audit_buffer_capacity: env::var("AUDIT_BUFFER_CAPACITY")
                .unwrap_or_else(|_| "1024".to_string())
                .parse()
                .unwrap_or(1024),
            audit_sink_url: env::var("AUDIT_SINK_URL").ok(),
            clinical_sink_url: env::var("CLINICAL_SINK_URL").ok(),
            transcript_sink_url: env::var("TRANSCRIPT_SINK_URL").ok(),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server port")]
    InvalidPort,
    #[error("JWT_SECRET environment variable is required")]
    MissingJwtSecret,
}

#[cfg(test)]
impl Config {
    /// Config with test defaults, no env access.
    pub fn for_tests() -> Self {
        Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            jwt_secret: "test-secret-key".to_string(),
            jwt_expiry_seconds: 900,
            room_ttl_seconds: 7200,
            heartbeat_timeout_seconds: 60,
            audit_buffer_capacity: 8,
            audit_sink_url: None,
            clinical_sink_url: None,
            transcript_sink_url: None,
        }
    }
}
