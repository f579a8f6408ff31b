use anyhow::Context;
use serde::Deserialize;

/// Upper bound for either token lifetime (one year).
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base URL clients use to fetch uploaded objects.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub cors_origin: Option<String>,
    pub cookie_secure: bool,
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

fn minutes_or(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

impl JwtConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.access_secret.is_empty() && !self.refresh_secret.is_empty(),
            "token secrets must not be empty"
        );
        anyhow::ensure!(
            self.access_secret != self.refresh_secret,
            "ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ"
        );
        for (name, minutes) in [
            ("ACCESS_TOKEN_TTL_MINUTES", self.access_ttl_minutes),
            ("REFRESH_TOKEN_TTL_MINUTES", self.refresh_ttl_minutes),
        ] {
            anyhow::ensure!(
                (1..=MAX_TTL_MINUTES).contains(&minutes),
                "{name} must be between 1 and {MAX_TTL_MINUTES}"
            );
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = required("DATABASE_URL")?;

        let jwt = JwtConfig {
            access_secret: required("ACCESS_TOKEN_SECRET")?,
            refresh_secret: required("REFRESH_TOKEN_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "vidtube".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "vidtube-users".into()),
            access_ttl_minutes: minutes_or("ACCESS_TOKEN_TTL_MINUTES", 60),
            refresh_ttl_minutes: minutes_or("REFRESH_TOKEN_TTL_MINUTES", 60 * 24 * 14),
        };
        jwt.validate()?;

        let endpoint = required("STORAGE_ENDPOINT")?;
        let storage = StorageConfig {
            public_url: std::env::var("STORAGE_PUBLIC_URL").unwrap_or_else(|_| endpoint.clone()),
            endpoint,
            bucket: required("STORAGE_BUCKET")?,
            access_key: required("STORAGE_ACCESS_KEY")?,
            secret_key: required("STORAGE_SECRET_KEY")?,
            region: std::env::var("STORAGE_REGION").unwrap_or_else(|_| "us-east-1".into()),
        };

        let cors_origin = std::env::var("CORS_ORIGIN").ok().filter(|v| !v.is_empty());
        let cookie_secure = std::env::var("COOKIE_SECURE")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Ok(Self {
            database_url,
            jwt,
            storage,
            cors_origin,
            cookie_secure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(access: &str, refresh: &str) -> JwtConfig {
        JwtConfig {
            access_secret: access.into(),
            refresh_secret: refresh.into(),
            issuer: "iss".into(),
            audience: "aud".into(),
            access_ttl_minutes: 5,
            refresh_ttl_minutes: 60,
        }
    }

    #[test]
    fn distinct_secrets_are_accepted() {
        assert!(jwt("access", "refresh").validate().is_ok());
    }

    #[test]
    fn shared_secret_is_rejected() {
        let err = jwt("same", "same").validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn oversized_ttl_is_rejected() {
        let mut cfg = jwt("access", "refresh");
        cfg.refresh_ttl_minutes = i64::MAX;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("REFRESH_TOKEN_TTL_MINUTES"));

        let mut cfg = jwt("access", "refresh");
        cfg.access_ttl_minutes = MAX_TTL_MINUTES;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(jwt("", "refresh").validate().is_err());
    }
}
