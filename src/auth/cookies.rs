use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue};
use cookie::{time::OffsetDateTime, Cookie, SameSite};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn base<'a>(name: &'a str, value: &'a str, secure: bool) -> cookie::CookieBuilder<'a> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
}

pub fn session_cookie(name: &str, value: &str, max_age: Duration, secure: bool) -> anyhow::Result<HeaderValue> {
    let max_age = cookie::time::Duration::try_from(max_age)?;
    let cookie = base(name, value, secure).max_age(max_age).build();
    Ok(HeaderValue::from_str(&cookie.to_string())?)
}

pub fn expired_cookie(name: &str, secure: bool) -> HeaderValue {
    let cookie = base(name, "", secure)
        .max_age(cookie::time::Duration::ZERO)
        .expires(OffsetDateTime::UNIX_EPOCH)
        .build();
    HeaderValue::from_str(&cookie.to_string()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// Reads a single cookie value from the request's `Cookie` header(s).
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_is_http_only_and_secure() {
        let v = session_cookie(ACCESS_COOKIE, "abc.def", Duration::from_secs(300), true).unwrap();
        let parsed = Cookie::parse(v.to_str().unwrap()).unwrap();
        assert_eq!(parsed.name(), "accessToken");
        assert_eq!(parsed.value(), "abc.def");
        assert_eq!(parsed.max_age(), Some(cookie::time::Duration::seconds(300)));
        assert_eq!(parsed.http_only(), Some(true));
        assert_eq!(parsed.secure(), Some(true));
        assert_eq!(parsed.same_site(), Some(SameSite::Strict));
        assert_eq!(parsed.path(), Some("/"));
    }

    #[test]
    fn insecure_mode_drops_secure_flag() {
        let v = session_cookie(REFRESH_COOKIE, "t", Duration::from_secs(1), false).unwrap();
        assert!(!v.to_str().unwrap().contains("Secure"));
    }

    #[test]
    fn expired_cookie_clears_value() {
        let v = expired_cookie(REFRESH_COOKIE, true);
        let s = v.to_str().unwrap();
        assert!(s.starts_with("refreshToken=;"));
        assert!(s.contains("Max-Age=0"));
        let parsed = Cookie::parse(s).unwrap();
        assert_eq!(parsed.expires_datetime(), Some(OffsetDateTime::UNIX_EPOCH));
    }

    #[test]
    fn reads_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; refreshToken=r.t.v; accessToken=a.t.v"),
        );
        assert_eq!(read_cookie(&headers, REFRESH_COOKIE).as_deref(), Some("r.t.v"));
        assert_eq!(read_cookie(&headers, ACCESS_COOKIE).as_deref(), Some("a.t.v"));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    #[test]
    fn skips_malformed_pairs() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("garbage; accessToken=a.t.v"));
        assert_eq!(read_cookie(&headers, ACCESS_COOKIE).as_deref(), Some("a.t.v"));
    }

    #[test]
    fn empty_cookie_counts_as_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("accessToken="));
        assert_eq!(read_cookie(&headers, ACCESS_COOKIE), None);
    }
}
