pub mod claims;
pub mod cookies;
pub mod extractors;
pub mod jwt;
pub mod password;
