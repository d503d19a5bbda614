//! Small header-building helpers shared by every adapter's request assembly.

use meridian_provider_core::{Headers, header_set};

pub fn bearer(headers: &mut Headers, token: &str) {
    header_set(headers, "Authorization", format!("Bearer {token}"));
}

pub fn api_key_header(headers: &mut Headers, name: &str, key: &str) {
    header_set(headers, name, key);
}

pub fn accept_json(headers: &mut Headers) {
    header_set(headers, "Accept", "application/json");
}

pub fn content_type_json(headers: &mut Headers) {
    header_set(headers, "Content-Type", "application/json");
}

pub fn trim_base(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}
