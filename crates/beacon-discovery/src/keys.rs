//! Keys used in the coordination store.

pub const SERVICES_PREFIX: &str = "/services/";
pub const SERVICES_INFOS_PREFIX: &str = "/services_infos/";

/// Prefix holding every host of `service`, with a trailing slash so that
/// `api` does not match `api-internal`.
pub fn service_hosts_prefix(service: &str) -> String {
    format!("{SERVICES_PREFIX}{service}/")
}

pub fn host_key(service: &str, uuid: &str) -> String {
    format!("{SERVICES_PREFIX}{service}/{uuid}")
}

pub fn service_info_key(service: &str) -> String {
    format!("{SERVICES_INFOS_PREFIX}{service}")
}

/// Trailing path segment of a key, the host UUID for host keys.
pub fn last_segment(key: &str) -> &str {
    key.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(host_key("db", "abc-10.0.0.1"), "/services/db/abc-10.0.0.1");
        assert_eq!(service_hosts_prefix("db"), "/services/db/");
        assert_eq!(service_info_key("db"), "/services_infos/db");
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("/services/db/abc-host"), "abc-host");
        assert_eq!(last_segment("/services/db/abc-host/"), "abc-host");
        assert_eq!(last_segment("plain"), "plain");
    }
}
