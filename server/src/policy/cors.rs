/// Origin allow-list for the streaming endpoints. `allowed_origins` is the
/// deployment's static list; an empty list allows nothing (CORS off),
/// matching the config default.
#[derive(Clone, Debug)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
}

impl CorsPolicy {
    pub fn new(allowed_origins: Vec<String>) -> Self {
        CorsPolicy { allowed_origins }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }

    /// `GET` responses echo the origin header only when it is in the list;
    /// absent or disallowed origins get no CORS header at all (the browser
    /// then enforces same-origin on its own).
    pub fn allow_origin_header(&self, origin: Option<&str>) -> Option<String> {
        origin.filter(|o| self.is_allowed(o)).map(|o| o.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_listed_origin() {
        let policy = CorsPolicy::new(vec!["https://a.example".to_string()]);
        assert_eq!(
            policy.allow_origin_header(Some("https://a.example")),
            Some("https://a.example".to_string())
        );
    }

    #[test]
    fn omits_unlisted_origin() {
        let policy = CorsPolicy::new(vec!["https://a.example".to_string()]);
        assert_eq!(policy.allow_origin_header(Some("https://evil.example")), None);
    }

    #[test]
    fn empty_list_allows_nothing() {
        let policy = CorsPolicy::new(vec![]);
        assert!(!policy.is_allowed("https://a.example"));
    }
}
