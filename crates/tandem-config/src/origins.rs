//! Origin allow-list applied to the signaling socket and HTTP responses.

/// Which browser origins may talk to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPolicy {
    Any,
    List(Vec<String>),
}

impl OriginPolicy {
    /// Build a policy from configured origins. Any `"*"` entry allows everything.
    pub fn from_list(origins: &[String]) -> Self {
        if origins.iter().any(|o| o.trim() == "*") {
            Self::Any
        } else {
            Self::List(
                origins
                    .iter()
                    .map(|o| o.trim().trim_end_matches('/').to_string())
                    .filter(|o| !o.is_empty())
                    .collect(),
            )
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(list) => list.iter().any(|o| o.eq_ignore_ascii_case(origin)),
        }
    }

    /// Value for `access-control-allow-origin`, if the request origin is allowed.
    pub fn allow_origin_header(&self, origin: Option<&str>) -> Option<String> {
        match (self, origin) {
            (Self::Any, _) => Some("*".into()),
            (Self::List(_), Some(origin)) if self.allows(origin) => Some(origin.to_string()),
            _ => None,
        }
    }
}
