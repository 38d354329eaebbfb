//! Domain label splitting.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("empty domain")]
    Empty,
}

/// A sender domain with its labels and derived second-level domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
    pub labels: Vec<String>,
    pub second_level: String,
}

impl Domain {
    pub fn parse(domain: &str) -> Result<Self, DomainError> {
        if domain.is_empty() {
            return Err(DomainError::Empty);
        }

        let labels: Vec<String> = split_domain(domain)
            .into_iter()
            .map(str::to_string)
            .collect();
        let second_level = second_level_domain(&labels).unwrap_or_else(|| domain.to_string());

        Ok(Self {
            name: domain.to_string(),
            labels,
            second_level,
        })
    }
}

/// Split a domain on `.`. An empty input yields a single empty label.
pub fn split_domain(domain: &str) -> Vec<&str> {
    domain.split('.').collect()
}

/// Join the final two labels, or `None` when there are fewer than two.
pub fn second_level_domain<S: AsRef<str>>(labels: &[S]) -> Option<String> {
    match labels {
        [.., second, top] => Some(format!("{}.{}", second.as_ref(), top.as_ref())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_domain() {
        assert_eq!(split_domain("s.apple.com"), vec!["s", "apple", "com"]);
        assert_eq!(split_domain(""), vec![""]);
    }

    #[test]
    fn test_second_level_domain() {
        let labels = split_domain("s.apple.com");
        assert_eq!(second_level_domain(&labels).as_deref(), Some("apple.com"));
        assert_eq!(second_level_domain(&["localhost"][..]), None);
    }

    #[test]
    fn test_domain_parse() {
        let domain = Domain::parse("mail.lists.example.org").unwrap();
        assert_eq!(domain.labels.len(), 4);
        assert_eq!(domain.second_level, "example.org");
    }

    #[test]
    fn test_single_label_domain_keeps_name() {
        let domain = Domain::parse("localhost").unwrap();
        assert_eq!(domain.second_level, "localhost");
    }

    #[test]
    fn test_empty_domain_rejected() {
        assert_eq!(Domain::parse(""), Err(DomainError::Empty));
    }
}
