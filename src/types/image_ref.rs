// ABOUTME: Container image reference parsing, e.g. postgres:16 or ghcr.io/org/app@sha256:..
// ABOUTME: The canonical form (default tag filled in) is what fingerprints see.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0}")]
    InvalidChar(char),

    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }
        if let Some(c) = input
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '/' | ':' | '.' | '-' | '_' | '@'))
        {
            return Err(ParseImageRefError::InvalidChar(c));
        }

        let (rest, digest) = match input.split_once('@') {
            Some((rest, digest)) if !digest.is_empty() => (rest, Some(digest.to_string())),
            Some(_) => return Err(ParseImageRefError::InvalidFormat(input.to_string())),
            None => (input, None),
        };

        // A colon after the last slash separates the tag; earlier colons are registry ports.
        let last_slash = rest.rfind('/').map_or(0, |i| i + 1);
        let (path, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&rest[..split], Some(rest[split + 1..].to_string()))
            }
            None => (rest, None),
        };
        if path.is_empty() || path.ends_with('/') || tag.as_deref() == Some("") {
            return Err(ParseImageRefError::InvalidFormat(input.to_string()));
        }

        let (registry, repository) = match path.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), remainder.to_string())
            }
            _ => (None, path.to_string()),
        };

        let tag = match (tag, &digest) {
            (None, None) => Some("latest".to_string()),
            (tag, _) => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_gets_latest_tag() {
        let image = ImageRef::parse("nginx").unwrap();
        assert_eq!(image.repository(), "nginx");
        assert_eq!(image.tag(), Some("latest"));
        assert_eq!(image.to_string(), "nginx:latest");
    }

    #[test]
    fn registry_with_port_is_not_a_tag() {
        let image = ImageRef::parse("localhost:5000/shop/app").unwrap();
        assert_eq!(image.registry(), Some("localhost:5000"));
        assert_eq!(image.repository(), "shop/app");
        assert_eq!(image.tag(), Some("latest"));
    }

    #[test]
    fn digest_without_tag_keeps_no_tag() {
        let image = ImageRef::parse("ghcr.io/org/app@sha256:abc").unwrap();
        assert_eq!(image.tag(), None);
        assert_eq!(image.digest(), Some("sha256:abc"));
        assert_eq!(image.to_string(), "ghcr.io/org/app@sha256:abc");
    }

    #[test]
    fn rejects_malformed_references() {
        assert_eq!(ImageRef::parse("  "), Err(ParseImageRefError::Empty));
        assert_eq!(
            ImageRef::parse("my image"),
            Err(ParseImageRefError::InvalidChar(' '))
        );
        assert!(ImageRef::parse("nginx:").is_err());
        assert!(ImageRef::parse("nginx@").is_err());
    }
}
