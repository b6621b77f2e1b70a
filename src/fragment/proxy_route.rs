// ABOUTME: Reverse-proxy route fragment: domain -> upstream service:port via Caddy or SWAG.
// ABOUTME: Routes are rendered config, so every change is applied in place by re-rendering.

use super::{Fields, ValidationError, parse_name, parse_ref};
use crate::types::{ResourceKey, ResourceKind, ResourceName};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyKind {
    #[default]
    Caddy,
    Swag,
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Caddy => write!(f, "caddy"),
            ProxyKind::Swag => write!(f, "swag"),
        }
    }
}

impl FromStr for ProxyKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "caddy" => Ok(ProxyKind::Caddy),
            "swag" => Ok(ProxyKind::Swag),
            other => Err(ValidationError::invalid(
                "proxy",
                format!("expected 'caddy' or 'swag', got '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDirective {
    Domain(String),
    Upstream { service: ResourceName, port: u16 },
    Proxy(ProxyKind),
    Email(String),
    DnsProvider(String),
    Path(String),
}

/// Effective route settings consumed by the renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSettings {
    pub domain: String,
    pub service: ResourceName,
    pub port: u16,
    pub proxy: ProxyKind,
    pub email: Option<String>,
    pub dns_provider: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    name: ResourceName,
    directives: Vec<RouteDirective>,
}

fn validate_domain(domain: &str) -> Result<String, ValidationError> {
    let domain = domain.trim().to_ascii_lowercase();
    let valid_chars = domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '*'));
    if domain.is_empty() || !valid_chars || domain.starts_with('.') || domain.ends_with('.') {
        return Err(ValidationError::invalid(
            "domain",
            format!("'{}' is not a valid domain", domain),
        ));
    }
    if !domain.contains('.') && domain != "localhost" {
        return Err(ValidationError::invalid(
            "domain",
            format!("'{}' is not a fully qualified domain", domain),
        ));
    }
    Ok(domain)
}

impl ProxyRoute {
    pub fn new(name: &str, domain: &str, service: &str, port: u16) -> Result<Self, ValidationError> {
        let route = Self {
            name: parse_name(name)?,
            directives: vec![RouteDirective::Domain(validate_domain(domain)?)],
        };
        route.upstream(service, port)
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn directives(&self) -> &[RouteDirective] {
        &self.directives
    }

    fn with(&self, directive: RouteDirective) -> Self {
        let mut next = self.clone();
        next.directives.push(directive);
        next
    }

    pub fn domain(&self, domain: &str) -> Result<Self, ValidationError> {
        Ok(self.with(RouteDirective::Domain(validate_domain(domain)?)))
    }

    pub fn upstream(&self, service: &str, port: u16) -> Result<Self, ValidationError> {
        if port == 0 {
            return Err(ValidationError::invalid("upstream", "port cannot be 0"));
        }
        Ok(self.with(RouteDirective::Upstream {
            service: parse_ref("upstream", service)?,
            port,
        }))
    }

    pub fn proxy(&self, kind: ProxyKind) -> Result<Self, ValidationError> {
        Ok(self.with(RouteDirective::Proxy(kind)))
    }

    /// ACME account email.
    pub fn email(&self, email: &str) -> Result<Self, ValidationError> {
        let email = email.trim();
        match email.split_once('@') {
            Some((user, host)) if !user.is_empty() && host.contains('.') => {
                Ok(self.with(RouteDirective::Email(email.to_string())))
            }
            _ => Err(ValidationError::invalid(
                "email",
                format!("'{}' is not an email address", email),
            )),
        }
    }

    /// DNS provider for ACME DNS-01 challenges, e.g. `cloudflare`.
    pub fn dns_provider(&self, provider: &str) -> Result<Self, ValidationError> {
        let provider = provider.trim();
        if provider.is_empty() || !provider.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ValidationError::invalid(
                "dns",
                format!("invalid DNS provider '{}'", provider),
            ));
        }
        Ok(self.with(RouteDirective::DnsProvider(provider.to_string())))
    }

    /// Path prefix routed to the upstream; defaults to `/`.
    pub fn path(&self, path: &str) -> Result<Self, ValidationError> {
        if !path.starts_with('/') || path.contains(char::is_whitespace) {
            return Err(ValidationError::invalid(
                "path",
                format!("path must start with '/', got '{}'", path),
            ));
        }
        Ok(self.with(RouteDirective::Path(path.to_string())))
    }

    pub fn directive(&self, key: &str, value: &str) -> Result<Self, ValidationError> {
        match key {
            "domain" => self.domain(value),
            "upstream" => {
                let (service, port) = value.rsplit_once(':').ok_or_else(|| {
                    ValidationError::invalid("upstream", format!("expected service:port, got '{}'", value))
                })?;
                let port = port.parse().map_err(|_| {
                    ValidationError::invalid("upstream", format!("invalid port in '{}'", value))
                })?;
                self.upstream(service, port)
            }
            "proxy" => self.proxy(value.parse()?),
            "email" => self.email(value),
            "dns" | "dns_provider" => self.dns_provider(value),
            "path" => self.path(value),
            other => Err(ValidationError::UnknownDirective {
                kind: ResourceKind::ProxyRoute,
                key: other.to_string(),
            }),
        }
    }

    pub fn settings(&self) -> RouteSettings {
        let mut settings = RouteSettings {
            domain: String::new(),
            service: self.name.clone(),
            port: 0,
            proxy: ProxyKind::default(),
            email: None,
            dns_provider: None,
            path: "/".to_string(),
        };
        // Constructors always push a domain and an upstream first.
        for directive in &self.directives {
            match directive {
                RouteDirective::Domain(d) => settings.domain = d.clone(),
                RouteDirective::Upstream { service, port } => {
                    settings.service = service.clone();
                    settings.port = *port;
                }
                RouteDirective::Proxy(kind) => settings.proxy = *kind,
                RouteDirective::Email(email) => settings.email = Some(email.clone()),
                RouteDirective::DnsProvider(p) => settings.dns_provider = Some(p.clone()),
                RouteDirective::Path(path) => settings.path = path.clone(),
            }
        }
        settings
    }

    pub(super) fn dependencies(&self) -> Vec<ResourceKey> {
        vec![ResourceKey::service(self.settings().service)]
    }

    pub(super) fn fields(&self) -> Fields {
        let settings = self.settings();
        let mut fields = Fields::new();
        fields.insert("domain".into(), settings.domain);
        fields.insert(
            "upstream".into(),
            format!("{}:{}", settings.service, settings.port),
        );
        fields.insert("proxy".into(), settings.proxy.to_string());
        fields.insert("path".into(), settings.path);
        if let Some(email) = settings.email {
            fields.insert("email".into(), email);
        }
        if let Some(dns) = settings.dns_provider {
            fields.insert("dns".into(), dns);
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> ProxyRoute {
        ProxyRoute::new("web", "Example.com", "app", 8000).unwrap()
    }

    #[test]
    fn depends_on_upstream_service() {
        let deps = route().dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].to_string(), "service/app");
    }

    #[test]
    fn normalizes_domain_and_defaults() {
        let fields = route().fields();
        assert_eq!(fields["domain"], "example.com");
        assert_eq!(fields["upstream"], "app:8000");
        assert_eq!(fields["proxy"], "caddy");
        assert_eq!(fields["path"], "/");
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            ProxyRoute::new("web", "not a domain", "app", 80).unwrap_err().field(),
            "domain"
        );
        assert_eq!(route().email("nobody").unwrap_err().field(), "email");
        assert_eq!(route().path("api").unwrap_err().field(), "path");
        assert_eq!(route().directive("proxy", "traefik").unwrap_err().field(), "proxy");
        assert_eq!(route().upstream("app", 0).unwrap_err().field(), "upstream");
    }

    #[test]
    fn upstream_directive_parses_service_and_port() {
        let moved = route().directive("upstream", "api:9000").unwrap();
        let settings = moved.settings();
        assert_eq!(settings.service.as_str(), "api");
        assert_eq!(settings.port, 9000);
    }
}
