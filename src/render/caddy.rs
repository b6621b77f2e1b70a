// ABOUTME: Caddyfile site block rendering for proxy routes.
// ABOUTME: TLS is automatic; an email or DNS provider adds a tls directive.

use crate::fragment::RouteSettings;

/// Entry Caddyfile that pulls in every rendered site.
pub const ROOT_CADDYFILE: &str = "import /etc/caddy/sites/*.caddy\n";

pub fn site_block(settings: &RouteSettings) -> String {
    let upstream = format!("{}:{}", settings.service, settings.port);
    let mut out = format!("{} {{\n", settings.domain);

    match (&settings.email, &settings.dns_provider) {
        (None, None) => {}
        (Some(email), None) => out.push_str(&format!("\ttls {}\n", email)),
        (email, Some(dns)) => {
            match email {
                Some(email) => out.push_str(&format!("\ttls {} {{\n", email)),
                None => out.push_str("\ttls {\n"),
            }
            out.push_str(&format!(
                "\t\tdns {} {{env.{}_API_TOKEN}}\n",
                dns,
                dns.to_ascii_uppercase()
            ));
            out.push_str("\t}\n");
        }
    }
    if settings.path == "/" {
        out.push_str(&format!("\treverse_proxy {}\n", upstream));
    } else {
        out.push_str(&format!(
            "\treverse_proxy {}* {}\n",
            settings.path.trim_end_matches('*'),
            upstream
        ));
    }
    out.push_str("}\n");
    out
}
