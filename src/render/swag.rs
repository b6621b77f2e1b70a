// ABOUTME: SWAG (nginx) server block rendering for proxy routes.
// ABOUTME: Relies on the ssl.conf and proxy.conf snippets shipped in the SWAG image.

use crate::fragment::RouteSettings;

pub fn server_block(settings: &RouteSettings) -> String {
    format!(
        "server {{
    listen 443 ssl;
    listen [::]:443 ssl;

    server_name {domain};

    include /config/nginx/ssl.conf;

    client_max_body_size 0;

    location {path} {{
        include /config/nginx/proxy.conf;
        include /config/nginx/resolver.conf;
        proxy_pass http://{service}:{port};
    }}
}}
",
        domain = settings.domain,
        path = settings.path,
        service = settings.service,
        port = settings.port,
    )
}
