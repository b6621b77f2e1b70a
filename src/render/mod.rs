// ABOUTME: Renders proxy route settings into Caddy site blocks and SWAG nginx server blocks.
// ABOUTME: The Docker driver writes the output into the proxy directory mounted by the proxy service.

mod caddy;
mod swag;

pub use caddy::{ROOT_CADDYFILE, site_block};
pub use swag::server_block;

use crate::fragment::{ProxyKind, RouteSettings};

/// File name a route is written to inside its proxy's directory.
pub fn route_file_name(route: &str, proxy: ProxyKind) -> String {
    match proxy {
        ProxyKind::Caddy => format!("{}.caddy", route),
        ProxyKind::Swag => format!("{}.subdomain.conf", route),
    }
}

/// Rendered configuration for one route.
pub fn route_config(settings: &RouteSettings) -> String {
    match settings.proxy {
        ProxyKind::Caddy => site_block(settings),
        ProxyKind::Swag => server_block(settings),
    }
}
