// ABOUTME: Ready-made fragments for common backing services and reverse proxies.
// ABOUTME: Each preset yields a service, the volumes it mounts, and connection env for the app.

use super::{Fragment, Service, ValidationError, Volume};
use std::collections::BTreeMap;
use std::path::Path;

/// A preset service together with what it needs and what it offers.
#[derive(Debug, Clone)]
pub struct Preset {
    pub service: Service,
    pub volumes: Vec<Volume>,
    /// Variables an application sets to reach the service, e.g. `DATABASE_URL`.
    pub env: BTreeMap<String, String>,
}

impl Preset {
    /// Volumes first, then the service, matching dependency order.
    pub fn into_fragments(self) -> Vec<Fragment> {
        let mut fragments: Vec<Fragment> = self.volumes.into_iter().map(Fragment::from).collect();
        fragments.push(self.service.into());
        fragments
    }

    /// Adds the connection variables to `app`. Connection strings may embed
    /// credentials, so they are recorded as secrets.
    pub fn wire(&self, app: &Service) -> Result<Service, ValidationError> {
        let mut app = app.depends_on(self.service.name().as_str())?;
        for (key, value) in &self.env {
            app = app.secret_env(key, value)?;
        }
        Ok(app)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEngine {
    Postgres,
    Mysql,
    Mongo,
}

/// A database service named `db` holding database `database`.
pub fn database(
    engine: DatabaseEngine,
    database: &str,
    password: &str,
) -> Result<Preset, ValidationError> {
    let (image, volume, target, url) = match engine {
        DatabaseEngine::Postgres => (
            "postgres:16",
            "pgdata",
            "/var/lib/postgresql/data",
            format!("postgresql://postgres:{}@db:5432/{}", password, database),
        ),
        DatabaseEngine::Mysql => (
            "mysql:8",
            "mysqldata",
            "/var/lib/mysql",
            format!("mysql://root:{}@db:3306/{}", password, database),
        ),
        DatabaseEngine::Mongo => (
            "mongo:7",
            "mongodata",
            "/data/db",
            format!(
                "mongodb://admin:{}@db:27017/{}?authSource=admin",
                password, database
            ),
        ),
    };

    let mut service = Service::from_image("db", image)?.mount(&format!("{}:{}", volume, target))?;
    service = match engine {
        DatabaseEngine::Postgres => service
            .secret_env("POSTGRES_PASSWORD", password)?
            .env("POSTGRES_DB", database)?,
        DatabaseEngine::Mysql => service
            .secret_env("MYSQL_ROOT_PASSWORD", password)?
            .env("MYSQL_DATABASE", database)?,
        DatabaseEngine::Mongo => service
            .env("MONGO_INITDB_ROOT_USERNAME", "admin")?
            .secret_env("MONGO_INITDB_ROOT_PASSWORD", password)?,
    };

    Ok(Preset {
        service,
        volumes: vec![Volume::new(volume)?],
        env: BTreeMap::from([("DATABASE_URL".to_string(), url)]),
    })
}

/// Redis with append-only persistence, named `redis`.
pub fn cache() -> Result<Preset, ValidationError> {
    let service = Service::from_image("redis", "redis:7-alpine")?
        .command(&["redis-server", "--appendonly", "yes"])?
        .mount("redis-data:/data")?;
    Ok(Preset {
        service,
        volumes: vec![Volume::new("redis-data")?],
        env: BTreeMap::from([("REDIS_URL".to_string(), "redis://redis:6379".to_string())]),
    })
}

/// RabbitMQ with the management plugin, named `rabbitmq`.
pub fn queue(queue_name: &str, password: &str) -> Result<Preset, ValidationError> {
    let service = Service::from_image("rabbitmq", "rabbitmq:3-management")?
        .env("RABBITMQ_DEFAULT_USER", "guest")?
        .secret_env("RABBITMQ_DEFAULT_PASS", password)?
        .mount("rabbitmq-data:/var/lib/rabbitmq")?;
    Ok(Preset {
        service,
        volumes: vec![Volume::new("rabbitmq-data")?],
        env: BTreeMap::from([
            (
                "QUEUE_URL".to_string(),
                format!("amqp://guest:{}@rabbitmq:5672/", password),
            ),
            ("QUEUE_NAME".to_string(), queue_name.to_string()),
        ]),
    })
}

fn bind_source(dir: &Path) -> String {
    let source = dir.to_string_lossy().into_owned();
    if source.starts_with(['.', '/', '~']) {
        source
    } else {
        format!("./{}", source)
    }
}

/// Caddy serving every rendered Caddy route found in `sites_dir`.
///
/// With a DNS provider the image bundles the matching ACME DNS module and the
/// provider token is read from `CLOUDFLARE_API_TOKEN` on the host.
pub fn caddy(sites_dir: &Path, dns_provider: Option<&str>) -> Result<Preset, ValidationError> {
    let image = match dns_provider {
        Some("cloudflare") => "ghcr.io/caddybuilds/caddy-cloudflare:latest",
        Some(other) => {
            return Err(ValidationError::invalid(
                "dns",
                format!("no caddy image bundles the '{}' DNS module", other),
            ));
        }
        None => "caddy:2",
    };
    let mut service = Service::from_image("caddy", image)?
        .port("80:80")?
        .port("443:443")?
        .port("443:443/udp")?
        .mount(&format!("{}:/etc/caddy/sites:ro", bind_source(sites_dir)))?
        .mount("caddy_data:/data")?
        .mount("caddy_config:/config")?
        .command(&[
            "caddy",
            "run",
            "--config",
            "/etc/caddy/sites/Caddyfile",
            "--adapter",
            "caddyfile",
        ])?;
    if dns_provider.is_some() {
        let token = std::env::var("CLOUDFLARE_API_TOKEN").unwrap_or_default();
        service = service.secret_env("CLOUDFLARE_API_TOKEN", &token)?;
    }
    Ok(Preset {
        service,
        volumes: vec![Volume::new("caddy_data")?, Volume::new("caddy_config")?],
        env: BTreeMap::new(),
    })
}

/// LinuxServer SWAG for `domain`, loading rendered SWAG routes from `confs_dir`.
pub fn swag(
    domain: &str,
    email: Option<&str>,
    mods: &[&str],
    confs_dir: &Path,
) -> Result<Preset, ValidationError> {
    let mut service = Service::from_image("swag", "lscr.io/linuxserver/swag")?
        .env("URL", domain)?
        .env("VALIDATION", "http")?
        .env("PUID", "1000")?
        .env("PGID", "1000")?
        .env("TZ", "Etc/UTC")?
        .port("443:443")?
        .port("80:80")?
        .mount("swag_config:/config")?
        .mount(&format!(
            "{}:/config/nginx/proxy-confs:ro",
            bind_source(confs_dir)
        ))?;
    if let Some(email) = email {
        service = service.env("EMAIL", email)?;
    }
    if !mods.is_empty() {
        let mods: Vec<String> = mods
            .iter()
            .map(|m| format!("linuxserver/mods:swag-{}", m))
            .collect();
        service = service.env("DOCKER_MODS", &mods.join("|"))?;
    }
    Ok(Preset {
        service,
        volumes: vec![Volume::new("swag_config")?],
        env: BTreeMap::new(),
    })
}
