// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Writes a starter dockr.yml declaring a network, a database and an app.

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::ResourceName;

use super::CONFIG_FILENAME;

pub fn init_config(dir: &Path, unit: Option<&str>, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let unit = unit
        .map(str::to_string)
        .or_else(|| dir_unit(dir))
        .unwrap_or_else(|| "app".to_string());
    let unit = ResourceName::new(&unit).map_err(|e| Error::InvalidConfig(e.to_string()))?;

    std::fs::write(&config_path, generate_template_yaml(&unit))?;
    tracing::info!("wrote {}", config_path.display());

    Ok(())
}

/// The directory name, when it makes a valid unit name.
fn dir_unit(dir: &Path) -> Option<String> {
    let name = dir.file_name()?.to_str()?.to_lowercase();
    ResourceName::new(&name).ok().map(|_| name)
}

fn generate_template_yaml(unit: &ResourceName) -> String {
    format!(
        r#"unit: {unit}
# state_dir: .dockr/state
# operation_timeout: 120s

resources:
  - kind: network
    name: backend

  - kind: volume
    name: pgdata

  - kind: service
    name: db
    image: postgres:16
    env:
      POSTGRES_PASSWORD: {{ env: DB_PASSWORD, default: change-me }}
    volumes: ["pgdata:/var/lib/postgresql/data"]
    networks: [backend]

  - kind: service
    name: app
    image: nginx:alpine
    ports: ["8080:80"]
    networks: [backend]
    depends_on: [db]
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn template_parses_and_assembles() {
        let unit = ResourceName::new("shop").unwrap();
        let config = Config::from_yaml(&generate_template_yaml(&unit)).unwrap();
        assert_eq!(config.unit, unit);
        let graph = config.stack().unwrap();
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), Some("shop"), false).unwrap();
        let err = init_config(dir.path(), Some("shop"), false).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        init_config(dir.path(), Some("other"), true).unwrap();
        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.unit.as_str(), "other");
    }
}
