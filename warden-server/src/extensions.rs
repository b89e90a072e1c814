//! Directory-backed extension store
//!
//! Each installed extension is a directory named after its id holding a
//! `package.json` manifest.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use warden_protocol::CliForward;
use warden_utils::paths::ensure_dir;
use warden_utils::{Result, WardenError};

const MANIFEST: &str = "package.json";
const DEFAULT_VERSION: &str = "latest";

/// Manifest written for an installed extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub version: String,
}

/// Split `publisher.name[@version]` into id and version
pub fn parse_spec(spec: &str) -> Result<(String, Option<String>)> {
    let (id, version) = match spec.split_once('@') {
        Some((id, version)) if !version.is_empty() => (id, Some(version.to_string())),
        Some(_) => return Err(WardenError::extension(format!("missing version in '{}'", spec))),
        None => (spec, None),
    };
    validate_id(id)?;
    Ok((id.to_lowercase(), version))
}

fn validate_id(id: &str) -> Result<()> {
    let valid_part = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    };
    match id.split_once('.') {
        Some((publisher, name)) if valid_part(publisher) && valid_part(name) => Ok(()),
        _ => Err(WardenError::extension(format!(
            "invalid extension id '{}', expected publisher.name",
            id
        ))),
    }
}

pub struct ExtensionStore {
    dir: PathBuf,
}

impl ExtensionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn manifest_path(&self, id: &str) -> PathBuf {
        self.dir.join(id).join(MANIFEST)
    }

    /// Install an extension; an existing install needs `force`
    pub fn install(&self, spec: &str, force: bool) -> Result<Manifest> {
        let (id, version) = parse_spec(spec)?;
        let manifest_path = self.manifest_path(&id);

        if manifest_path.exists() && !force {
            return Err(WardenError::extension(format!(
                "'{}' is already installed, use --force to reinstall",
                id
            )));
        }

        let manifest = Manifest {
            id: id.clone(),
            version: version.unwrap_or_else(|| DEFAULT_VERSION.into()),
        };

        let ext_dir = self.dir.join(&id);
        ensure_dir(&ext_dir).map_err(|e| WardenError::FileWrite {
            path: ext_dir.clone(),
            source: e,
        })?;
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| WardenError::internal(e.to_string()))?;
        std::fs::write(&manifest_path, json).map_err(|e| WardenError::FileWrite {
            path: manifest_path.clone(),
            source: e,
        })?;

        info!(id = %manifest.id, version = %manifest.version, "Installed extension");
        Ok(manifest)
    }

    /// Remove an installed extension
    pub fn uninstall(&self, spec: &str) -> Result<()> {
        let (id, _) = parse_spec(spec)?;
        let ext_dir = self.dir.join(&id);
        if !ext_dir.is_dir() {
            return Err(WardenError::extension(format!("'{}' is not installed", id)));
        }
        std::fs::remove_dir_all(&ext_dir).map_err(|e| WardenError::FileWrite {
            path: ext_dir.clone(),
            source: e,
        })?;
        info!(id = %id, "Uninstalled extension");
        Ok(())
    }

    /// Installed extensions, sorted by id
    pub fn list(&self) -> Result<Vec<Manifest>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(WardenError::FileRead {
                    path: self.dir.clone(),
                    source: e,
                })
            }
        };

        let mut manifests = Vec::new();
        for entry in entries {
            let path = entry?.path().join(MANIFEST);
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    debug!(path = %path.display(), "Skipping entry without manifest: {}", e);
                    continue;
                }
            };
            match serde_json::from_str::<Manifest>(&content) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => debug!(path = %path.display(), "Skipping unreadable manifest: {}", e),
            }
        }
        manifests.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(manifests)
    }

    /// Run the operations carried by a forwarded CLI request.
    ///
    /// Uninstalls run before installs, listing comes last.
    pub fn execute(&self, request: &CliForward, out: &mut impl Write) -> Result<()> {
        for spec in &request.uninstall_extension {
            self.uninstall(spec)?;
            writeln!(out, "Extension '{}' was successfully uninstalled.", spec)?;
        }

        for spec in &request.install_extension {
            let manifest = self.install(spec, request.force)?;
            writeln!(
                out,
                "Extension '{}' v{} was successfully installed.",
                manifest.id, manifest.version
            )?;
        }

        if request.list_extensions {
            for manifest in self.list()? {
                if request.show_versions {
                    writeln!(out, "{}@{}", manifest.id, manifest.version)?;
                } else {
                    writeln!(out, "{}", manifest.id)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_spec() {
        assert_eq!(parse_spec("acme.theme").unwrap(), ("acme.theme".into(), None));
        assert_eq!(
            parse_spec("Acme.Lint@2.1.0").unwrap(),
            ("acme.lint".into(), Some("2.1.0".into()))
        );
        assert!(parse_spec("theme").is_err());
        assert!(parse_spec("acme.").is_err());
        assert!(parse_spec("acme.theme@").is_err());
        assert!(parse_spec("../etc.passwd").is_err());
    }

    #[test]
    fn test_install_list_uninstall() {
        let dir = tempdir().unwrap();
        let store = ExtensionStore::new(dir.path().join("ext"));

        assert!(store.list().unwrap().is_empty());

        store.install("zeta.tools@1.0.0", false).unwrap();
        store.install("acme.theme", false).unwrap();

        let ids: Vec<_> = store.list().unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["acme.theme", "zeta.tools"]);

        store.uninstall("acme.theme").unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.uninstall("acme.theme").is_err());
    }

    #[test]
    fn test_reinstall_needs_force() {
        let dir = tempdir().unwrap();
        let store = ExtensionStore::new(dir.path());

        store.install("acme.theme@1.0.0", false).unwrap();
        let err = store.install("acme.theme@2.0.0", false).unwrap_err();
        assert_eq!(err.kind(), warden_utils::ErrorKind::Extension);

        let manifest = store.install("acme.theme@2.0.0", true).unwrap();
        assert_eq!(manifest.version, "2.0.0");
    }

    #[test]
    fn test_execute_lists_with_versions() {
        let dir = tempdir().unwrap();
        let store = ExtensionStore::new(dir.path());
        store.install("acme.theme@1.2.0", false).unwrap();

        let request = CliForward {
            list_extensions: true,
            show_versions: true,
            ..Default::default()
        };
        let mut out = Vec::new();
        store.execute(&request, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "acme.theme@1.2.0\n");
    }

    #[test]
    fn test_execute_install_reports_each() {
        let dir = tempdir().unwrap();
        let store = ExtensionStore::new(dir.path());

        let request = CliForward {
            install_extension: vec!["acme.a".into(), "acme.b@3.0.0".into()],
            ..Default::default()
        };
        let mut out = Vec::new();
        store.execute(&request, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("'acme.a' vlatest"));
        assert!(text.contains("'acme.b' v3.0.0"));
    }
}
