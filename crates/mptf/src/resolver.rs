//! module discovery
//!
//! `terraform init` records every module it installed in `.terraform/modules/modules.json`. When that manifest
//! exists all listed directories are targets, otherwise only the root directory is.
use crate::fs::{absolute, normalize, FileSystem};
use crate::module::ModuleRef;
use std::path::{Path, PathBuf};

/// Location of the module manifest relative to the root module
pub const MODULES_MANIFEST: &str = ".terraform/modules/modules.json";

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("unable to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid module manifest {}", path.display())]
    InvalidManifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(serde::Deserialize)]
struct Manifest {
    #[serde(rename = "Modules", default)]
    modules: Vec<ModuleRef>,
}

/// Every module directory that belongs to `root`
pub fn module_refs(fs: &dyn FileSystem, root: &Path) -> Result<Vec<ModuleRef>, ResolveError> {
    let abs_root = absolute(root).map_err(|source| ResolveError::Io {
        path: root.to_owned(),
        source,
    })?;

    let manifest_path = root.join(MODULES_MANIFEST);
    let exists = fs
        .exists(&manifest_path)
        .map_err(|source| ResolveError::Io {
            path: manifest_path.clone(),
            source,
        })?;
    if !exists {
        tracing::debug!(root=%root.display(), "no module manifest, using root module only");
        return Ok(vec![ModuleRef::root(root, abs_root)]);
    }

    let content = fs
        .read(&manifest_path)
        .map_err(|source| ResolveError::Io {
            path: manifest_path.clone(),
            source,
        })?;
    let manifest: Manifest =
        serde_json::from_slice(&content).map_err(|source| ResolveError::InvalidManifest {
            path: manifest_path,
            source,
        })?;

    Ok(manifest
        .modules
        .into_iter()
        .map(|mut module_ref| {
            module_ref.abs_dir = normalize(&abs_root.join(&module_ref.dir));
            module_ref.dir = normalize(&root.join(&module_ref.dir));
            tracing::debug!(key=%module_ref.key, dir=%module_ref.abs_dir.display(), "module found");
            module_ref
        })
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fs::MemoryFs;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"{
        "Modules": [
            { "Key": "", "Source": "", "Dir": "." },
            { "Key": "that", "Source": "./module", "Dir": "module" },
            { "Key": "remote", "Source": "registry.terraform.io/a/b/c", "Dir": ".terraform/modules/remote", "Version": "1.2.0" }
        ]
    }"#;

    #[test]
    fn manifest_lists_modules() {
        let fs = MemoryFs::with_files([("/root/.terraform/modules/modules.json", MANIFEST)]);

        let refs = module_refs(&fs, Path::new("/root")).unwrap();

        let dirs: Vec<_> = refs.iter().map(|r| r.abs_dir.clone()).collect();
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/root"),
                PathBuf::from("/root/module"),
                PathBuf::from("/root/.terraform/modules/remote"),
            ]
        );
        assert_eq!(refs[1].key, "that");
        assert_eq!(refs[1].source, "./module");
        assert_eq!(refs[2].version, "1.2.0");
    }

    #[test]
    fn relative_roots_resolve_against_the_work_directory() {
        let fs = MemoryFs::with_files([("cfg/.terraform/modules/modules.json", MANIFEST)]);

        let refs = module_refs(&fs, Path::new("cfg")).unwrap();

        let pwd = std::env::current_dir().unwrap();
        assert_eq!(refs[0].abs_dir, normalize(&pwd.join("cfg")));
        assert_eq!(refs[1].abs_dir, normalize(&pwd.join("cfg/module")));
        assert_eq!(refs[1].dir, PathBuf::from("cfg/module"));
    }

    #[test]
    fn missing_manifest_yields_root_only() {
        let fs = MemoryFs::new();

        let refs = module_refs(&fs, Path::new(".")).unwrap();

        let pwd = std::env::current_dir().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].abs_dir, normalize(&pwd));
    }

    #[test]
    fn broken_manifest_is_an_error() {
        let fs = MemoryFs::with_files([("/root/.terraform/modules/modules.json", "{")]);

        let err = module_refs(&fs, Path::new("/root")).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidManifest { .. }));
    }
}
