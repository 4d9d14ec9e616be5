//! Declaration manifests and bulk directory scanning
//!
//! A manifest is a TOML file declaring metadata for one or more types:
//!
//! ```toml
//! [[types]]
//! name = "UserController"
//! rules = [{ role = "staff" }]
//!
//! [types.members.store]
//! rules = [{ permission = "create-users", route = "api" }]
//!
//! [[types]]
//! name = "User"
//! fields = [{ name = "phone", type = "string", required = true, unique = true }]
//! roles = [{ name = "admin", permissions = ["edit-users"] }]
//! ```

use crate::descriptor::{FieldDescriptor, RoleDeclaration, RuleDescriptor};
use crate::error::{GatehouseError, Result};
use crate::registry::{DuplicateFieldPolicy, MetadataRegistry, RegistryBuilder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Manifest file extension picked up by directory scans
pub const MANIFEST_EXTENSION: &str = "toml";

/// Parsed declaration manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Declared types
    #[serde(default)]
    pub types: Vec<TypeManifest>,
}

/// Declarations for one type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeManifest {
    /// Type name
    pub name: String,
    /// Class-level rules
    #[serde(default)]
    pub rules: Vec<RuleDescriptor>,
    /// Member-level rules keyed by operation name
    #[serde(default)]
    pub members: BTreeMap<String, MemberManifest>,
    /// Dynamic fields (entity types)
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    /// Declared roles (entity types)
    #[serde(default)]
    pub roles: Vec<RoleDeclaration>,
}

/// Declarations for one operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberManifest {
    /// Operation-level rules
    #[serde(default)]
    pub rules: Vec<RuleDescriptor>,
}

impl Manifest {
    /// Register every declaration with a builder
    pub fn register(&self, builder: &mut RegistryBuilder) -> Result<()> {
        for ty in &self.types {
            builder.declare_type(ty.name.clone());

            for rule in &ty.rules {
                builder.class_rule(ty.name.clone(), rule.clone());
            }

            for (member, decl) in &ty.members {
                for rule in &decl.rules {
                    builder.member_rule(ty.name.clone(), member.clone(), rule.clone());
                }
            }

            for field in &ty.fields {
                builder.field(ty.name.clone(), field.clone())?;
            }

            for role in &ty.roles {
                builder.role(ty.name.clone(), role.clone());
            }
        }

        Ok(())
    }

    /// Number of rules declared across all types and members
    pub fn rule_count(&self) -> usize {
        self.types
            .iter()
            .map(|t| t.rules.len() + t.members.values().map(|m| m.rules.len()).sum::<usize>())
            .sum()
    }
}

/// Parse a manifest from TOML text
pub fn parse_manifest(input: &str) -> Result<Manifest> {
    let manifest: Manifest =
        toml::from_str(input).map_err(|e| GatehouseError::ParseError(e.to_string()))?;

    for ty in &manifest.types {
        if ty.name.trim().is_empty() {
            return Err(GatehouseError::ParseError("Type with an empty name".into()));
        }
    }

    Ok(manifest)
}

/// Read and parse a single manifest file
pub fn load_manifest(path: impl AsRef<Path>) -> Result<Manifest> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(GatehouseError::TargetNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    parse_manifest(&content)
}

/// Build a registry from a single manifest file
pub fn load_registry(path: impl AsRef<Path>, policy: DuplicateFieldPolicy) -> Result<MetadataRegistry> {
    let manifest = load_manifest(path)?;
    let mut builder = RegistryBuilder::new().with_duplicate_policy(policy);
    manifest.register(&mut builder)?;
    Ok(builder.build())
}

/// A file the scanner could not use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    /// File path
    pub path: PathBuf,
    /// Why it was skipped
    pub reason: String,
}

/// Outcome of a bulk directory scan
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Registry assembled from every usable file
    pub registry: MetadataRegistry,
    /// Files that contributed declarations
    pub scanned: Vec<PathBuf>,
    /// Files that were skipped, with the cause
    pub skipped: Vec<SkippedFile>,
}

impl ScanReport {
    /// True when no file was skipped
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Scan a directory tree for manifests
///
/// Files that cannot be read, parsed or registered are reported in
/// [`ScanReport::skipped`] and do not abort the scan. Files are registered in
/// path order so the result does not depend on filesystem ordering.
pub fn scan_directory(dir: impl AsRef<Path>, policy: DuplicateFieldPolicy) -> Result<ScanReport> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(GatehouseError::TargetNotFound(format!(
            "Directory not found: {}",
            dir.display()
        )));
    }

    info!("Scanning manifests in {}", dir.display());

    let mut skipped = Vec::new();
    let mut paths = Vec::new();

    for entry in WalkDir::new(dir).follow_links(true) {
        match entry {
            Ok(entry) => {
                let is_manifest = entry.file_type().is_file()
                    && entry.path().extension().and_then(|e| e.to_str()) == Some(MANIFEST_EXTENSION);
                if is_manifest {
                    paths.push(entry.into_path());
                }
            }
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                warn!("Skipping {}: {}", path.display(), e);
                skipped.push(SkippedFile {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    paths.sort();

    let parsed: Vec<(PathBuf, Result<Manifest>)> = paths
        .into_par_iter()
        .map(|path| {
            let manifest = load_manifest(&path);
            (path, manifest)
        })
        .collect();

    let mut builder = RegistryBuilder::new().with_duplicate_policy(policy);
    let mut scanned = Vec::new();

    for (path, manifest) in parsed {
        let manifest = match manifest {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                skipped.push(SkippedFile {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        // A file registers completely or not at all.
        let checkpoint = builder.clone();
        match manifest.register(&mut builder) {
            Ok(()) => {
                debug!(
                    "Registered {} types from {}",
                    manifest.types.len(),
                    path.display()
                );
                scanned.push(path);
            }
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                builder = checkpoint;
                skipped.push(SkippedFile {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "Scan finished: {} files registered, {} skipped",
        scanned.len(),
        skipped.len()
    );

    Ok(ScanReport {
        registry: builder.build(),
        scanned,
        skipped,
    })
}
