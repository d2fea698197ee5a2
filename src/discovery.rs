//! Test suite discovery
//!
//! Walks the category folders under the test root and classifies every
//! directory (unit and integration) or file (system) into a [`TestSuite`].

use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Serialize;
use walkdir::WalkDir;

use crate::common::config::PathsConfig;
use crate::common::{Error, Result};

/// Test category, one folder per category under the root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Unit,
    Integration,
    System,
}

impl Category {
    /// All categories in run order
    pub const ALL: [Category; 3] = [Category::Unit, Category::Integration, Category::System];

    /// Folder for this category, relative to the root
    pub fn dir<'a>(&self, paths: &'a PathsConfig) -> &'a Path {
        match self {
            Category::Unit => paths.unit.as_path(),
            Category::Integration => paths.integration.as_path(),
            Category::System => paths.system.as_path(),
        }
    }

    /// Section title used by the reporter
    pub fn title(&self) -> &'static str {
        match self {
            Category::Unit => "Unit tests:",
            Category::Integration => "Integration tests:",
            Category::System => "System tests:",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Unit => "unit",
            Category::Integration => "integration",
            Category::System => "system",
        };
        f.write_str(name)
    }
}

/// What a suite consists of
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuiteKind {
    /// A directory built by the external build tool, then run
    Buildable {
        manifest: PathBuf,
        /// Declared `NAME = <executable>`, if any
        artifact: Option<String>,
    },
    /// Standalone scenario scripts; never built
    Scripts { scripts: Vec<PathBuf> },
}

/// One discovered unit of test material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSuite {
    pub name: String,
    pub root: PathBuf,
    pub category: Category,
    pub kind: SuiteKind,
}

/// Discover suites for the given categories, in category order
pub fn discover(root: &Path, categories: &[Category], paths: &PathsConfig, manifest: &str) -> Result<Vec<TestSuite>> {
    if !root.is_dir() {
        return Err(Error::RootNotFound(root.display().to_string()));
    }

    let mut suites = Vec::new();
    for category in categories {
        suites.extend(discover_category(root, *category, paths, manifest)?);
    }
    Ok(suites)
}

/// Discover suites of a single category
pub fn discover_category(
    root: &Path,
    category: Category,
    paths: &PathsConfig,
    manifest: &str,
) -> Result<Vec<TestSuite>> {
    let category_root = root.join(category.dir(paths));
    if !category_root.is_dir() {
        tracing::warn!(
            "No {} test folder at '{}', skipping",
            category,
            category_root.display()
        );
        return Ok(Vec::new());
    }

    let extensions = &paths.script_extensions;
    match category {
        Category::System => discover_scripts(&category_root, category, extensions),
        Category::Unit | Category::Integration => {
            discover_leaves(&category_root, category, extensions, manifest)
        }
    }
}

/// Every script file under `dir`, recursively, is its own suite
fn discover_scripts(dir: &Path, category: Category, extensions: &[String]) -> Result<Vec<TestSuite>> {
    let mut suites = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() || !has_extension(entry.path(), extensions) {
            continue;
        }

        let path = entry.path().to_path_buf();
        suites.push(TestSuite {
            name: file_name(&path),
            root: path.parent().unwrap_or(dir).to_path_buf(),
            category,
            kind: SuiteKind::Scripts {
                scripts: vec![path],
            },
        });
    }

    tracing::debug!("Discovered {} {} scripts", suites.len(), category);
    Ok(suites)
}

/// Every directory holding scripts or a build manifest is a suite
///
/// Scripts take precedence: a directory with both is never built.
fn discover_leaves(
    dir: &Path,
    category: Category,
    extensions: &[String],
    manifest: &str,
) -> Result<Vec<TestSuite>> {
    let mut suites = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let leaf = entry.path();

        let scripts = scripts_in(leaf, extensions)?;
        if !scripts.is_empty() {
            suites.push(TestSuite {
                name: file_name(leaf),
                root: leaf.to_path_buf(),
                category,
                kind: SuiteKind::Scripts { scripts },
            });
            continue;
        }

        let manifest_path = leaf.join(manifest);
        if manifest_path.is_file() {
            let text = std::fs::read_to_string(&manifest_path)
                .map_err(|e| Error::file_read(&manifest_path, e))?;
            let artifact = parse_artifact_name(&text);
            if artifact.is_none() {
                tracing::warn!("'{}' declares no NAME", manifest_path.display());
            }

            suites.push(TestSuite {
                name: artifact.clone().unwrap_or_else(|| file_name(leaf)),
                root: leaf.to_path_buf(),
                category,
                kind: SuiteKind::Buildable {
                    manifest: manifest_path,
                    artifact,
                },
            });
        }
    }

    tracing::debug!("Discovered {} {} suites", suites.len(), category);
    Ok(suites)
}

/// Script files directly inside `dir`, sorted
fn scripts_in(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut scripts: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_extension(path, extensions))
        .collect();
    scripts.sort();
    Ok(scripts)
}

/// Extract the artifact name from build manifest text
///
/// Returns the token of the first line of the form `NAME = <token>`,
/// with `NAME` at the start of the line. Values are taken literally: no
/// variable expansion and no continuation lines.
pub fn parse_artifact_name(manifest: &str) -> Option<String> {
    manifest.lines().find_map(|line| {
        let rest = line.strip_prefix("NAME")?;
        let rest = rest.trim_start().strip_prefix('=')?;
        rest.split_whitespace().next().map(str::to_string)
    })
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e == ext))
        .unwrap_or(false)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
