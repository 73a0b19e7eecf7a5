//! Prompt templates ("commands") applied to user text before generation.

use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Errors returned when loading templates.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid template frontmatter in {path}")]
    InvalidFrontmatter { path: String },
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Source of prompt templates keyed by command id.
pub trait TemplateProvider: Send + Sync {
    /// Template text for a command, or `None` when the id is unknown.
    fn lookup_template(&self, command_id: &str) -> Result<Option<String>, TemplateError>;
}

/// Whether a command is offered to users.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommandState {
    #[default]
    Enabled,
    Disabled,
}

/// Listing entry for a template file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub state: CommandState,
    pub path: PathBuf,
}

/// Parsed frontmatter for a template file.
#[derive(Debug, Default, Deserialize)]
struct CommandFrontmatter {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    state: CommandState,
}

/// Templates stored as `<root>/<command_id>.md`, with optional frontmatter.
#[derive(Debug, Clone)]
pub struct FileTemplateProvider {
    root: PathBuf,
}

impl FileTemplateProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List every template file, sorted by id. A missing directory is empty.
    pub fn list_commands(&self) -> Result<Vec<CommandSummary>, TemplateError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut commands = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if !is_plain_id(id) {
                continue;
            }
            let (summary, _) = parse_command(id, &path)?;
            commands.push(summary);
        }
        commands.sort_by(|a, b| a.id.cmp(&b.id));
        info!(
            "listed commands (root={}, count={})",
            self.root.display(),
            commands.len()
        );
        Ok(commands)
    }

    fn command_path(&self, command_id: &str) -> Option<PathBuf> {
        is_plain_id(command_id).then(|| self.root.join(format!("{command_id}.md")))
    }
}

impl TemplateProvider for FileTemplateProvider {
    fn lookup_template(&self, command_id: &str) -> Result<Option<String>, TemplateError> {
        let Some(path) = self.command_path(command_id) else {
            warn!("rejecting command id (command_id={})", command_id);
            return Ok(None);
        };
        if !path.is_file() {
            debug!("command not found (path={})", path.display());
            return Ok(None);
        }
        let (summary, body) = parse_command(command_id, &path)?;
        if summary.state == CommandState::Disabled {
            debug!("resolving disabled command (command_id={})", command_id);
        }
        Ok(Some(body))
    }
}

/// Map-backed templates for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryTemplateProvider {
    templates: RwLock<HashMap<String, String>>,
}

impl InMemoryTemplateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(self, command_id: impl Into<String>, template: impl Into<String>) -> Self {
        self.insert(command_id, template);
        self
    }

    pub fn insert(&self, command_id: impl Into<String>, template: impl Into<String>) {
        self.templates
            .write()
            .insert(command_id.into(), template.into());
    }
}

impl TemplateProvider for InMemoryTemplateProvider {
    fn lookup_template(&self, command_id: &str) -> Result<Option<String>, TemplateError> {
        Ok(self.templates.read().get(command_id).cloned())
    }
}

/// Combine a template with raw user text.
///
/// A blank or absent template yields `raw`. A template containing
/// `placeholder` has every occurrence replaced; otherwise `raw` is appended on
/// a new line.
pub fn apply_template(template: Option<&str>, placeholder: &str, raw: &str) -> String {
    match template {
        Some(template) if !template.trim().is_empty() => {
            if !placeholder.is_empty() && template.contains(placeholder) {
                template.replace(placeholder, raw)
            } else {
                format!("{template}\n{raw}")
            }
        }
        _ => raw.to_string(),
    }
}

/// Command ids are plain file stems: no separators, no leading dot.
fn is_plain_id(command_id: &str) -> bool {
    !command_id.is_empty()
        && !command_id.starts_with('.')
        && command_id
            .chars()
            .all(|ch| ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

fn parse_command(id: &str, path: &Path) -> Result<(CommandSummary, String), TemplateError> {
    let contents = fs::read_to_string(path)?;
    let (frontmatter, body) = split_frontmatter(&contents, path)?;
    let frontmatter = frontmatter.unwrap_or_default();
    let name = frontmatter
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| id.to_string());
    Ok((
        CommandSummary {
            id: id.to_string(),
            name,
            description: frontmatter.description.unwrap_or_default(),
            state: frontmatter.state,
            path: path.to_path_buf(),
        },
        body,
    ))
}

/// Split YAML frontmatter from the template body.
fn split_frontmatter(
    contents: &str,
    path: &Path,
) -> Result<(Option<CommandFrontmatter>, String), TemplateError> {
    let mut lines = contents.lines();
    match lines.next() {
        Some(first) if first.trim() == "---" => {}
        _ => return Ok((None, contents.to_string())),
    }

    let mut yaml_lines = Vec::new();
    let mut found_delimiter = false;
    for line in lines.by_ref() {
        if line.trim() == "---" {
            found_delimiter = true;
            break;
        }
        yaml_lines.push(line);
    }
    if !found_delimiter {
        return Err(TemplateError::InvalidFrontmatter {
            path: path.display().to_string(),
        });
    }

    let yaml = yaml_lines.join("\n");
    let metadata = if yaml.trim().is_empty() {
        CommandFrontmatter::default()
    } else {
        serde_yaml::from_str(&yaml)?
    };
    let body = lines.collect::<Vec<_>>().join("\n");
    Ok((Some(metadata), body.trim().to_string()))
}
