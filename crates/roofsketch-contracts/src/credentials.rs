use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

pub const CREDENTIAL_STORE_KEY: &str = "gemini_api_key";
pub const CREDENTIAL_ENV_FALLBACKS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];
pub const SETTINGS_PATH_ENV: &str = "ROOFSKETCH_SETTINGS";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CredentialSource {
    #[default]
    None,
    Store,
    Env,
}

impl CredentialSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Store => "store",
            Self::Env => "env",
        }
    }
}

/// API key for the generation service. Debug output never shows the raw value.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    value: String,
    source: CredentialSource,
}

impl Credential {
    pub fn new(value: impl Into<String>, source: CredentialSource) -> Self {
        Self {
            value: value.into(),
            source,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Stored value first, then the first non-empty environment fallback.
    pub fn resolve<F>(stored: Option<String>, env_lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = stored.filter(|value| !value.is_empty()) {
            return Self::new(value, CredentialSource::Store);
        }
        for key in CREDENTIAL_ENV_FALLBACKS {
            if let Some(value) = env_lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
            {
                return Self::new(value, CredentialSource::Env);
            }
        }
        Self::empty()
    }

    pub fn is_present(&self) -> bool {
        !self.value.is_empty()
    }

    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn masked(&self) -> String {
        let chars = self.value.chars().collect::<Vec<_>>();
        if chars.is_empty() {
            return "(not set)".to_string();
        }
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }
        let head = chars[..4].iter().collect::<String>();
        let tail = chars[chars.len() - 4..].iter().collect::<String>();
        format!("{head}…{tail}")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("value", &self.masked())
            .field("source", &self.source)
            .finish()
    }
}

/// Removes all whitespace plus zero-width characters (U+200B..U+200D, U+FEFF).
pub fn sanitize_credential(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !ch.is_whitespace() && !matches!(*ch, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .collect()
}

/// Settings file holding the credential under [`CREDENTIAL_STORE_KEY`].
///
/// Other keys in the file are left untouched on save.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `--settings` flag, then `ROOFSKETCH_SETTINGS`, then `$HOME/.roofsketch/settings.json`.
    pub fn locate(explicit: Option<&Path>) -> Self {
        if let Some(path) = explicit {
            return Self::new(path);
        }
        if let Some(path) = env::var(SETTINGS_PATH_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            return Self::new(path);
        }
        let home = env::var("HOME")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(".roofsketch").join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<String> {
        read_json_object(&self.path)?
            .get(CREDENTIAL_STORE_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|value| !value.is_empty())
    }

    pub fn resolve(&self) -> Credential {
        Credential::resolve(self.load(), |key| env::var(key).ok())
    }

    /// Sanitizes and persists `raw`. Returns `None` without touching the file
    /// when nothing is left after sanitizing.
    pub fn save(&self, raw: &str) -> anyhow::Result<Option<Credential>> {
        let cleaned = sanitize_credential(raw);
        if cleaned.is_empty() {
            return Ok(None);
        }
        let mut on_disk = read_json_object(&self.path).unwrap_or_default();
        on_disk.insert(
            CREDENTIAL_STORE_KEY.to_string(),
            Value::String(cleaned.clone()),
        );
        write_json_object(&self.path, &on_disk)?;
        Ok(Some(Credential::new(cleaned, CredentialSource::Store)))
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )?;
    Ok(())
}
