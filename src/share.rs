// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Share definitions and their typed settings.
//!
//! Only the Samba parameters hubshare writes itself have a declared type.
//! Any other parameter found in a share file is kept verbatim as text.

/// Type of a setting's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Flag,
}

/// Setting name, normalised at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Path,
    ReadOnly,
    Writable,
    Browsable,
    Printable,
    GuestOk,
    /// Any parameter without a declared type.
    Other(String),
}

impl SettingKey {
    /// Normalise a parameter name.
    ///
    /// `read_only`, `read-only` and `read only` are the same key.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let normalized = name
            .trim()
            .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        match normalized.to_ascii_lowercase().as_str() {
            "path" => Self::Path,
            "read only" => Self::ReadOnly,
            "writable" => Self::Writable,
            "browsable" => Self::Browsable,
            "printable" => Self::Printable,
            "guest ok" => Self::GuestOk,
            _ => Self::Other(normalized),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Path => "path",
            Self::ReadOnly => "read only",
            Self::Writable => "writable",
            Self::Browsable => "browsable",
            Self::Printable => "printable",
            Self::GuestOk => "guest ok",
            Self::Other(name) => name,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Path | Self::Other(_) => ValueKind::Text,
            Self::ReadOnly | Self::Writable | Self::Browsable | Self::Printable | Self::GuestOk => {
                ValueKind::Flag
            }
        }
    }
}

impl std::fmt::Display for SettingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A setting value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Text(String),
    Flag(bool),
}

impl SettingValue {
    /// Interpret raw text as a value of `kind`.
    ///
    /// Flags are true only for `yes` in any case.
    #[must_use]
    pub fn parse(kind: ValueKind, raw: &str) -> Self {
        let raw = raw.trim();
        match kind {
            ValueKind::Text => Self::Text(raw.to_string()),
            ValueKind::Flag => Self::Flag(raw.eq_ignore_ascii_case("yes")),
        }
    }

    #[must_use]
    pub const fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(flag) => Some(*flag),
            Self::Text(_) => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Flag(_) => None,
        }
    }
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Flag(true) => f.write_str("yes"),
            Self::Flag(false) => f.write_str("no"),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(flag: bool) -> Self {
        Self::Flag(flag)
    }
}

impl From<&str> for SettingValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareSetting {
    pub key: SettingKey,
    pub value: SettingValue,
}

impl ShareSetting {
    /// Build a setting, coercing the value to the key's declared kind.
    pub fn new(key: SettingKey, value: impl Into<SettingValue>) -> Self {
        let value = match (key.kind(), value.into()) {
            (ValueKind::Flag, SettingValue::Text(raw)) => SettingValue::parse(ValueKind::Flag, &raw),
            (ValueKind::Text, SettingValue::Flag(flag)) => {
                SettingValue::Text(SettingValue::Flag(flag).to_string())
            }
            (_, value) => value,
        };
        Self { key, value }
    }
}

impl std::fmt::Display for ShareSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.key, self.value)
    }
}

/// One exported directory and its settings, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareDefinition {
    pub name: String,
    settings: Vec<ShareSetting>,
}

impl ShareDefinition {
    /// New share with the default settings: empty path, writable,
    /// no guest access, browsable, not printable.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: vec![
                ShareSetting::new(SettingKey::Path, ""),
                ShareSetting::new(SettingKey::ReadOnly, false),
                ShareSetting::new(SettingKey::GuestOk, false),
                ShareSetting::new(SettingKey::Browsable, true),
                ShareSetting::new(SettingKey::Printable, false),
            ],
        }
    }

    /// Share without any settings (as read from a file).
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: Vec::new(),
        }
    }

    #[must_use]
    pub fn get(&self, key: &SettingKey) -> Option<&SettingValue> {
        self.settings
            .iter()
            .find(|setting| &setting.key == key)
            .map(|setting| &setting.value)
    }

    /// Set a value. An existing setting is updated in place, otherwise the
    /// setting is appended.
    pub fn set(&mut self, key: SettingKey, value: impl Into<SettingValue>) {
        let setting = ShareSetting::new(key, value);
        match self.settings.iter_mut().find(|s| s.key == setting.key) {
            Some(existing) => existing.value = setting.value,
            None => self.settings.push(setting),
        }
    }

    pub fn settings(&self) -> &[ShareSetting] {
        &self.settings
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.get(&SettingKey::Path)
            .and_then(SettingValue::as_text)
            .unwrap_or_default()
    }

    /// Value of a flag setting; unset flags read as false.
    #[must_use]
    pub fn flag(&self, key: &SettingKey) -> bool {
        self.get(key).and_then(SettingValue::as_flag).unwrap_or(false)
    }
}
