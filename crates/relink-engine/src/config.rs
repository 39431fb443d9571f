//! Engine configuration
//!
//! Every section has defaults, so a configuration file only needs the keys
//! it changes:
//!
//! ```toml
//! managed_segment = "wp-content/uploads"
//!
//! [matcher]
//! containment_matching = false
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelinkConfig {
    /// Path segment that marks a managed asset URL
    pub managed_segment: String,
    /// Asset matching
    pub matcher: MatcherConfig,
    /// Reference discovery
    pub scanner: ScannerConfig,
    /// Output validation and repair
    pub guard: GuardConfig,
    /// Metadata keys that are never rewritten
    pub metadata_skip_keys: Vec<String>,
}

impl RelinkConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    /// Returns [`ConfigError`] for malformed TOML or invalid values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns the first invalid field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let segment = self.managed_segment.trim_matches('/');
        if segment.is_empty() {
            return Err(ConfigError::invalid("managed_segment", "must not be empty"));
        }
        if segment.contains("://") || segment.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid("managed_segment", "must be a bare path segment"));
        }
        if self.matcher.max_candidate_len == 0 {
            return Err(ConfigError::invalid("matcher.max_candidate_len", "must be positive"));
        }
        if self.scanner.media_extensions.is_empty() {
            return Err(ConfigError::invalid("scanner.media_extensions", "must list at least one extension"));
        }
        if self.guard.max_repair_rounds == 0 {
            return Err(ConfigError::invalid("guard.max_repair_rounds", "must be positive"));
        }
        Ok(())
    }

    /// Managed segment without surrounding slashes
    #[must_use]
    pub fn segment(&self) -> &str {
        self.managed_segment.trim_matches('/')
    }

    /// With managed segment
    #[inline]
    #[must_use]
    pub fn with_managed_segment(mut self, segment: impl Into<String>) -> Self {
        self.managed_segment = segment.into();
        self
    }

    /// With matcher configuration
    #[inline]
    #[must_use]
    pub fn with_matcher(mut self, matcher: MatcherConfig) -> Self {
        self.matcher = matcher;
        self
    }

    /// With scanner configuration
    #[inline]
    #[must_use]
    pub fn with_scanner(mut self, scanner: ScannerConfig) -> Self {
        self.scanner = scanner;
        self
    }

    /// With guard configuration
    #[inline]
    #[must_use]
    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = guard;
        self
    }

    /// With metadata skip list
    #[inline]
    #[must_use]
    pub fn with_metadata_skip_keys(mut self, keys: Vec<String>) -> Self {
        self.metadata_skip_keys = keys;
        self
    }
}

impl Default for RelinkConfig {
    fn default() -> Self {
        Self {
            managed_segment: "wp-content/uploads".to_string(),
            matcher: MatcherConfig::default(),
            scanner: ScannerConfig::default(),
            guard: GuardConfig::default(),
            metadata_skip_keys: vec!["_edit_lock".to_string(), "_edit_last".to_string()],
        }
    }
}

/// Asset matcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Fall back to substring containment between stems
    ///
    /// Can match short or generic names to the wrong asset.
    pub containment_matching: bool,
    /// Candidates with a longer extracted filename are never matched
    pub max_candidate_len: usize,
}

impl MatcherConfig {
    /// With containment matching switched on or off
    #[inline]
    #[must_use]
    pub fn with_containment(mut self, enabled: bool) -> Self {
        self.containment_matching = enabled;
        self
    }

    /// With maximum candidate length
    #[inline]
    #[must_use]
    pub fn with_max_candidate_len(mut self, len: usize) -> Self {
        self.max_candidate_len = len;
        self
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            containment_matching: true,
            max_candidate_len: 150,
        }
    }
}

/// Reference scanner settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// File extensions (lowercase, no dot) that mark a media URL
    pub media_extensions: Vec<String>,
    /// Scan markup of blocks that are not media kinds
    pub scan_markup: bool,
    /// Decode URL-encoded JSON attribute strings
    pub decode_url_encoded: bool,
    /// Maximum nesting depth walked inside decoded JSON
    pub max_json_depth: usize,
}

impl ScannerConfig {
    /// With markup scanning switched on or off
    #[inline]
    #[must_use]
    pub fn with_markup_scan(mut self, enabled: bool) -> Self {
        self.scan_markup = enabled;
        self
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            media_extensions: [
                "jpg", "jpeg", "png", "gif", "webp", "avif", "svg", "bmp", "tif", "tiff", "ico", "heic", "mp4",
                "m4v", "mov", "webm", "ogv", "mp3", "m4a", "ogg", "wav", "pdf",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            scan_markup: true,
            decode_url_encoded: true,
            max_json_depth: 16,
        }
    }
}

/// Corruption guard settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Try textual repairs when the output does not parse
    pub repairs_enabled: bool,
    /// Upper bound on repair rounds
    pub max_repair_rounds: usize,
    /// Rebuild image and legacy gallery markup that disagrees with its attributes
    pub rebuild_mismatched_markup: bool,
    /// Remove null attribute entries
    pub strip_nulls: bool,
}

impl GuardConfig {
    /// With repairs switched on or off
    #[inline]
    #[must_use]
    pub fn with_repairs(mut self, enabled: bool) -> Self {
        self.repairs_enabled = enabled;
        self
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            repairs_enabled: true,
            max_repair_rounds: 8,
            rebuild_mismatched_markup: true,
            strip_nulls: true,
        }
    }
}
