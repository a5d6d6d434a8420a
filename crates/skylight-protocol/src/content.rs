//! Content parameters produced by widget templates.
//!
//! The core treats content as opaque. It only checks that the parameters
//! are well formed before a command leaves the control process.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Where widget content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ContentSourceType {
    /// Static text or images
    #[default]
    Static,
    /// Web URL or inline HTML
    Web,
    /// REST/GraphQL endpoint
    Api,
    /// Video or audio stream
    Media,
    /// Local file
    File,
    /// Office document
    Office,
    /// Plugin-defined source
    Custom,
}

impl ContentSourceType {
    pub fn code(&self) -> u32 {
        match self {
            Self::Static => 0,
            Self::Web => 1,
            Self::Api => 2,
            Self::Media => 3,
            Self::File => 4,
            Self::Office => 5,
            Self::Custom => 99,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Static,
            1 => Self::Web,
            2 => Self::Api,
            3 => Self::Media,
            4 => Self::File,
            5 => Self::Office,
            99 => Self::Custom,
            _ => return None,
        })
    }

    /// Sources whose locator must be an absolute URL.
    fn requires_url(&self) -> bool {
        matches!(self, Self::Web | Self::Api | Self::Media)
    }
}

/// Content validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("{0:?} content requires a source locator")]
    MissingSource(ContentSourceType),

    #[error("invalid source URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("header name is empty")]
    EmptyHeaderName,

    #[error("header '{0}' contains a line break")]
    HeaderInjection(String),

    #[error("parameter name is empty")]
    EmptyParameterName,
}

/// Content source description for one widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentParameters {
    pub source_type: ContentSourceType,
    /// URL, file path or API endpoint
    pub source_url: String,
    /// Optional template file
    pub template_path: String,
    /// Bearer token for authenticated APIs
    pub auth_token: String,
    /// Refresh interval in milliseconds, 0 disables refresh
    pub refresh_interval_ms: u32,
    pub cache_enabled: bool,
    pub custom_headers: Vec<(String, String)>,
    pub parameters: Vec<(String, String)>,
}

impl ContentParameters {
    /// Static content with the given text or image reference.
    pub fn static_content(source: impl Into<String>) -> Self {
        Self {
            source_url: source.into(),
            ..Self::default()
        }
    }

    pub fn web(url: impl Into<String>) -> Self {
        Self {
            source_type: ContentSourceType::Web,
            source_url: url.into(),
            ..Self::default()
        }
    }

    pub fn api(endpoint: impl Into<String>, refresh_interval_ms: u32) -> Self {
        Self {
            source_type: ContentSourceType::Api,
            source_url: endpoint.into(),
            refresh_interval_ms,
            ..Self::default()
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self {
            source_type: ContentSourceType::File,
            source_url: path.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    /// Check that the parameters are well formed.
    pub fn validate(&self) -> Result<(), ContentError> {
        if self.source_type != ContentSourceType::Static && self.source_url.trim().is_empty() {
            return Err(ContentError::MissingSource(self.source_type));
        }

        if self.source_type.requires_url() {
            Url::parse(&self.source_url).map_err(|e| ContentError::InvalidUrl {
                url: self.source_url.clone(),
                reason: e.to_string(),
            })?;
        }

        for (name, value) in &self.custom_headers {
            if name.trim().is_empty() {
                return Err(ContentError::EmptyHeaderName);
            }
            if has_line_break(name) || has_line_break(value) {
                return Err(ContentError::HeaderInjection(name.clone()));
            }
        }

        if self.parameters.iter().any(|(name, _)| name.trim().is_empty()) {
            return Err(ContentError::EmptyParameterName);
        }

        Ok(())
    }
}

impl Default for ContentParameters {
    fn default() -> Self {
        Self {
            source_type: ContentSourceType::Static,
            source_url: String::new(),
            template_path: String::new(),
            auth_token: String::new(),
            refresh_interval_ms: 0,
            cache_enabled: true,
            custom_headers: Vec::new(),
            parameters: Vec::new(),
        }
    }
}

fn has_line_break(s: &str) -> bool {
    s.contains('\r') || s.contains('\n')
}
