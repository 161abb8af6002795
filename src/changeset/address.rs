//! Resource address parsing.
//!
//! Addresses look like `module.net.module.subnet["a.b"].aws_subnet.this[0]`.
//! Dots inside index brackets or quoted keys do not separate segments.

use crate::error::ParseError;

/// A resource address split into its module path and local part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAddress {
    /// Module path, empty for the root module.
    pub module: String,
    /// Resource part relative to the module (e.g. `aws_instance.web[0]`).
    pub local: String,
}

impl ResourceAddress {
    /// Parses an address.
    ///
    /// # Errors
    ///
    /// Returns an error if brackets or quotes are unbalanced, a segment is
    /// empty, or no resource part follows the module path.
    pub fn parse(address: &str) -> Result<Self, ParseError> {
        let segments = split_segments(address)?;

        let mut modules = Vec::new();
        let mut i = 0;
        while i + 1 < segments.len() && segments[i] == "module" {
            modules.push(format!("module.{}", segments[i + 1]));
            i += 2;
        }

        let local = &segments[i..];
        let required = if local.first() == Some(&"data") { 3 } else { 2 };
        if local.len() < required {
            return Err(ParseError::new(
                "resource address has no resource type and name",
                address,
            ));
        }

        Ok(Self {
            module: modules.join("."),
            local: local.join("."),
        })
    }

    /// Returns true if the resource lives in the root module.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.module.is_empty()
    }
}

/// Splits on dots outside brackets and string literals.
fn split_segments(address: &str) -> Result<Vec<&str>, ParseError> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (idx, ch) in address.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ParseError::new("unbalanced ']' in address", address))?;
            }
            '.' if depth == 0 => {
                segments.push(&address[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }

    if in_string || depth != 0 {
        return Err(ParseError::new("unterminated index in address", address));
    }
    segments.push(&address[start..]);

    if segments.iter().any(|s| s.is_empty()) {
        return Err(ParseError::new("empty segment in address", address));
    }
    Ok(segments)
}
