use crate::error::{ChunkflowError, ChunkflowResult};

/// Project key used for references without an `org/repo::` qualifier.
pub const LOCAL_PROJECT: &str = ".";

/// A parsed symbolic code reference: `[org/repo::]file[#symbol[::symbol…]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicRef {
    /// `org/repo` qualifier, or `None` for the local project.
    pub project: Option<String>,
    /// File path within the project.
    pub file: String,
    /// Symbol path components, outermost first. Empty = whole file.
    pub symbol_path: Vec<String>,
}

impl SymbolicRef {
    /// Parse a raw reference string.
    pub fn parse(raw: &str) -> ChunkflowResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ChunkflowError::Validation(
                "empty code reference".to_string(),
            ));
        }

        let (file_part, symbol_part) = match raw.split_once('#') {
            Some((f, s)) => (f, Some(s)),
            None => (raw, None),
        };

        // An `org/repo::` qualifier contains a slash before the separator;
        // plain paths never use `::`.
        let (project, file) = match file_part.split_once("::") {
            Some((qualifier, path)) if qualifier.contains('/') => {
                (Some(qualifier.to_string()), path.to_string())
            }
            Some(_) => {
                return Err(ChunkflowError::Validation(format!(
                    "invalid project qualifier in reference: {raw}"
                )))
            }
            None => (None, file_part.to_string()),
        };

        if file.is_empty() {
            return Err(ChunkflowError::Validation(format!(
                "reference has no file path: {raw}"
            )));
        }

        let symbol_path = match symbol_part {
            Some(s) if !s.is_empty() => s.split("::").map(str::to_string).collect(),
            Some(_) => {
                return Err(ChunkflowError::Validation(format!(
                    "reference has empty symbol path: {raw}"
                )))
            }
            None => Vec::new(),
        };

        Ok(Self {
            project,
            file,
            symbol_path,
        })
    }

    /// `(project, file)` key, qualifying local references with `default`.
    pub fn file_key(&self, default: &str) -> (String, String) {
        (
            self.project.clone().unwrap_or_else(|| default.to_string()),
            self.file.clone(),
        )
    }

    /// Two references overlap iff they name the same file and either one has
    /// no symbol path, or one symbol path equals or is a `::`-prefix of the
    /// other.
    pub fn overlaps(&self, other: &SymbolicRef, default_project: &str) -> bool {
        if self.file_key(default_project) != other.file_key(default_project) {
            return false;
        }
        if self.symbol_path.is_empty() || other.symbol_path.is_empty() {
            return true;
        }
        let (shorter, longer) = if self.symbol_path.len() <= other.symbol_path.len() {
            (&self.symbol_path, &other.symbol_path)
        } else {
            (&other.symbol_path, &self.symbol_path)
        };
        longer[..shorter.len()] == shorter[..]
    }

    /// Human-readable rendering (`file#sym::inner`, with project qualifier).
    pub fn display_string(&self) -> String {
        let mut out = String::new();
        if let Some(project) = &self.project {
            out.push_str(project);
            out.push_str("::");
        }
        out.push_str(&self.file);
        if !self.symbol_path.is_empty() {
            out.push('#');
            out.push_str(&self.symbol_path.join("::"));
        }
        out
    }
}

/// Whether any reference in `a` overlaps any reference in `b`.
pub fn any_overlap(a: &[SymbolicRef], b: &[SymbolicRef], default_project: &str) -> bool {
    a.iter()
        .any(|ra| b.iter().any(|rb| ra.overlaps(rb, default_project)))
}

/// All overlapping pairs, rendered for operator-facing conflict reasons.
pub fn overlapping_pairs(
    a: &[SymbolicRef],
    b: &[SymbolicRef],
    default_project: &str,
) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for ra in a {
        for rb in b {
            if ra.overlaps(rb, default_project) {
                pairs.push((ra.display_string(), rb.display_string()));
            }
        }
    }
    pairs
}
