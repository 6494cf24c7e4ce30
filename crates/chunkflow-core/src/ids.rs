use regex::Regex;
use std::sync::OnceLock;

fn artifact_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_-]*$").unwrap_or_else(|_| unreachable!()))
}

fn pinned_sha_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-f]{40}$").unwrap_or_else(|_| unreachable!()))
}

fn friction_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^F\d+$").unwrap_or_else(|_| unreachable!()))
}

fn repo_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*/[A-Za-z0-9][A-Za-z0-9_.-]*$")
            .unwrap_or_else(|_| unreachable!())
    })
}

/// Whether `name` is a valid artifact directory name (chunk, narrative, …).
pub fn is_valid_artifact_name(name: &str) -> bool {
    artifact_name_re().is_match(name)
}

/// Whether `sha` is a full 40-hex git object id.
pub fn is_valid_pinned_sha(sha: &str) -> bool {
    pinned_sha_re().is_match(sha)
}

/// Whether `id` is a friction entry id (`F1`, `F23`, …).
pub fn is_valid_friction_id(id: &str) -> bool {
    friction_id_re().is_match(id)
}

/// Whether `repo` is an `org/repo` reference.
pub fn is_valid_repo_ref(repo: &str) -> bool {
    repo_ref_re().is_match(repo)
}
