//! Pure classification of shell commands as safe or escaping the worktree.
//!
//! Path-parameterised: the host repository and worktree paths come in as
//! arguments, never from ambient state, so the rules are position-independent.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

fn cd_target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"cd\s+['"]?([^'"\s]+)['"]?"#).unwrap_or_else(|_| unreachable!())
    })
}

fn cd_abs_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"cd\s+['"]?(/[^'"\s]+)['"]?"#).unwrap_or_else(|_| unreachable!())
    })
}

/// System paths an agent may `cd` into even though they are absolute.
const SAFE_PREFIXES: [&str; 3] = ["/tmp", "/var/tmp", "/dev"];

/// Check whether `command` violates the worktree sandbox.
///
/// Returns the block reason, or `None` when the command is allowed.
pub fn violation(command: &str, host_repo: &Path, worktree: &Path) -> Option<String> {
    let host = host_repo.to_string_lossy();
    let host = host.trim_end_matches('/');
    let worktree = worktree.to_string_lossy();
    let worktree = worktree.trim_end_matches('/');

    // 1. Direct cd to the host repo, in any quoting, with optional trailing
    //    slash. A target that normalises into the worktree is allowed (the
    //    worktree path usually has the host path as a prefix).
    let cd_patterns = [
        format!("cd {host}"),
        format!("cd '{host}'"),
        format!("cd \"{host}\""),
        format!("cd {host}/"),
        format!("cd '{host}/'"),
        format!("cd \"{host}/\""),
    ];
    for pattern in &cd_patterns {
        if command.contains(pattern.as_str()) {
            if let Some(caps) = cd_target_re().captures(command) {
                let target = caps[1].trim_end_matches('/');
                if target.starts_with(worktree) {
                    continue;
                }
            }
            return Some(format!("Blocked: cd to host repository path ({host})"));
        }
    }

    // 2. git -C pointing at the host repo.
    let git_c_patterns = [
        format!("git -C {host}"),
        format!("git -C '{host}'"),
        format!("git -C \"{host}\""),
    ];
    for pattern in &git_c_patterns {
        if command.contains(pattern.as_str()) {
            return Some(format!(
                "Blocked: git -C targeting host repository ({host})"
            ));
        }
    }

    // 3. Any git invocation mentioning the host path but not the worktree
    //    (catches --git-dir=… and friends).
    if command.contains("git ") && command.contains(host) && !command.contains(worktree) {
        return Some(format!(
            "Blocked: git command references host repository path ({host})"
        ));
    }

    // 4. cd to any absolute path outside the worktree, excepting scratch
    //    locations.
    for caps in cd_abs_re().captures_iter(command) {
        let target = caps[1].trim_end_matches('/');
        if target.starts_with(worktree) {
            continue;
        }
        if SAFE_PREFIXES.iter().any(|p| target.starts_with(p)) {
            continue;
        }
        return Some(format!(
            "Blocked: cd to absolute path outside worktree ({target})"
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn host() -> PathBuf {
        PathBuf::from("/repo")
    }

    fn worktree() -> PathBuf {
        PathBuf::from("/repo/.ve/chunks/e/worktree")
    }

    #[test]
    fn cd_to_host_repo_is_blocked() {
        let reason = violation("cd /repo && git commit -m x", &host(), &worktree()).unwrap();
        assert!(reason.contains("cd to host repository path"));
    }

    #[test]
    fn quoted_cd_variants_are_blocked() {
        for cmd in [
            "cd '/repo'",
            "cd \"/repo\"",
            "cd /repo/",
            "cd '/repo/' && ls",
        ] {
            assert!(violation(cmd, &host(), &worktree()).is_some(), "{cmd}");
        }
    }

    #[test]
    fn cd_into_worktree_is_allowed() {
        // The worktree path starts with the host path; that must not trip
        // the host-repo rule.
        assert!(violation(
            "cd /repo/.ve/chunks/e/worktree && ls",
            &host(),
            &worktree()
        )
        .is_none());
        assert!(violation(
            "cd /repo/.ve/chunks/e/worktree/src",
            &host(),
            &worktree()
        )
        .is_none());
    }

    #[test]
    fn git_c_on_host_is_blocked() {
        for cmd in [
            "git -C /repo status",
            "git -C '/repo' log",
            "git -C \"/repo\" push",
        ] {
            let reason = violation(cmd, &host(), &worktree()).unwrap();
            assert!(reason.contains("git -C"), "{cmd}");
        }
    }

    #[test]
    fn git_mentioning_host_without_worktree_is_blocked() {
        let reason = violation(
            "git --git-dir=/repo/.git log",
            &host(),
            &worktree(),
        )
        .unwrap();
        assert!(reason.contains("references host repository"));
    }

    #[test]
    fn git_on_worktree_path_is_allowed() {
        assert!(violation(
            "git --git-dir=/repo/.ve/chunks/e/worktree/.git status",
            &host(),
            &worktree()
        )
        .is_none());
    }

    #[test]
    fn cd_to_foreign_absolute_path_is_blocked() {
        let reason = violation("cd /home/user/other", &host(), &worktree()).unwrap();
        assert!(reason.contains("outside worktree"));
    }

    #[test]
    fn scratch_paths_are_allowed() {
        for cmd in ["cd /tmp/build", "cd /var/tmp/x", "cd /dev/shm"] {
            assert!(violation(cmd, &host(), &worktree()).is_none(), "{cmd}");
        }
    }

    #[test]
    fn relative_commands_are_allowed() {
        for cmd in [
            "ls -la",
            "cd docs/chunks",
            "git status",
            "git commit -m 'work'",
            "cargo test",
        ] {
            assert!(violation(cmd, &host(), &worktree()).is_none(), "{cmd}");
        }
    }

    #[test]
    fn rules_are_position_independent() {
        // Same rules, different mount points.
        let host = PathBuf::from("/srv/projects/widget");
        let wt = PathBuf::from("/srv/projects/widget/.ve/chunks/f/worktree");
        assert!(violation("cd /srv/projects/widget", &host, &wt).is_some());
        assert!(violation("cd /srv/projects/widget/.ve/chunks/f/worktree", &host, &wt).is_none());
        assert!(violation("cd /repo", &host, &wt).is_some()); // foreign absolute
    }
}
