use std::collections::{BTreeMap, BTreeSet};

/// Multi-parent topological sort of the `created_after` DAG.
///
/// Kahn's algorithm seeded from roots, with a lexicographic ready set so the
/// output is deterministic. Parents that are not present in `deps` (deleted
/// ancestors) are skipped: the child is still included, rooted where its
/// known parents allow.
pub fn topological_sort_multi_parent(deps: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (name, parents) in deps {
        let known_parents: Vec<&str> = parents
            .iter()
            .map(String::as_str)
            .filter(|p| deps.contains_key(*p))
            .collect();
        indegree.insert(name.as_str(), known_parents.len());
        for parent in known_parents {
            children.entry(parent).or_default().push(name.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();

    let mut ordered = Vec::with_capacity(deps.len());
    while let Some(node) = ready.pop_first() {
        ordered.push(node.to_string());
        for child in children.get(node).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(child) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(child);
                }
            }
        }
    }

    // A cycle would leave nodes unemitted; append them in name order so the
    // result still covers every artifact.
    if ordered.len() < deps.len() {
        let emitted: BTreeSet<&str> = ordered.iter().map(String::as_str).collect();
        let mut missing: Vec<String> = Vec::new();
        for name in deps.keys() {
            if !emitted.contains(name.as_str()) {
                missing.push(name.clone());
            }
        }
        ordered.extend(missing);
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(n, ps)| {
                (
                    (*n).to_string(),
                    ps.iter().map(|p| (*p).to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn empty_graph() {
        assert!(topological_sort_multi_parent(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn single_node() {
        let d = deps(&[("only", &[])]);
        assert_eq!(topological_sort_multi_parent(&d), vec!["only"]);
    }

    #[test]
    fn linear_chain() {
        let d = deps(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        assert_eq!(topological_sort_multi_parent(&d), vec!["a", "b", "c"]);
    }

    #[test]
    fn multi_parent_dag() {
        let d = deps(&[("a", &[]), ("b", &[]), ("merge", &["a", "b"])]);
        let result = topological_sort_multi_parent(&d);
        let pos = |n: &str| result.iter().position(|x| x == n).unwrap();
        assert!(pos("merge") > pos("a"));
        assert!(pos("merge") > pos("b"));
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn disconnected_components() {
        let d = deps(&[("a", &[]), ("b", &["a"]), ("x", &[]), ("y", &["x"])]);
        let result = topological_sort_multi_parent(&d);
        let pos = |n: &str| result.iter().position(|x| x == n).unwrap();
        assert!(pos("b") > pos("a"));
        assert!(pos("y") > pos("x"));
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn lexicographic_tiebreak_is_deterministic() {
        let d = deps(&[("c", &[]), ("a", &[]), ("b", &[])]);
        let first = topological_sort_multi_parent(&d);
        let second = topological_sort_multi_parent(&d);
        assert_eq!(first, second);
        assert_eq!(first, vec!["a", "b", "c"]);
    }

    #[test]
    fn missing_parent_skipped() {
        let d = deps(&[("child", &["deleted_ancestor"])]);
        let result = topological_sort_multi_parent(&d);
        assert_eq!(result, vec!["child"]);
    }

    #[test]
    fn complex_dag_with_merge_points() {
        //     a
        //    / \
        //   b   c
        //    \ / \
        //     d   e
        //      \ /
        //       f
        let d = deps(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
            ("e", &["c"]),
            ("f", &["d", "e"]),
        ]);
        let result = topological_sort_multi_parent(&d);
        let pos = |n: &str| result.iter().position(|x| x == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
        assert!(pos("c") < pos("e"));
        assert!(pos("d") < pos("f"));
        assert!(pos("e") < pos("f"));
        assert_eq!(result.len(), 6);
    }

    #[test]
    fn cycle_still_emits_every_node() {
        let d = deps(&[("a", &["b"]), ("b", &["a"])]);
        let result = topological_sort_multi_parent(&d);
        assert_eq!(result.len(), 2);
    }
}
