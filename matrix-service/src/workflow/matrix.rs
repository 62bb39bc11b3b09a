// Matrix Strategy Expansion
// Expands a matrix into concrete combinations

use crate::workflow::models::{Combination, Matrix};

/// One expanded combination and the id derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixInstance {
    pub id: String,
    pub values: Combination,
}

pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand a matrix into instances.
    ///
    /// Produces the cartesian product of the dimensions in declaration order,
    /// drops combinations matched by an `exclude` entry, then applies each
    /// `include` entry: it is merged into every combination whose original
    /// dimension values it agrees with, or appended as a new combination when
    /// it agrees with none.
    pub fn expand(matrix: &Matrix) -> Vec<MatrixInstance> {
        let dimension_keys: Vec<&str> =
            matrix.dimensions.iter().map(|(k, _)| k.as_str()).collect();

        let mut combinations = Self::cartesian_product(matrix);
        combinations.retain(|combo| !matrix.exclude.iter().any(|ex| Self::agrees(ex, combo)));

        let mut appended = Vec::new();

        for entry in &matrix.include {
            let mut matched = false;
            for combo in combinations.iter_mut() {
                let agrees = entry
                    .iter()
                    .filter(|(k, _)| dimension_keys.contains(k))
                    .all(|(k, v)| combo.get(k) == Some(v));
                if agrees {
                    matched = true;
                    for (k, v) in entry.iter().filter(|(k, _)| !dimension_keys.contains(k)) {
                        combo.set(k, v);
                    }
                }
            }
            if !matched {
                appended.push(entry.clone());
            }
        }

        let mut instances: Vec<MatrixInstance> = combinations
            .into_iter()
            .map(|values| MatrixInstance {
                id: Self::instance_id(&values, Some(dimension_keys.as_slice())),
                values,
            })
            .collect();
        instances.extend(appended.into_iter().map(|values| MatrixInstance {
            id: Self::instance_id(&values, None),
            values,
        }));
        instances
    }

    fn cartesian_product(matrix: &Matrix) -> Vec<Combination> {
        if matrix.dimensions.is_empty() {
            return Vec::new();
        }

        let mut combinations = vec![Combination::default()];
        for (key, values) in &matrix.dimensions {
            combinations = combinations
                .iter()
                .flat_map(|combo| {
                    values.iter().map(move |value| {
                        let mut next = combo.clone();
                        next.set(key, value);
                        next
                    })
                })
                .collect();
        }
        combinations
    }

    /// Every key of `entry` has the same value in `combo`
    fn agrees(entry: &Combination, combo: &Combination) -> bool {
        entry.iter().all(|(k, v)| combo.get(k) == Some(v))
    }

    /// Values joined with `-`, restricted to the dimension keys when given
    fn instance_id(values: &Combination, keys: Option<&[&str]>) -> String {
        values
            .iter()
            .filter(|(k, _)| keys.map_or(true, |keys| keys.contains(k)))
            .map(|(_, v)| v)
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(yaml: &str) -> Matrix {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn ids(instances: &[MatrixInstance]) -> Vec<&str> {
        instances.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_single_dimension() {
        let instances =
            MatrixExpander::expand(&matrix("os: [ubuntu-latest, macos-latest, windows-latest]"));

        assert_eq!(
            ids(&instances),
            vec!["ubuntu-latest", "macos-latest", "windows-latest"]
        );
        assert_eq!(instances[1].values.get("os"), Some("macos-latest"));
    }

    #[test]
    fn test_cartesian_product_in_declaration_order() {
        let instances = MatrixExpander::expand(&matrix(
            "os: [ubuntu-latest, windows-latest]\nrust: [stable, nightly]",
        ));

        assert_eq!(
            ids(&instances),
            vec![
                "ubuntu-latest-stable",
                "ubuntu-latest-nightly",
                "windows-latest-stable",
                "windows-latest-nightly",
            ]
        );
    }

    #[test]
    fn test_exclude_partial_match() {
        let instances = MatrixExpander::expand(&matrix(
            r#"
os: [ubuntu-latest, windows-latest]
rust: [stable, nightly]
exclude:
  - os: windows-latest
    rust: nightly
"#,
        ));

        assert_eq!(
            ids(&instances),
            vec!["ubuntu-latest-stable", "ubuntu-latest-nightly", "windows-latest-stable"]
        );
    }

    #[test]
    fn test_include_merges_into_matching_combination() {
        let instances = MatrixExpander::expand(&matrix(
            r#"
os: [ubuntu-latest, windows-latest]
include:
  - os: windows-latest
    exe-suffix: .exe
"#,
        ));

        assert_eq!(ids(&instances), vec!["ubuntu-latest", "windows-latest"]);
        assert_eq!(instances[0].values.get("exe-suffix"), None);
        assert_eq!(instances[1].values.get("exe-suffix"), Some(".exe"));
    }

    #[test]
    fn test_include_without_dimension_keys_extends_all() {
        let instances = MatrixExpander::expand(&matrix(
            "os: [ubuntu-latest, macos-latest]\ninclude:\n  - coverage: \"off\"",
        ));

        assert!(instances.iter().all(|i| i.values.get("coverage") == Some("off")));
    }

    #[test]
    fn test_include_appends_unmatched_entry() {
        let instances = MatrixExpander::expand(&matrix(
            r#"
os: [ubuntu-latest]
include:
  - os: macos-14
    arch: arm64
"#,
        ));

        assert_eq!(ids(&instances), vec!["ubuntu-latest", "macos-14-arm64"]);
    }

    #[test]
    fn test_include_only_matrix() {
        let instances = MatrixExpander::expand(&matrix(
            "include:\n  - os: ubuntu-latest\n  - os: windows-latest",
        ));

        assert_eq!(ids(&instances), vec!["ubuntu-latest", "windows-latest"]);
    }
}
