use crate::common::*;

/// Loads a file with one class name per line.
pub async fn load_classes_file(path: impl AsRef<Path>) -> Result<IndexSet<String>> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("unable to read classes file '{}'", path.display()))?;
    let lines: Vec<_> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let classes: IndexSet<_> = lines.iter().map(|&line| line.to_owned()).collect();
    ensure!(
        lines.len() == classes.len(),
        "duplicated class names found in '{}'",
        path.display()
    );
    ensure!(
        !classes.is_empty(),
        "no classes found in '{}'",
        path.display()
    );
    Ok(classes)
}

/// Looks up the class index, honoring an optional whitelist.
pub(crate) fn class_index_of(
    classes: &IndexSet<String>,
    whitelist: Option<&HashSet<String>>,
    name: &str,
) -> Option<usize> {
    if let Some(whitelist) = whitelist {
        whitelist.get(name)?;
    }
    classes.get_index_of(name)
}

pub(crate) fn pixel_tlbr(t: f64, l: f64, b: f64, r: f64) -> Result<TLBR<R64>> {
    ensure!(
        [t, l, b, r].iter().all(|value| value.is_finite()),
        "box coordinates must be finite, but get {:?}",
        [t, l, b, r]
    );
    TLBR::try_from_tlbr([r64(t), r64(l), r64(b), r64(r)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn classes_file_rejects_duplicates() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("data");
        let classes = load_classes_file(dir.join("classes.txt")).await.unwrap();
        assert_eq!(classes.len(), 3);
        assert_eq!(classes.get_index_of("flat"), Some(1));

        assert!(load_classes_file(dir.join("duplicated_classes.txt"))
            .await
            .is_err());
    }

    #[test]
    fn whitelist_filters_classes() {
        let classes: IndexSet<_> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        let whitelist: HashSet<_> = ["b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(class_index_of(&classes, None, "a"), Some(0));
        assert_eq!(class_index_of(&classes, Some(&whitelist), "a"), None);
        assert_eq!(class_index_of(&classes, Some(&whitelist), "b"), Some(1));
        assert_eq!(class_index_of(&classes, None, "c"), None);
    }
}
