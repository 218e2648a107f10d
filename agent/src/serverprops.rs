use std::{collections::BTreeMap, io, path::Path};

/// Parse the `key=value` lines of a server.properties file.
///
/// Comments and blank lines are skipped, as are lines without `=`. Values keep
/// everything after the first `=`.
pub fn parse(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub async fn parse_from_path(path: &Path) -> io::Result<BTreeMap<String, String>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(parse(&content))
}
