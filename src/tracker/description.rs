//! Back-link lines in issue descriptions
//!
//! Linked issues reference each other with a `Link: <url>` line at the end
//! of the description. Every helper here is idempotent.

/// Prefix of a back-link line
pub const LINK_PREFIX: &str = "Link:";

/// Whether the description already contains the URL
pub fn has_link(description: &str, link: &str) -> bool {
    !link.is_empty() && description.contains(link)
}

/// Append `Link: <url>` unless the URL is already present
pub fn append_link(description: &str, link: &str) -> String {
    if has_link(description, link) {
        return description.to_string();
    }

    let trimmed = description.trim_end();
    let line = format!("{} {}", LINK_PREFIX, link);
    if trimmed.is_empty() {
        line
    } else {
        format!("{}\n\n{}", trimmed, line)
    }
}

/// Whether the description carries a back-link to any issue of `project_key`
///
/// Matches `Link: http(s)://<host>/.../browse/<KEY>-<number>`, prefix
/// case-insensitive.
pub fn links_issue_in_project(description: &str, project_key: &str) -> bool {
    if project_key.is_empty() {
        return false;
    }

    let lower = description.to_ascii_lowercase();
    let prefix = LINK_PREFIX.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(offset) = lower[search_from..].find(&prefix) {
        let start = search_from + offset + prefix.len();
        search_from = start;

        let rest = description[start..].trim_start();
        let url = rest.split_whitespace().next().unwrap_or("");
        if url_targets_project(url, project_key) {
            return true;
        }
    }

    false
}

fn url_targets_project(url: &str, project_key: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return false;
    }

    let Some(pos) = url.find("/browse/") else {
        return false;
    };
    let key = &url[pos + "/browse/".len()..];
    let Some(number) = key
        .get(..project_key.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(project_key))
        .and_then(|_| key[project_key.len()..].strip_prefix('-'))
    else {
        return false;
    };

    number.chars().next().is_some_and(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_link() {
        assert_eq!(
            append_link("", "https://j/browse/USR-1"),
            "Link: https://j/browse/USR-1"
        );
        assert_eq!(
            append_link("Steps to reproduce\n\n", "https://j/browse/USR-1"),
            "Steps to reproduce\n\nLink: https://j/browse/USR-1"
        );
    }

    #[test]
    fn test_append_link_is_idempotent() {
        let once = append_link("Body", "https://j/browse/USR-1");
        let twice = append_link(&once, "https://j/browse/USR-1");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_has_link() {
        assert!(has_link("see https://j/browse/DEV-2", "https://j/browse/DEV-2"));
        assert!(!has_link("nothing here", "https://j/browse/DEV-2"));
        assert!(!has_link("anything", ""));
    }

    #[test]
    fn test_links_issue_in_project() {
        assert!(links_issue_in_project(
            "Body\n\nLink: https://acme.atlassian.net/browse/DEV-42",
            "DEV"
        ));
        assert!(links_issue_in_project(
            "link:   http://jira.local/jira/browse/dev-7 trailing",
            "DEV"
        ));
        assert!(!links_issue_in_project(
            "Link: https://acme.atlassian.net/browse/DEVOPS-42",
            "DEV"
        ));
        assert!(!links_issue_in_project(
            "https://acme.atlassian.net/browse/DEV-42",
            "DEV"
        ));
        assert!(!links_issue_in_project("Link: ftp://x/browse/DEV-1", "DEV"));
        assert!(!links_issue_in_project("Link: https://x/browse/DEV-", "DEV"));
    }
}
