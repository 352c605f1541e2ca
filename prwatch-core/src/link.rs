//! Pull-request link extraction from chat message text.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// `https://<host>/<owner>/<repo>/pull/<number>`. Segments stop at whitespace
/// and at the `<`, `>` and `|` characters Slack uses to wrap links.
static PULL_REQUEST_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://([^/\s<>|]+)/([^/\s<>|]+)/([^/\s<>|]+)/pull/(\d+)")
        .expect("pull request URL pattern is valid")
});

/// Stable identifier of a repository, rendered as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A pull request referenced from a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestLink {
    pub host: String,
    pub repo: RepoRef,
    pub pr_number: u64,
}

/// Find the first pull-request URL in `text`.
///
/// Only the first match is considered; later links are ignored even when the
/// first one turns out to be unusable (e.g. a number that overflows `u64`).
pub fn find_pull_request_link(text: &str) -> Option<PullRequestLink> {
    let captures = PULL_REQUEST_URL.captures(text)?;
    let pr_number = captures[4].parse::<u64>().ok()?;

    Some(PullRequestLink {
        host: captures[1].to_string(),
        repo: RepoRef::new(&captures[2], &captures[3]),
        pr_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_link() {
        let link = find_pull_request_link("please review https://github.com/acme/widgets/pull/42")
            .unwrap();
        assert_eq!(link.host, "github.com");
        assert_eq!(link.repo, RepoRef::new("acme", "widgets"));
        assert_eq!(link.repo.to_string(), "acme/widgets");
        assert_eq!(link.pr_number, 42);
    }

    #[test]
    fn test_slack_wrapped_link() {
        let link =
            find_pull_request_link("<https://github.com/acme/widgets/pull/7|acme/widgets#7>")
                .unwrap();
        assert_eq!(link.repo, RepoRef::new("acme", "widgets"));
        assert_eq!(link.pr_number, 7);

        let link = find_pull_request_link("<https://github.com/acme/widgets/pull/8>").unwrap();
        assert_eq!(link.pr_number, 8);
    }

    #[test]
    fn test_link_with_trailing_path() {
        let link =
            find_pull_request_link("https://github.com/acme/widgets/pull/42/files").unwrap();
        assert_eq!(link.pr_number, 42);
    }

    #[test]
    fn test_only_first_link_is_used() {
        let text = "https://github.com/a/one/pull/1 and https://github.com/b/two/pull/2";
        let link = find_pull_request_link(text).unwrap();
        assert_eq!(link.repo, RepoRef::new("a", "one"));
        assert_eq!(link.pr_number, 1);
    }

    #[test]
    fn test_other_hosts_are_accepted() {
        let link = find_pull_request_link("https://git.example.com/team/svc/pull/3").unwrap();
        assert_eq!(link.host, "git.example.com");
    }

    #[test]
    fn test_no_link() {
        assert_eq!(find_pull_request_link(""), None);
        assert_eq!(find_pull_request_link("nothing to see here"), None);
        assert_eq!(
            find_pull_request_link("https://github.com/acme/widgets/issues/42"),
            None
        );
        assert_eq!(
            find_pull_request_link("http://github.com/acme/widgets/pull/42"),
            None
        );
    }

    #[test]
    fn test_overflowing_number_is_ignored() {
        let text = "https://github.com/acme/widgets/pull/99999999999999999999999 \
                    https://github.com/acme/widgets/pull/1";
        assert_eq!(find_pull_request_link(text), None);
    }
}
