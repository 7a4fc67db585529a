//! Pure parsing of the templated body section "Repository list (if
//! applicable)" (spec.md §4.4 step 4): placeholder tokens are ignored,
//! results are deduplicated while preserving first-seen order.

use agent_runner_types::WorkItem;

const PLACEHOLDER_TOKENS: &[&str] = &["_no response_", "none", "n/a", "-", ""];
const SECTION_HEADING: &str = "repository list (if applicable)";

/// Extracts the named section's body (everything up to the next `##`/`#`
/// heading or end of body), then splits it into non-placeholder,
/// deduplicated repo name lines.
pub fn parse_repo_list(body: &str) -> Vec<String> {
    let Some(section) = extract_section(body, SECTION_HEADING) else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for raw_line in section.lines() {
        let line = raw_line.trim().trim_start_matches('-').trim();
        if line.is_empty() {
            continue;
        }
        let normalized = line.to_lowercase();
        if PLACEHOLDER_TOKENS.contains(&normalized.as_str()) {
            continue;
        }
        if seen.insert(line.to_string()) {
            out.push(line.to_string());
        }
    }
    out
}

fn extract_section<'a>(body: &'a str, heading: &str) -> Option<&'a str> {
    let lower = body.to_lowercase();
    let heading_start = lower.find(heading)?;
    let after_heading = &body[heading_start + heading.len()..];
    let after_lower = &lower[heading_start + heading.len()..];

    let next_heading_offset = after_lower
        .lines()
        .scan(0usize, |offset, line| {
            let start = *offset;
            *offset += line.len() + 1;
            Some((start, line))
        })
        .find(|(_, line)| {
            let trimmed = line.trim_start();
            trimmed.starts_with('#')
        })
        .map(|(start, _)| start);

    Some(match next_heading_offset {
        Some(offset) => &after_heading[..offset.min(after_heading.len())],
        None => after_heading,
    })
}

/// Fills a prompt template's `{{repo}}`/`{{number}}`/`{{title}}`/`{{body}}`/
/// `{{url}}` placeholders from a work item (spec.md §4.5 "Prompt
/// construction"). Unrecognized placeholders are left untouched rather than
/// erroring, so a template authored against a future field doesn't break
/// dispatch on a typo.
pub fn render_item_prompt(template: &str, item: &WorkItem) -> String {
    template
        .replace("{{repo}}", &item.repo.to_string())
        .replace("{{number}}", &item.number.to_string())
        .replace("{{title}}", &item.title)
        .replace("{{body}}", &item.body)
        .replace("{{url}}", &item.url)
}

/// Fills an idle-task prompt template's `{{repo}}`/`{{task}}` placeholders.
/// Idle runs aren't tied to a [`WorkItem`], so they get their own small
/// placeholder set rather than reusing [`render_item_prompt`].
pub fn render_idle_prompt(template: &str, repo: &str, task: &str) -> String {
    template.replace("{{repo}}", repo).replace("{{task}}", task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_deduplicates_repo_names() {
        let body = "## Repository list (if applicable)\n- acme/widgets\n- acme/gadgets\n- acme/widgets\n\n## Other section\nsomething else";
        assert_eq!(
            parse_repo_list(body),
            vec!["acme/widgets".to_string(), "acme/gadgets".to_string()]
        );
    }

    #[test]
    fn ignores_placeholder_tokens() {
        let body = "## Repository list (if applicable)\n_No response_\n";
        assert!(parse_repo_list(body).is_empty());
    }

    #[test]
    fn missing_section_yields_empty_list() {
        assert!(parse_repo_list("no relevant section here").is_empty());
    }

    #[test]
    fn dash_only_placeholder_is_ignored() {
        let body = "## Repository list (if applicable)\n-\n";
        assert!(parse_repo_list(body).is_empty());
    }

    #[test]
    fn render_item_prompt_substitutes_all_placeholders() {
        use agent_runner_types::{ItemKind, RepoRef};

        let item = WorkItem {
            repo: RepoRef::new("acme", "widgets"),
            number: 42,
            id: "i42".to_string(),
            kind: ItemKind::Issue,
            labels: vec![],
            author_login: "alice".to_string(),
            title: "Fix the thing".to_string(),
            body: "Steps to reproduce".to_string(),
            url: "https://github.com/acme/widgets/issues/42".to_string(),
            comments: vec![],
        };
        let rendered = render_item_prompt(
            "Work on {{repo}}#{{number}}: {{title}}\n\n{{body}}\n\nSee {{url}}",
            &item,
        );
        assert_eq!(
            rendered,
            "Work on acme/widgets#42: Fix the thing\n\nSteps to reproduce\n\nSee https://github.com/acme/widgets/issues/42"
        );
    }
}
