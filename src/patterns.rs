use std::collections::HashSet;

/// Role mailboxes most small businesses publish or at least accept.
pub const ROLE_TEMPLATES: &[&str] = &[
    "info",
    "contact",
    "sales",
    "support",
    "admin",
    "hello",
    "office",
    "inquiry",
    "service",
    "customerservice",
];

/// Personal formats, `{first}`/`{last}` for full parts and `{f}`/`{l}` for initials.
pub const PERSONAL_TEMPLATES: &[&str] = &[
    "{first}.{last}",
    "{first}{last}",
    "{f}{last}",
    "{first}",
    "{last}",
    "{first}_{last}",
    "{first}-{last}",
    "{first}{l}",
    "{f}.{last}",
    "{first}.{l}",
    "{last}.{first}",
];

/// A generated address together with the template that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternCandidate {
    pub address: String,
    pub template: String,
}

/// Builds candidate addresses for `domain` from role templates and, when
/// `names` is non-empty, personal templates for each (first, last) pair.
///
/// Output is deterministic and free of duplicates: roles come first in
/// declaration order, then each name pair in input order.
pub fn generate(domain: &str, names: &[(String, String)]) -> Vec<PatternCandidate> {
    let domain = domain.trim().trim_start_matches('@').to_lowercase();
    if domain.is_empty() {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut candidates =
        Vec::with_capacity(ROLE_TEMPLATES.len() + names.len() * PERSONAL_TEMPLATES.len());
    let mut push = |local: String, template: &str| {
        if local.is_empty() {
            return;
        }
        let address = format!("{}@{}", local, domain);
        if seen.insert(address.clone()) {
            candidates.push(PatternCandidate {
                address,
                template: template.to_string(),
            });
        }
    };

    for role in ROLE_TEMPLATES {
        push(role.to_string(), role);
    }

    for (first, last) in names {
        let first = clean_name_part(first);
        let last = clean_name_part(last);
        if first.is_empty() && last.is_empty() {
            continue;
        }
        for template in PERSONAL_TEMPLATES {
            if let Some(local) = render(template, &first, &last) {
                push(local, template);
            }
        }
    }

    candidates
}

/// Lowercases and keeps ASCII alphanumerics only.
fn clean_name_part(part: &str) -> String {
    part.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Fills a template; `None` when it needs a part the name does not have.
fn render(template: &str, first: &str, last: &str) -> Option<String> {
    let needs_first = template.contains("{first}") || template.contains("{f}");
    let needs_last = template.contains("{last}") || template.contains("{l}");
    if (needs_first && first.is_empty()) || (needs_last && last.is_empty()) {
        return None;
    }

    let initial = |s: &str| s.chars().next().map(String::from).unwrap_or_default();
    Some(
        template
            .replace("{first}", first)
            .replace("{last}", last)
            .replace("{f}", &initial(first))
            .replace("{l}", &initial(last)),
    )
}
