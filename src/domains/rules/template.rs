use std::collections::HashMap;

/// Substitute `{{name}}` placeholders with context values. Unknown
/// placeholders are left verbatim so a template with literal braces does not
/// silently lose content.
pub fn render(template: &str, variables: &HashMap<&'static str, String>) -> String {
    let mut rendered = template.to_string();
    for (name, value) in variables {
        rendered = rendered.replace(&format!("{{{{{name}}}}}"), value);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HashMap<&'static str, String> {
        let mut map = HashMap::new();
        map.insert("session_name", "demo".to_string());
        map.insert("branch", "demo".to_string());
        map
    }

    #[test]
    fn substitutes_known_placeholders() {
        let out = render("session={{session_name}} branch={{branch}}", &vars());
        assert_eq!(out, "session=demo branch=demo");
    }

    #[test]
    fn unknown_placeholders_are_preserved() {
        let out = render("{{mystery}} stays", &vars());
        assert_eq!(out, "{{mystery}} stays");
    }

    #[test]
    fn repeated_placeholders_all_replaced() {
        let out = render("{{branch}}/{{branch}}", &vars());
        assert_eq!(out, "demo/demo");
    }
}
