use std::collections::HashMap;

/// An HTML page with `{{key}}` placeholders.
pub struct PageTemplate {
    template: String,
}

impl PageTemplate {
    pub fn new<S: Into<String>>(template: S) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Render the template by replacing `{{key}}` with the corresponding value.
    ///
    /// Substitution is a single pass over the template, so placeholder-like
    /// text inside a value is left alone. Unknown keys are kept verbatim.
    pub fn render(&self, vars: &HashMap<&str, &str>) -> String {
        let mut output = String::with_capacity(
            self.template.len() + vars.values().map(|v| v.len()).sum::<usize>(),
        );
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find("{{") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let key = &after[..end];
                    match vars.get(key) {
                        Some(value) => output.push_str(value),
                        None => output.push_str(&rest[start..start + 2 + end + 2]),
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    output.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        output.push_str(rest);
        output
    }
}

/// Escape text for use in HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Make serialized JSON safe to inline in a `<script>` element.
///
/// `<` is only ever found inside JSON strings, where `\u003c` decodes to the
/// same character, so `</script>` in the data cannot close the element.
pub fn escape_script_json(json: &str) -> String {
    json.replace('<', "\\u003c")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let t = PageTemplate::new("<h1>{{title}}</h1><p>{{height}}px</p>");
        let vars = HashMap::from([("title", "Atlas"), ("height", "700")]);
        assert_eq!(t.render(&vars), "<h1>Atlas</h1><p>700px</p>");
    }

    #[test]
    fn values_are_not_expanded_again() {
        let t = PageTemplate::new("{{a}}|{{b}}");
        let vars = HashMap::from([("a", "{{b}}"), ("b", "x")]);
        assert_eq!(t.render(&vars), "{{b}}|x");
    }

    #[test]
    fn unknown_and_unclosed_placeholders_survive() {
        let t = PageTemplate::new("{{nope}} and {{open");
        assert_eq!(t.render(&HashMap::new()), "{{nope}} and {{open");
    }

    #[test]
    fn escaping() {
        assert_eq!(escape_html(r#"<b>"Q&A"</b>"#), "&lt;b&gt;&quot;Q&amp;A&quot;&lt;/b&gt;");
        let json = serde_json::to_string("</script><script>").unwrap();
        let safe = escape_script_json(&json);
        assert!(!safe.contains('<'));
        assert_eq!(serde_json::from_str::<String>(&safe).unwrap(), "</script><script>");
    }
}
