//! Expansion of `{{.Name}}` placeholders used by the manifest and the
//! user configuration.

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default)]
pub struct TemplateValues {
    values: Vec<(&'static str, String)>,
}

impl TemplateValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &'static str, value: impl Into<String>) {
        let value = value.into();
        match self.values.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.values.push((key, value)),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub fn render(name: &str, template: &str, values: &TemplateValues) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(template_error(name, "unterminated placeholder"));
        };
        let inner = after[..end].trim();
        let Some(key) = inner.strip_prefix('.') else {
            return Err(template_error(
                name,
                format!("unsupported placeholder {{{{{inner}}}}}"),
            ));
        };
        match values.get(key) {
            Some(value) => out.push_str(value),
            None => {
                return Err(template_error(
                    name,
                    format!("unknown placeholder {{{{.{key}}}}}"),
                ))
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn template_error(name: &str, message: impl Into<String>) -> Error {
    Error::Template {
        name: name.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_values() {
        let values = TemplateValues::new()
            .with("Version", "3.8.2")
            .with("Filename", "bison-3.8.2.tar.xz");
        assert_eq!(
            render("url", "https://ftp.gnu.org/gnu/bison/{{.Filename}}", &values).unwrap(),
            "https://ftp.gnu.org/gnu/bison/bison-3.8.2.tar.xz"
        );
        assert_eq!(
            render("filename", "bison-{{ .Version }}.tar.xz", &values).unwrap(),
            "bison-3.8.2.tar.xz"
        );
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let values = TemplateValues::new();
        assert_eq!(
            render("dir", "/opt/toolchain", &values).unwrap(),
            "/opt/toolchain"
        );
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let values = TemplateValues::new().with("Version", "1.0");
        let err = render("filename", "tool-{{.Arch}}.tar.gz", &values).unwrap_err();
        assert!(err.to_string().contains("unknown placeholder {{.Arch}}"));
    }

    #[test]
    fn unterminated_placeholder_is_an_error() {
        let values = TemplateValues::new().with("Version", "1.0");
        assert!(render("filename", "tool-{{.Version", &values).is_err());
    }

    #[test]
    fn set_overwrites_existing_value() {
        let mut values = TemplateValues::new().with("Version", "1.0");
        values.set("Version", "2.0");
        assert_eq!(render("v", "{{.Version}}", &values).unwrap(), "2.0");
    }
}
