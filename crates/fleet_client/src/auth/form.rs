use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Quoted attribute values may contain `>`.
    static ref INPUT_TAG: Regex =
        Regex::new(r#"(?is)<input\b(?:[^>"']|"[^"]*"|'[^']*')*>"#).expect("input regex");
    static ref ATTRIBUTE: Regex =
        Regex::new(r#"(?is)([a-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("attribute regex");
}

/// Hidden fields of the login page, in document order.
#[derive(Debug, Default, Clone)]
pub(crate) struct LoginForm {
    pub hidden: Vec<(String, String)>,
    pub has_captcha: bool,
}

impl LoginForm {
    pub fn parse(html: &str) -> Self {
        let mut form = LoginForm::default();
        for tag in INPUT_TAG.find_iter(html) {
            let mut kind = None;
            let mut name = None;
            let mut value = String::new();
            for attr in ATTRIBUTE.captures_iter(tag.as_str()) {
                let raw = attr
                    .get(2)
                    .or_else(|| attr.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match attr[1].to_ascii_lowercase().as_str() {
                    "type" => kind = Some(raw.to_ascii_lowercase()),
                    "name" => name = Some(raw.to_string()),
                    "value" => value = decode_entities(raw),
                    _ => {}
                }
            }
            let Some(name) = name else {
                continue;
            };
            if name == "captcha" {
                form.has_captcha = true;
            } else if kind.as_deref() == Some("hidden") {
                form.hidden.push((name, value));
            }
        }
        form
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.hidden
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
