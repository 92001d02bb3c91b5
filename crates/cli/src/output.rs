// Output formatting for CLI

use anyhow::Result;
use coldstart_core::InvocationResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Self {
        match s {
            "text" => OutputFormat::Text,
            _ => OutputFormat::Json,
        }
    }

    /// Render an invocation response for stdout
    ///
    /// `json` prints the full `{statusCode, headers, body}` object; `text`
    /// prints the status and a pretty-printed body.
    pub fn render(&self, response: &InvocationResponse) -> Result<String> {
        match self {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(response)?),
            OutputFormat::Text => {
                let body = response.body_json();
                let mut out = String::new();
                out.push_str(&field("Status", &response.status_code.to_string()));
                if let Some(success) = body.get("success").and_then(|v| v.as_bool()) {
                    out.push_str(&field("Success", &success.to_string()));
                }
                if let Some(route) = body.get("route").and_then(|v| v.as_str()) {
                    out.push_str(&field("Route", route));
                }
                if let Some(error) = body.get("error").and_then(|v| v.as_str()) {
                    out.push_str(&field("Error", error));
                }
                out.push_str(&serde_json::to_string_pretty(&body)?);
                Ok(out)
            }
        }
    }
}

fn field(label: &str, value: &str) -> String {
    format!("{:<10} {}\n", format!("{}:", label), value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coldstart_core::SupervisorError;
    use serde_json::json;

    #[test]
    fn test_json_output_is_the_response_object() {
        let response = InvocationResponse::delivered("/webhook/echo", "hi", json!({"response": "hi"}));
        let rendered = OutputFormat::Json.render(&response).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["statusCode"], 200);
        assert!(parsed["body"].as_str().unwrap().contains("\"route\":\"/webhook/echo\""));
    }

    #[test]
    fn test_text_output_shows_failure() {
        let response = InvocationResponse::failure(
            "Network error connecting to engine",
            &SupervisorError::forward("all routes failed"),
        );
        let rendered = OutputFormat::Text.render(&response).unwrap();
        assert!(rendered.starts_with("Status:    200\n"));
        assert!(rendered.contains("Success:   false\n"));
        assert!(rendered.contains("Error:     forwarding failed: all routes failed"));
    }

    #[test]
    fn test_parse_defaults_to_json() {
        assert_eq!(OutputFormat::parse("text"), OutputFormat::Text);
        assert_eq!(OutputFormat::parse("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("other"), OutputFormat::Json);
    }
}
